//! Test configuration helpers for creating fast, tool-independent orchestrators

use extractall::backend::ZipBackend;
use extractall::{
    BackendRegistry, Config, DecompressionBackend, MonitorConfig, Orchestrator, RepairRegistry,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for `input` with short monitor timings and no PATH lookups
///
/// The no-progress window stays well above the poll interval so a healthy in-process
/// extraction is never mistaken for a stall.
pub fn test_config(input: &Path) -> Config {
    let mut config = Config::new(input);
    config.workers = 2;
    config.tools.search_path = false;
    config.monitor = MonitorConfig {
        stuck_timeout: Duration::from_secs(20),
        no_progress_timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(50),
        cancel_grace: Duration::from_millis(500),
    };
    config
}

/// Monitor timings that catch a stalled attempt within a second
pub fn fast_monitor() -> MonitorConfig {
    MonitorConfig {
        stuck_timeout: Duration::from_secs(10),
        no_progress_timeout: Duration::from_millis(300),
        poll_interval: Duration::from_millis(50),
        cancel_grace: Duration::from_millis(200),
    }
}

/// Orchestrator with exactly the given backends and no repair tools
pub fn orchestrator_with(
    config: Config,
    backends: Vec<Arc<dyn DecompressionBackend>>,
) -> Orchestrator {
    let mut registry = BackendRegistry::new();
    for backend in backends {
        registry.register(backend);
    }
    Orchestrator::with_parts(config, registry, RepairRegistry::new())
        .expect("test configuration should be valid")
}

/// Orchestrator backed by the in-process ZIP backend only
pub fn zip_orchestrator(config: Config) -> Orchestrator {
    orchestrator_with(config, vec![Arc::new(ZipBackend)])
}
