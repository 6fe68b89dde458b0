use super::*;
use crate::backend::{
    BackendCapabilities, BackendReport, DecompressionBackend, ExtractRequest,
};
use crate::config::MonitorConfig;
use crate::error::LedgerError;
use crate::types::{ArchiveFormat, Mode, VolumeScheme};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

/// Succeeds for every request and writes `<stem>.txt`
#[derive(Default)]
struct CountingBackend {
    calls: AtomicUsize,
}

#[async_trait]
impl DecompressionBackend for CountingBackend {
    fn name(&self) -> &str {
        "counting"
    }

    fn formats(&self) -> &[ArchiveFormat] {
        &[ArchiveFormat::Zip, ArchiveFormat::Rar]
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            multipart: true,
            partial: true,
            encodings: false,
        }
    }

    async fn extract(&self, request: &ExtractRequest) -> crate::Result<BackendReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::fs::create_dir_all(&request.output_dir)?;
        let stem = request
            .primary()
            .file_stem()
            .unwrap()
            .to_string_lossy()
            .into_owned();
        let out = request.output_dir.join(format!("{}.txt", stem));
        std::fs::write(&out, b"content")?;
        Ok(BackendReport::success("ok", vec![out]))
    }
}

fn config(input: &Path) -> Config {
    let mut config = Config::new(input);
    config.workers = 1;
    config.tools.search_path = false;
    config.monitor = MonitorConfig {
        stuck_timeout: Duration::from_secs(10),
        no_progress_timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(50),
        cancel_grace: Duration::from_millis(200),
    };
    config
}

fn orchestrator(config: Config, backend: Arc<CountingBackend>) -> Orchestrator {
    let mut backends = BackendRegistry::new();
    backends.register(backend);
    Orchestrator::with_parts(config, backends, RepairRegistry::new()).unwrap()
}

#[tokio::test]
async fn missing_input_is_fatal() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(CountingBackend::default());
    let orch = orchestrator(config(&dir.path().join("nope")), backend);

    let err = orch.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, Error::InputMissing(_)));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn invalid_config_is_rejected_up_front() {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path());
    config.workers = 0;
    let result = Orchestrator::with_parts(config, BackendRegistry::new(), RepairRegistry::new());
    assert!(matches!(result, Err(Error::Config { .. })));
}

#[tokio::test]
async fn corrupt_ledger_aborts_before_any_extraction() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.zip"), b"PK\x03\x04").unwrap();
    std::fs::write(dir.path().join("extraction_state.json"), b"not json").unwrap();
    let backend = Arc::new(CountingBackend::default());
    let orch = orchestrator(config(dir.path()), backend.clone());

    let err = orch.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, Error::Ledger(LedgerError::Parse { .. })));
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    assert!(dir.path().join("a.zip").exists());
}

#[tokio::test]
async fn incomplete_set_fails_without_backend_call() {
    let dir = TempDir::new().unwrap();
    for i in [1, 2, 4] {
        std::fs::write(dir.path().join(format!("movie.part{}.rar", i)), b"Rar!").unwrap();
    }
    let backend = Arc::new(CountingBackend::default());
    let orch = orchestrator(config(dir.path()), backend.clone());

    let summary = orch.run(CancellationToken::new()).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    assert!(summary.jobs[0].detail.as_ref().unwrap().contains("missing part"));
    assert!(dir.path().join("failed/movie.part4.rar").exists());
}

#[tokio::test]
async fn incomplete_set_gets_partial_recovery_in_aggressive_mode() {
    let dir = TempDir::new().unwrap();
    for i in [1, 2, 4] {
        std::fs::write(dir.path().join(format!("movie.part{}.rar", i)), b"Rar!").unwrap();
    }
    let backend = Arc::new(CountingBackend::default());
    let mut config = config(dir.path());
    config.mode = Mode::Aggressive;
    let orch = orchestrator(config, backend.clone());

    let summary = orch.run(CancellationToken::new()).await.unwrap();
    assert_eq!(summary.success, 1);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    let attempts = &summary.jobs[0].attempts;
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].strategy, crate::types::StrategyKind::Partial);
}

#[tokio::test]
async fn pending_nested_jobs_resume() {
    let dir = TempDir::new().unwrap();
    let inner = dir.path().join("output/sub/inner.zip");
    std::fs::create_dir_all(inner.parent().unwrap()).unwrap();
    std::fs::write(&inner, b"PK\x03\x04").unwrap();

    let parent = JobId("parent".into());
    let child_id = JobId::for_nested(&parent, 1, &inner);
    {
        let state = StateManager::load(dir.path().join("extraction_state.json"))
            .await
            .unwrap();
        let child = ArchiveJob::new(
            child_id.clone(),
            vec![inner.clone()],
            ArchiveFormat::Zip,
            VolumeScheme::Single,
            Vec::new(),
        )
        .nested_under(&parent, 1, PathBuf::from("sub"));
        // Interrupted mid-run: the next load resets it to pending.
        state
            .record_transition(&child, JobStatus::InProgress, None)
            .await
            .unwrap();
    }

    let backend = Arc::new(CountingBackend::default());
    let orch = orchestrator(config(dir.path()), backend.clone());
    let summary = orch.run(CancellationToken::new()).await.unwrap();

    assert_eq!(summary.success, 1);
    assert_eq!(summary.jobs[0].id, child_id);
    assert_eq!(summary.jobs[0].depth, 1);
    assert!(dir.path().join("output/sub/inner.txt").exists());
    assert!(dir.path().join("extracted/output/sub/inner.zip").exists());
}

#[tokio::test]
async fn cancelled_run_leaves_jobs_for_next_time() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.zip"), b"PK\x03\x04").unwrap();
    let backend = Arc::new(CountingBackend::default());
    let orch = orchestrator(config(dir.path()), backend.clone());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let summary = orch.run(cancel).await.unwrap();

    assert!(summary.interrupted);
    assert_eq!(summary.processed(), 0);
    assert!(dir.path().join("a.zip").exists());
}

#[test]
fn chain_follows_mode() {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path());
    config.mode = Mode::Conservative;
    let orch = orchestrator(config, Arc::new(CountingBackend::default()));
    assert_eq!(orch.chain(), vec![Strategy::Basic, Strategy::Multipart]);
}
