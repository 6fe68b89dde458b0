//! # extractall
//!
//! Unattended bulk extraction of large, heterogeneous and partially corrupt archive collections.
//!
//! ## Design Philosophy
//!
//! extractall is designed to be:
//! - **Safe to rerun** - A crash-safe ledger records every job; resolved archives are never
//!   extracted twice
//! - **Persistent** - Each archive goes through a chain of progressively more aggressive
//!   strategies before it is given up on
//! - **Non-destructive** - Inputs are moved, never deleted, and no output file is ever overwritten
//! - **Bounded** - A progress monitor aborts extractions that hang or stop producing output
//!
//! ## Quick Start
//!
//! ```no_run
//! use extractall::{Config, Mode, Orchestrator, run_with_shutdown};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::new("/data/archives");
//!     config.mode = Mode::Aggressive;
//!
//!     let orchestrator = Orchestrator::new(config)?;
//!     let summary = run_with_shutdown(&orchestrator).await?;
//!     println!("{}", summary);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Decompression backends
pub mod backend;
/// Configuration types
pub mod config;
/// Archive detection and multipart grouping
pub mod detection;
/// Error types
pub mod error;
/// Output layout and input relocation
pub mod files;
/// Progress monitoring of extraction attempts
pub mod monitor;
/// Run orchestration and worker pool
pub mod orchestrator;
/// Archive repair tools
pub mod repair;
/// Nested archive discovery
pub mod scanner;
/// Persistent job ledger
pub mod state;
/// Extraction strategies
pub mod strategy;
/// Core types
pub mod types;

// Re-export commonly used types
pub use backend::{BackendRegistry, DecompressionBackend, PasswordList};
pub use config::{Config, LayoutConfig, MonitorConfig, NestedConfig, ToolsConfig};
pub use error::{Error, ExtractError, LedgerError, Result};
pub use orchestrator::{JobHistory, Orchestrator, RunSummary};
pub use repair::{RepairRegistry, RepairTool};
pub use state::{LedgerReport, StateManager, Statistics};
pub use strategy::Strategy;
pub use types::{
    ArchiveFormat, ArchiveJob, AttemptRecord, JobId, JobStatus, Mode, Outcome, StrategyKind,
};

use tokio_util::sync::CancellationToken;

/// Run the orchestrator, stopping gracefully on a termination signal.
///
/// On a signal, in-flight attempts are cancelled, their jobs stay `in_progress` in the ledger
/// and resume on the next run. The returned summary is then marked interrupted.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown(orchestrator: &Orchestrator) -> Result<RunSummary> {
    let cancel = CancellationToken::new();
    let run = orchestrator.run(cancel.clone());
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => result,
        _ = wait_for_signal() => {
            tracing::info!("shutting down, waiting for workers to stop");
            cancel.cancel();
            run.await
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                ctrl_c_fallback().await;
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                ctrl_c_fallback().await;
            }
        }
    }
}

#[cfg(unix)]
async fn ctrl_c_fallback() {
    tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
    if tokio::signal::ctrl_c().await.is_err() {
        // No way to observe a shutdown request; let the run finish on its own.
        std::future::pending::<()>().await;
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
            std::future::pending::<()>().await;
        }
    }
}
