//! Run orchestration
//!
//! A run goes through these steps:
//!
//! 1. Establish the layout, purge leftover scratch space and load the ledger.
//! 2. Detect archives under the input directory and reconcile them against the ledger.
//!    Resolved jobs are skipped; their parts are relocated if an earlier run recorded the
//!    outcome but crashed before moving them.
//! 3. Re-queue nested jobs the ledger still lists as pending.
//! 4. Let a fixed pool of workers drain the queue. A worker owns each job it pops for the whole
//!    strategy chain, and nested discoveries are pushed back onto the same queue.

mod queue;
mod summary;
mod worker;

pub use queue::JobQueue;
pub use summary::{JobHistory, RunSummary};
pub use worker::DEPTH_EXCEEDED;

use crate::backend::{BackendRegistry, PasswordList};
use crate::config::Config;
use crate::detection::{Detector, group_files};
use crate::error::{Error, Result};
use crate::files::FileManager;
use crate::monitor::ProgressMonitor;
use crate::repair::RepairRegistry;
use crate::scanner::NestedScanner;
use crate::state::StateManager;
use crate::strategy::{Strategy, StrategyContext, chain_for};
use crate::types::{ArchiveJob, JobId, JobStatus};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

/// Everything the workers of one run share
pub(crate) struct RunShared {
    config: Arc<Config>,
    ctx: StrategyContext,
    chain: Vec<Strategy>,
    monitor: ProgressMonitor,
    scanner: NestedScanner,
    files: FileManager,
    state: StateManager,
    queue: JobQueue,
    summary: Mutex<RunSummary>,
    cancel: CancellationToken,
}

impl RunShared {
    fn summary(&self) -> MutexGuard<'_, RunSummary> {
        self.summary
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Bulk extraction engine
#[derive(Debug)]
pub struct Orchestrator {
    config: Arc<Config>,
    backends: BackendRegistry,
    repairers: RepairRegistry,
}

impl Orchestrator {
    /// Orchestrator using every backend and repair tool that can be found
    pub fn new(config: Config) -> Result<Self> {
        let backends = BackendRegistry::discover(&config.tools);
        let repairers = RepairRegistry::discover(&config.tools);
        Self::with_parts(config, backends, repairers)
    }

    /// Orchestrator with explicit backend and repair registries
    pub fn with_parts(
        config: Config,
        backends: BackendRegistry,
        repairers: RepairRegistry,
    ) -> Result<Self> {
        config.validate()?;
        info!(backends = ?backends, repairers = ?repairers, "extraction backends");
        Ok(Self {
            config: Arc::new(config),
            backends,
            repairers,
        })
    }

    /// Configuration of this orchestrator
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Strategy chain every complete job goes through
    pub fn chain(&self) -> Vec<Strategy> {
        chain_for(&self.config)
    }

    /// Process the input directory until the queue drains or `cancel` fires
    ///
    /// Per-job failures never fail the run; only layout and ledger problems do. When `cancel`
    /// fires, in-flight jobs stay `in_progress` in the ledger and the summary is marked
    /// interrupted.
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunSummary> {
        let span = info_span!(
            "run",
            input = %self.config.input_dir.display(),
            mode = %self.config.mode
        );
        self.run_inner(cancel).instrument(span).await
    }

    async fn run_inner(&self, cancel: CancellationToken) -> Result<RunSummary> {
        let config = &self.config;
        if !tokio::fs::metadata(&config.input_dir)
            .await
            .is_ok_and(|m| m.is_dir())
        {
            return Err(Error::InputMissing(config.input_dir.clone()));
        }

        let root = config.layout_root();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| Error::Layout {
                path: root.clone(),
                reason: e.to_string(),
            })?;
        let files = FileManager::new(&config.input_dir, &root);
        files.purge_work_root().await?;

        let state = StateManager::load(config.state_file()).await?;
        let passwords = PasswordList::collect(&config.tools).await;
        let chain = chain_for(config);
        info!(
            chain = ?chain.iter().map(|s| s.kind().as_str()).collect::<Vec<_>>(),
            passwords = passwords.len(),
            workers = config.workers,
            "starting run"
        );

        let mut excluded = files.excluded_paths();
        excluded.push(config.state_file());
        let input_dir = config.input_dir.clone();
        let detected = tokio::task::spawn_blocking(move || Detector::new(excluded).scan(&input_dir))
            .await
            .map_err(|e| Error::Other(format!("archive scan failed: {}", e)))?;
        let jobs: Vec<ArchiveJob> = detected
            .into_iter()
            .map(|archive| {
                let id = JobId::for_primary(&archive.canonical_primary());
                archive.into_job(id)
            })
            .collect();
        info!(archives = jobs.len(), "detection finished");

        let mut summary = RunSummary::default();
        let reconciled = state.reconcile(jobs, config.force).await;
        summary.skipped = reconciled.resolved.len();
        for (job, status) in &reconciled.resolved {
            // Recorded before a crash, never moved.
            let moved = files.relocate_inputs(job.parts(), *status).await?;
            if !moved.is_empty() {
                info!(job_id = %job.id(), %status, "relocated parts of resolved job");
            }
        }

        let successes: Vec<_> = state
            .entries_with_status(JobStatus::Success)
            .await
            .into_iter()
            .map(|(_, entry)| entry)
            .collect();
        summary.discrepancies = files.audit(&successes).len();
        if summary.discrepancies > 0 {
            warn!(
                count = summary.discrepancies,
                "extracted/ holds files the ledger does not account for; the ledger wins"
            );
        }

        let queue = JobQueue::new();
        for job in reconciled.runnable {
            queue.push(job);
        }
        for job in resume_nested(&state).await {
            info!(job_id = %job.id(), depth = job.depth(), "resuming nested job");
            queue.push(job);
        }
        debug!(queued = queue.len(), "queue seeded");

        let run_cancel = cancel.child_token();
        let shared = Arc::new(RunShared {
            config: config.clone(),
            ctx: StrategyContext {
                backends: self.backends.clone(),
                repairers: self.repairers.clone(),
                passwords: Arc::new(passwords),
                encodings: config.tools.encodings.clone(),
                backend_timeout: config.monitor.stuck_timeout,
            },
            chain,
            monitor: ProgressMonitor::new(config.monitor.clone()),
            scanner: NestedScanner::new(files.output_root(), config.nested.max_depth),
            files,
            state,
            queue,
            summary: Mutex::new(summary),
            cancel: run_cancel,
        });

        let workers: Vec<_> = (0..config.workers)
            .map(|index| {
                let shared = shared.clone();
                tokio::spawn(worker::run_worker(shared, index).in_current_span())
            })
            .collect();

        let mut first_error = None;
        for joined in futures::future::join_all(workers).await {
            let result = joined.map_err(|e| Error::Other(format!("worker task failed: {}", e)));
            if let Err(e) = result.and_then(|r| r)
                && first_error.is_none()
            {
                first_error = Some(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        let mut summary = shared.summary().clone();
        summary.interrupted = cancel.is_cancelled();
        let stats = shared.state.statistics().await;
        info!(
            success = summary.success,
            failed = summary.failed,
            locked = summary.locked,
            stuck = summary.stuck,
            skipped = summary.skipped,
            nested = summary.nested_discovered,
            ledger_total = stats.total,
            "run finished"
        );
        Ok(summary)
    }
}

/// Rebuild jobs for nested entries the ledger lists as pending
async fn resume_nested(state: &StateManager) -> Vec<ArchiveJob> {
    let mut jobs = Vec::new();
    for (id, entry) in state.pending_nested().await {
        let Some(parent) = entry.parent.clone() else {
            continue;
        };
        let Some(archive) = group_files(entry.part_paths.clone()).into_iter().next() else {
            warn!(job_id = %id, "pending nested job is no longer an archive");
            continue;
        };
        jobs.push(
            archive
                .into_job(id)
                .nested_under(&parent, entry.depth, entry.output_subdir),
        );
    }
    jobs
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
