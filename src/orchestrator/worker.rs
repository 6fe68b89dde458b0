//! Per-job lifecycle executed by each worker

use super::RunShared;
use crate::error::Result;
use crate::strategy::{Attempt, effective_chain};
use crate::types::{ArchiveJob, AttemptRecord, JobStatus, Outcome};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Detail recorded for jobs beyond the nesting cap
pub const DEPTH_EXCEEDED: &str = "depth limit exceeded";

/// Pop and process jobs until the queue drains or the run is cancelled
pub(super) async fn run_worker(shared: Arc<RunShared>, index: usize) -> Result<()> {
    debug!(worker = index, "worker started");
    while let Some(job) = shared.queue.pop(&shared.cancel).await {
        let span = info_span!(
            "job",
            job_id = %job.id(),
            archive = %job.display_name(),
            depth = job.depth()
        );
        let result = process(&shared, job).instrument(span).await;
        shared.queue.finish();

        if let Err(e) = result {
            if e.is_fatal() {
                error!(worker = index, error = %e, "fatal error, stopping run");
                shared.cancel.cancel();
                return Err(e);
            }
            // The job stays in_progress in the ledger and is retried next run.
            error!(worker = index, error = %e, "job aborted");
        }
    }
    debug!(worker = index, "worker finished");
    Ok(())
}

/// Outcome of running a job's chain
enum ChainEnd {
    /// A strategy succeeded; its output is still in scratch
    Success(PathBuf),
    /// The chain decided a terminal status
    Terminal(JobStatus, String),
    /// The run was cancelled mid-job
    Interrupted,
}

async fn process(shared: &RunShared, mut job: ArchiveJob) -> Result<()> {
    if !shared.config.force && shared.state.is_resolved(job.id()).await {
        debug!("already resolved");
        shared.summary().skipped += 1;
        return Ok(());
    }

    if !shared.scanner.admits(&job) {
        warn!(
            max_depth = shared.scanner.max_depth(),
            "nested archive exceeds depth limit, not extracting"
        );
        let detail = Some(DEPTH_EXCEEDED.to_string());
        return finalize(shared, &mut job, JobStatus::Failed, detail, Vec::new()).await;
    }

    shared
        .state
        .record_transition(&job, JobStatus::InProgress, None)
        .await?;
    job.status = JobStatus::InProgress;
    info!(format = %job.format(), parts = job.parts().len(), "processing archive");

    // Scratch is dropped on every way out, errors included.
    let result = match run_chain(shared, &mut job).await {
        Ok(ChainEnd::Interrupted) => {
            info!("run cancelled, job left for the next run");
            Ok(())
        }
        Ok(ChainEnd::Success(scratch_out)) => {
            match shared
                .files
                .place_outputs(&scratch_out, job.output_subdir())
                .await
            {
                Ok(placed) => {
                    info!(files = placed.len(), "archive extracted");
                    finalize(shared, &mut job, JobStatus::Success, None, placed).await
                }
                Err(e) => {
                    warn!(error = %e, "placing outputs failed, partial output rolled back");
                    Err(e)
                }
            }
        }
        Ok(ChainEnd::Terminal(status, detail)) => {
            finalize(shared, &mut job, status, Some(detail), Vec::new()).await
        }
        Err(e) => Err(e),
    };
    shared.files.remove_scratch(job.id()).await;
    result
}

/// Run the job's strategies in order until one succeeds or the chain ends
async fn run_chain(shared: &RunShared, job: &mut ArchiveJob) -> Result<ChainEnd> {
    let Some(chain) = effective_chain(&shared.chain, job) else {
        let detail = format!(
            "missing part index(es) {:?} and partial recovery is not enabled",
            job.missing_parts()
        );
        warn!(%detail, "incomplete multipart set");
        return Ok(ChainEnd::Terminal(JobStatus::Failed, detail));
    };

    for strategy in chain {
        if shared.cancel.is_cancelled() {
            return Ok(ChainEnd::Interrupted);
        }

        let scratch = shared.files.scratch_for(job.id()).await?;
        let attempt = Attempt {
            output_dir: scratch.join("out"),
            work_dir: scratch.join("work"),
            cancel: shared.cancel.child_token(),
        };
        tokio::fs::create_dir_all(&attempt.output_dir).await?;
        tokio::fs::create_dir_all(&attempt.work_dir).await?;

        let result = shared
            .monitor
            .supervise(
                job.id(),
                strategy.kind(),
                &attempt,
                strategy.attempt(&shared.ctx, job, &attempt),
            )
            .await;

        if shared.cancel.is_cancelled() {
            return Ok(ChainEnd::Interrupted);
        }

        info!(
            strategy = %strategy,
            outcome = %result.outcome,
            detail = %result.detail,
            "strategy finished"
        );
        job.attempts.push(AttemptRecord {
            strategy: strategy.kind(),
            outcome: result.outcome,
            detail: result.detail.clone(),
            timestamp: Utc::now(),
        });

        match result.outcome {
            Outcome::Success => return Ok(ChainEnd::Success(attempt.output_dir)),
            Outcome::Timeout => {
                return Ok(ChainEnd::Terminal(JobStatus::Stuck, result.detail));
            }
            _ => {}
        }
    }

    Ok(exhausted(job))
}

/// Terminal status once every strategy failed
fn exhausted(job: &ArchiveJob) -> ChainEnd {
    if let Some(locked) = job
        .attempts
        .iter()
        .find(|a| a.outcome == Outcome::PasswordRequired)
    {
        return ChainEnd::Terminal(JobStatus::Locked, locked.detail.clone());
    }
    let detail = job
        .attempts
        .iter()
        .rev()
        .find(|a| a.outcome != Outcome::Unsupported)
        .or(job.attempts.last())
        .map(|a| format!("{}: {}", a.strategy, a.detail))
        .unwrap_or_else(|| "no strategy applies to this archive".to_string());
    ChainEnd::Terminal(JobStatus::Failed, detail)
}

/// Record the terminal status, relocate inputs, then queue nested discoveries
async fn finalize(
    shared: &RunShared,
    job: &mut ArchiveJob,
    status: JobStatus,
    detail: Option<String>,
    placed: Vec<PathBuf>,
) -> Result<()> {
    shared
        .state
        .record_transition(job, status, detail.as_deref())
        .await?;
    job.status = status;
    shared.files.relocate_inputs(job.parts(), status).await?;

    match &detail {
        Some(detail) => info!(%status, %detail, "job finished"),
        None => info!(%status, "job finished"),
    }
    shared.summary().record(job, status, detail);

    if status == JobStatus::Success && shared.config.nested_enabled() {
        for child in shared.scanner.scan(job, &placed) {
            // Pending first, so a crash before the child runs still finds it next time.
            shared
                .state
                .record_transition(&child, JobStatus::Pending, None)
                .await?;
            if shared.queue.push(child) {
                shared.summary().nested_discovered += 1;
            }
        }
    }
    Ok(())
}
