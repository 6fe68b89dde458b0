//! Stall and timeout supervision of a single strategy attempt
//!
//! The monitor samples the attempt's output and work directories at a fixed interval. Two
//! triggers abort the attempt:
//!
//! - total elapsed time reaches `stuck_timeout`
//! - no growth in bytes or file count for `no_progress_timeout`
//!
//! Aborting fires the attempt's cancellation token (CLI backends kill their child process,
//! in-process backends stop at the next entry), waits `cancel_grace` for the attempt to unwind,
//! then drops it. Whatever it wrote is discarded and a `timeout` result is returned.

use crate::backend::clear_dir;
use crate::config::MonitorConfig;
use crate::strategy::Attempt;
use crate::types::{JobId, Outcome, StrategyKind, StrategyResult};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Output growth observed during one attempt
///
/// Only used for stall detection; never persisted.
#[derive(Debug, Clone, Copy)]
pub struct ProgressSample {
    /// When the attempt started
    pub started: Instant,
    /// Elapsed time at the latest sample
    pub elapsed: Duration,
    /// Bytes produced so far
    pub bytes: u64,
    /// Files produced so far
    pub files: u64,
    /// Last time bytes or files increased (attempt start if never)
    pub last_increase: Instant,
}

impl ProgressSample {
    /// Empty sample at `now`
    pub fn start(now: Instant) -> Self {
        Self {
            started: now,
            elapsed: Duration::ZERO,
            bytes: 0,
            files: 0,
            last_increase: now,
        }
    }

    /// Record a measurement, returns whether output grew
    pub fn observe(&mut self, bytes: u64, files: u64, now: Instant) -> bool {
        self.elapsed = now.duration_since(self.started);
        let grew = bytes > self.bytes || files > self.files;
        if grew {
            self.last_increase = now;
        }
        self.bytes = self.bytes.max(bytes);
        self.files = self.files.max(files);
        grew
    }

    /// Time since output last grew
    pub fn stalled_for(&self, now: Instant) -> Duration {
        now.duration_since(self.last_increase)
    }
}

/// Why an attempt was aborted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Total elapsed time reached the stuck timeout
    StuckTimeout,
    /// Output stopped growing for the no-progress timeout
    NoProgress,
}

impl Trigger {
    fn describe(&self, config: &MonitorConfig) -> String {
        match self {
            Trigger::StuckTimeout => format!(
                "attempt exceeded stuck timeout of {}s",
                config.stuck_timeout.as_secs_f64()
            ),
            Trigger::NoProgress => format!(
                "no output growth for {}s",
                config.no_progress_timeout.as_secs_f64()
            ),
        }
    }
}

/// Supervisor for strategy attempts
#[derive(Debug, Clone)]
pub struct ProgressMonitor {
    config: MonitorConfig,
}

impl ProgressMonitor {
    /// Create a monitor with the given thresholds
    pub fn new(config: MonitorConfig) -> Self {
        Self { config }
    }

    /// Which trigger, if any, fires for `sample` at `now`
    pub fn check(&self, sample: &ProgressSample, now: Instant) -> Option<Trigger> {
        if now.duration_since(sample.started) >= self.config.stuck_timeout {
            Some(Trigger::StuckTimeout)
        } else if sample.stalled_for(now) >= self.config.no_progress_timeout {
            Some(Trigger::NoProgress)
        } else {
            None
        }
    }

    /// Drive `run` to completion unless a trigger fires first
    ///
    /// `run` must be the attempt future for `attempt`; it is cancelled through
    /// `attempt.cancel` and dropped if it does not return within the grace period.
    pub async fn supervise<F>(
        &self,
        job_id: &JobId,
        strategy: StrategyKind,
        attempt: &Attempt,
        run: F,
    ) -> StrategyResult
    where
        F: Future<Output = StrategyResult>,
    {
        let mut run = Box::pin(run);
        let mut sample = ProgressSample::start(Instant::now());
        let watched = vec![attempt.output_dir.clone(), attempt.work_dir.clone()];

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        interval.tick().await;

        let trigger = loop {
            tokio::select! {
                result = &mut run => return result,
                _ = interval.tick() => {
                    let (bytes, files) = measure(watched.clone()).await;
                    let now = Instant::now();
                    if sample.observe(bytes, files, now) {
                        debug!(%job_id, %strategy, bytes, files, "attempt progressing");
                    }
                    if let Some(trigger) = self.check(&sample, now) {
                        break trigger;
                    }
                }
            }
        };

        let detail = trigger.describe(&self.config);
        warn!(
            %job_id,
            %strategy,
            ?trigger,
            elapsed_secs = sample.elapsed.as_secs(),
            bytes = sample.bytes,
            files = sample.files,
            "aborting attempt"
        );
        attempt.cancel.cancel();

        if tokio::time::timeout(self.config.cancel_grace, &mut run)
            .await
            .is_err()
        {
            warn!(%job_id, %strategy, "attempt ignored cancellation, dropping it");
        }
        drop(run);

        for dir in &watched {
            if let Err(e) = clear_dir(dir) {
                warn!(%job_id, ?dir, error = %e, "failed to discard output of aborted attempt");
            }
        }

        StrategyResult::failure(Outcome::Timeout, detail)
    }
}

/// Total bytes and file count below `dirs`
async fn measure(dirs: Vec<PathBuf>) -> (u64, u64) {
    tokio::task::spawn_blocking(move || {
        dirs.iter().fold((0, 0), |(bytes, files), dir| {
            let (b, f) = measure_dir(dir);
            (bytes + b, files + f)
        })
    })
    .await
    .unwrap_or((0, 0))
}

fn measure_dir(dir: &Path) -> (u64, u64) {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .fold((0, 0), |(bytes, files), entry| {
            let len = entry.metadata().map(|m| m.len()).unwrap_or(0);
            (bytes + len, files + 1)
        })
}
