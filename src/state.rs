//! Resume ledger
//!
//! The ledger is a single JSON file mapping job identity to status, attempt history and part
//! paths. It is the only source of truth for skip decisions. Every transition rewrites the
//! whole file through a temp file in the same directory, `fsync` and rename, so a reader never
//! observes a torn ledger. Writers are serialized: the in-memory ledger stays locked until the
//! file on disk matches it.

use crate::error::{LedgerError, Result};
use crate::types::{ArchiveFormat, ArchiveJob, AttemptRecord, JobId, JobStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Current on-disk ledger version
pub const LEDGER_VERSION: u32 = 1;

/// One job's persisted record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    /// Ordered part paths at the time of the last transition
    pub part_paths: Vec<PathBuf>,
    /// Current status
    pub status: JobStatus,
    /// Detected format
    pub format: ArchiveFormat,
    /// Nesting depth (0 for input archives)
    #[serde(default)]
    pub depth: u32,
    /// Job whose output contained this one
    #[serde(default)]
    pub parent: Option<JobId>,
    /// Output location relative to the output root (nested jobs)
    #[serde(default)]
    pub output_subdir: PathBuf,
    /// Attempt history of the most recent run that touched this job
    #[serde(default)]
    pub attempts: Vec<AttemptRecord>,
    /// Detail of the last failure, if any
    #[serde(default)]
    pub last_error: Option<String>,
    /// First time the job was recorded
    pub created_at: DateTime<Utc>,
    /// Last transition
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Ledger {
    version: u32,
    #[serde(default)]
    jobs: BTreeMap<JobId, LedgerEntry>,
}

/// Counts by status, computed from the ledger on demand
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Statistics {
    /// Entries in the ledger
    pub total: usize,
    /// Waiting to be processed
    pub pending: usize,
    /// Being processed (or interrupted)
    pub in_progress: usize,
    /// Extracted
    pub success: usize,
    /// Chain exhausted or depth exceeded
    pub failed: usize,
    /// Password required
    pub locked: usize,
    /// Aborted by the progress monitor
    pub stuck: usize,
    /// Share of successes among terminal entries, in percent
    pub success_rate: f64,
}

/// Ledger export for operators
#[derive(Debug, Clone, Serialize)]
pub struct LedgerReport {
    /// When the report was computed
    pub generated_at: DateTime<Utc>,
    /// Counts by status
    pub statistics: Statistics,
    /// Every entry, keyed by job identity
    pub jobs: BTreeMap<JobId, LedgerEntry>,
}

/// Jobs split by what the run should do with them
#[derive(Debug, Default)]
pub struct Reconciled {
    /// Jobs to process in this run
    pub runnable: Vec<ArchiveJob>,
    /// Jobs the ledger already resolved, with their recorded status
    pub resolved: Vec<(ArchiveJob, JobStatus)>,
}

/// Durable, serialized access to the ledger file
#[derive(Debug)]
pub struct StateManager {
    path: PathBuf,
    ledger: Mutex<Ledger>,
}

impl StateManager {
    /// Load the ledger at `path`, or start an empty one if the file does not exist
    ///
    /// A ledger that exists but cannot be read or parsed is an error; it is never reset.
    /// Entries left `in_progress` by an interrupted run are reset to `pending` and the reset
    /// is written back before this returns.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut ledger = match tokio::fs::read(&path).await {
            Ok(bytes) => parse_ledger(&path, &bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(?path, "no ledger yet, starting empty");
                Ledger {
                    version: LEDGER_VERSION,
                    jobs: BTreeMap::new(),
                }
            }
            Err(e) => {
                return Err(LedgerError::Read {
                    path,
                    reason: e.to_string(),
                }
                .into());
            }
        };

        let mut interrupted = 0;
        let now = Utc::now();
        for (id, entry) in ledger.jobs.iter_mut() {
            if entry.status == JobStatus::InProgress {
                info!(job_id = %id, "resetting interrupted job to pending");
                entry.status = JobStatus::Pending;
                entry.updated_at = now;
                interrupted += 1;
            }
        }

        let manager = Self {
            path,
            ledger: Mutex::new(ledger),
        };
        if interrupted > 0 {
            let guard = manager.ledger.lock().await;
            manager.persist(&guard).await?;
        }
        Ok(manager)
    }

    /// Ledger file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Split detected jobs into those to run and those already resolved
    ///
    /// With `force`, resolved jobs are run again. `stuck` and `pending` jobs always run.
    pub async fn reconcile(&self, jobs: Vec<ArchiveJob>, force: bool) -> Reconciled {
        let ledger = self.ledger.lock().await;
        let mut reconciled = Reconciled::default();
        for job in jobs {
            match ledger.jobs.get(job.id()).map(|e| e.status) {
                Some(status) if status.is_resolved() && !force => {
                    debug!(job_id = %job.id(), %status, "already resolved, skipping");
                    reconciled.resolved.push((job, status));
                }
                _ => reconciled.runnable.push(job),
            }
        }
        reconciled
    }

    /// Whether the ledger holds a success, failed or locked entry for `id`
    pub async fn is_resolved(&self, id: &JobId) -> bool {
        self.ledger
            .lock()
            .await
            .jobs
            .get(id)
            .is_some_and(|e| e.status.is_resolved())
    }

    /// Recorded entry for `id`
    pub async fn entry(&self, id: &JobId) -> Option<LedgerEntry> {
        self.ledger.lock().await.jobs.get(id).cloned()
    }

    /// Record `job` in `status` and flush the whole ledger durably before returning
    ///
    /// `detail` becomes the entry's last error for anything but success.
    pub async fn record_transition(
        &self,
        job: &ArchiveJob,
        status: JobStatus,
        detail: Option<&str>,
    ) -> Result<()> {
        let mut ledger = self.ledger.lock().await;
        let now = Utc::now();
        let created_at = ledger
            .jobs
            .get(job.id())
            .map(|e| e.created_at)
            .unwrap_or(now);
        let last_error = match status {
            JobStatus::Success => None,
            _ => detail.map(str::to_string),
        };

        let previous = ledger.jobs.insert(
            job.id().clone(),
            LedgerEntry {
                part_paths: job.parts().to_vec(),
                status,
                format: job.format(),
                depth: job.depth(),
                parent: job.parent().cloned(),
                output_subdir: job.output_subdir().to_path_buf(),
                attempts: job.attempts.clone(),
                last_error,
                created_at,
                updated_at: now,
            },
        );

        if let Err(e) = self.persist(&ledger).await {
            // Keep memory consistent with disk.
            match previous {
                Some(entry) => ledger.jobs.insert(job.id().clone(), entry),
                None => ledger.jobs.remove(job.id()),
            };
            return Err(e);
        }
        debug!(job_id = %job.id(), %status, "transition recorded");
        Ok(())
    }

    /// Pending entries of nested jobs whose parts still exist
    ///
    /// These were discovered by an earlier run and are not under the scanned input tree.
    pub async fn pending_nested(&self) -> Vec<(JobId, LedgerEntry)> {
        self.ledger
            .lock()
            .await
            .jobs
            .iter()
            .filter(|(_, e)| e.status == JobStatus::Pending && e.depth > 0)
            .filter(|(_, e)| e.part_paths.iter().all(|p| p.is_file()))
            .map(|(id, e)| (id.clone(), e.clone()))
            .collect()
    }

    /// Every entry with the given status
    pub async fn entries_with_status(&self, status: JobStatus) -> Vec<(JobId, LedgerEntry)> {
        self.ledger
            .lock()
            .await
            .jobs
            .iter()
            .filter(|(_, e)| e.status == status)
            .map(|(id, e)| (id.clone(), e.clone()))
            .collect()
    }

    /// Counts by status
    pub async fn statistics(&self) -> Statistics {
        statistics_of(&self.ledger.lock().await.jobs)
    }

    /// Snapshot of the whole ledger with statistics
    pub async fn report(&self) -> LedgerReport {
        let ledger = self.ledger.lock().await;
        LedgerReport {
            generated_at: Utc::now(),
            statistics: statistics_of(&ledger.jobs),
            jobs: ledger.jobs.clone(),
        }
    }

    /// Write `ledger` to disk by atomic replace
    async fn persist(&self, ledger: &Ledger) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(ledger)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, &bytes))
            .await
            .map_err(|e| LedgerError::Write {
                path: self.path.clone(),
                reason: format!("ledger write task failed: {}", e),
            })?
    }
}

fn parse_ledger(path: &Path, bytes: &[u8]) -> Result<Ledger> {
    let ledger: Ledger = serde_json::from_slice(bytes).map_err(|e| LedgerError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    if ledger.version != LEDGER_VERSION {
        return Err(LedgerError::UnsupportedVersion {
            path: path.to_path_buf(),
            version: ledger.version,
        }
        .into());
    }
    Ok(ledger)
}

/// Temp file in the target directory, fsync, rename over the target, fsync the directory
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let fail = |reason: String| LedgerError::Write {
        path: path.to_path_buf(),
        reason,
    };
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| fail(e.to_string()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| fail(e.to_string()))?;
    tmp.write_all(bytes).map_err(|e| fail(e.to_string()))?;
    tmp.as_file().sync_all().map_err(|e| fail(e.to_string()))?;
    tmp.persist(path).map_err(|e| fail(e.error.to_string()))?;

    // Make the rename itself durable.
    if let Err(e) = std::fs::File::open(dir).and_then(|d| d.sync_all()) {
        warn!(?dir, error = %e, "failed to sync ledger directory");
    }
    Ok(())
}

fn statistics_of(jobs: &BTreeMap<JobId, LedgerEntry>) -> Statistics {
    let mut stats = Statistics {
        total: jobs.len(),
        ..Default::default()
    };
    for entry in jobs.values() {
        match entry.status {
            JobStatus::Pending => stats.pending += 1,
            JobStatus::InProgress => stats.in_progress += 1,
            JobStatus::Success => stats.success += 1,
            JobStatus::Failed => stats.failed += 1,
            JobStatus::Locked => stats.locked += 1,
            JobStatus::Stuck => stats.stuck += 1,
        }
    }
    let terminal = stats.success + stats.failed + stats.locked + stats.stuck;
    if terminal > 0 {
        stats.success_rate = (stats.success as f64 / terminal as f64 * 10000.0).round() / 100.0;
    }
    stats
}
