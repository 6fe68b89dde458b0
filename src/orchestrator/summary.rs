//! Per-run summary and attempt history

use crate::types::{ArchiveJob, AttemptRecord, JobId, JobStatus};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Final state of one job processed in this run
#[derive(Debug, Clone, Serialize)]
pub struct JobHistory {
    /// Job identity
    pub id: JobId,
    /// Primary part at the time the job was processed
    pub archive: PathBuf,
    /// Nesting depth
    pub depth: u32,
    /// Terminal status
    pub status: JobStatus,
    /// Reason for anything but success
    pub detail: Option<String>,
    /// Strategies tried, in order
    pub attempts: Vec<AttemptRecord>,
}

/// What a run did
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Jobs extracted
    pub success: usize,
    /// Jobs whose chain was exhausted, or that exceeded the depth cap
    pub failed: usize,
    /// Jobs that need a password
    pub locked: usize,
    /// Jobs aborted by the progress monitor
    pub stuck: usize,
    /// Jobs the ledger had already resolved
    pub skipped: usize,
    /// Nested archives found in outputs
    pub nested_discovered: usize,
    /// Files in `extracted/` the ledger does not account for
    pub discrepancies: usize,
    /// The run was stopped by a shutdown request
    pub interrupted: bool,
    /// One entry per job that reached a terminal status
    pub jobs: Vec<JobHistory>,
}

impl RunSummary {
    /// Count a terminal job
    pub fn record(&mut self, job: &ArchiveJob, status: JobStatus, detail: Option<String>) {
        match status {
            JobStatus::Success => self.success += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Locked => self.locked += 1,
            JobStatus::Stuck => self.stuck += 1,
            JobStatus::Pending | JobStatus::InProgress => return,
        }
        self.jobs.push(JobHistory {
            id: job.id().clone(),
            archive: job.primary().to_path_buf(),
            depth: job.depth(),
            status,
            detail,
            attempts: job.attempts.clone(),
        });
    }

    /// Jobs that reached a terminal status in this run
    pub fn processed(&self) -> usize {
        self.success + self.failed + self.locked + self.stuck
    }

    /// Number of jobs in `status`
    pub fn count(&self, status: JobStatus) -> usize {
        match status {
            JobStatus::Success => self.success,
            JobStatus::Failed => self.failed,
            JobStatus::Locked => self.locked,
            JobStatus::Stuck => self.stuck,
            JobStatus::Pending | JobStatus::InProgress => 0,
        }
    }

    /// Total number of strategy attempts made
    pub fn attempts(&self) -> usize {
        self.jobs.iter().map(|j| j.attempts.len()).sum()
    }

    /// Human-readable attempt history, one block per job
    pub fn history(&self) -> String {
        let mut out = String::new();
        let mut jobs: Vec<&JobHistory> = self.jobs.iter().collect();
        jobs.sort_by(|a, b| a.archive.cmp(&b.archive));
        for job in jobs {
            out.push_str(&format!(
                "{} [{}] {}",
                job.archive.display(),
                job.id,
                job.status
            ));
            if job.depth > 0 {
                out.push_str(&format!(" (depth {})", job.depth));
            }
            out.push('\n');
            if let Some(detail) = &job.detail {
                out.push_str(&format!("  reason: {}\n", detail));
            }
            for attempt in &job.attempts {
                out.push_str(&format!(
                    "  {} {:<18} {:<17} {}\n",
                    attempt.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    attempt.strategy.as_str(),
                    attempt.outcome.as_str(),
                    attempt.detail
                ));
            }
        }
        out
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "success:           {}", self.success)?;
        writeln!(f, "failed:            {}", self.failed)?;
        writeln!(f, "locked:            {}", self.locked)?;
        writeln!(f, "stuck:             {}", self.stuck)?;
        writeln!(f, "skipped:           {}", self.skipped)?;
        write!(f, "nested discovered: {}", self.nested_discovered)?;
        if self.discrepancies > 0 {
            write!(f, "\nledger discrepancies: {}", self.discrepancies)?;
        }
        if self.interrupted {
            write!(f, "\nrun interrupted; unfinished jobs resume next run")?;
        }
        Ok(())
    }
}
