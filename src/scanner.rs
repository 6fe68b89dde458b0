//! Rescan of a successful job's output for nested archives

use crate::detection::group_files;
use crate::types::{ArchiveJob, JobId};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Turns the files a job produced into child jobs one level deeper
#[derive(Debug, Clone)]
pub struct NestedScanner {
    output_root: PathBuf,
    max_depth: u32,
}

impl NestedScanner {
    /// Scanner for outputs placed under `output_root`, capped at `max_depth`
    pub fn new(output_root: impl Into<PathBuf>, max_depth: u32) -> Self {
        Self {
            output_root: output_root.into(),
            max_depth,
        }
    }

    /// Configured depth cap
    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Whether `job` may be extracted at its depth
    pub fn admits(&self, job: &ArchiveJob) -> bool {
        job.depth() < self.max_depth
    }

    /// Archives among `produced` (final output paths of `parent`), as child jobs
    ///
    /// Jobs beyond the depth cap are still returned so they can be classified; the worker
    /// refuses to extract them.
    pub fn scan(&self, parent: &ArchiveJob, produced: &[PathBuf]) -> Vec<ArchiveJob> {
        let depth = parent.depth() + 1;
        let jobs: Vec<ArchiveJob> = group_files(produced.iter().cloned())
            .into_iter()
            .map(|archive| {
                let id = JobId::for_nested(parent.id(), depth, &archive.canonical_primary());
                let subdir = self.subdir_of(archive.primary());
                archive.into_job(id).nested_under(parent.id(), depth, subdir)
            })
            .collect();

        if jobs.is_empty() {
            debug!(job_id = %parent.id(), "no nested archives in output");
        } else {
            info!(
                job_id = %parent.id(),
                nested = jobs.len(),
                depth,
                "found nested archives"
            );
        }
        jobs
    }

    /// Directory of `path` relative to the output root
    fn subdir_of(&self, path: &Path) -> PathBuf {
        path.parent()
            .and_then(|dir| dir.strip_prefix(&self.output_root).ok())
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }
}
