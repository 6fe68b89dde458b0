//! Terminal directory layout and collision-safe file placement
//!
//! Five terminal directories live under the layout root and are created on first use:
//! `extracted/`, `output/`, `failed/`, `locked/` and `stuck/`. Per-attempt scratch space lives
//! under `.extractall-work/`, which is purged at the start of every run.
//!
//! Nothing here ever overwrites a file. A destination name is claimed with a hard link, which
//! fails atomically when the name is taken, so concurrent workers writing into the same
//! directory resolve collisions at write time without any locking between them.

use crate::error::{Error, ExtractError, Result};
use crate::state::LedgerEntry;
use crate::types::{JobId, JobStatus};
use regex::Regex;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Maximum number of ` (N)` suffixes tried before giving up
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Scratch root below the layout root
pub const WORK_DIR_NAME: &str = ".extractall-work";

#[allow(clippy::expect_used)]
static DEDUP_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+) \(\d+\)(\.[^.]*)?$").expect("valid dedup pattern"));

/// One of the fixed terminal directories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminalDir {
    /// Inputs of successful jobs
    Extracted,
    /// Extracted content
    Output,
    /// Inputs of failed jobs
    Failed,
    /// Inputs of password-protected jobs
    Locked,
    /// Inputs of jobs aborted by the progress monitor
    Stuck,
}

impl TerminalDir {
    /// Every terminal directory
    pub const ALL: [TerminalDir; 5] = [
        TerminalDir::Extracted,
        TerminalDir::Output,
        TerminalDir::Failed,
        TerminalDir::Locked,
        TerminalDir::Stuck,
    ];

    /// Directory name below the layout root
    pub fn name(&self) -> &'static str {
        match self {
            TerminalDir::Extracted => "extracted",
            TerminalDir::Output => "output",
            TerminalDir::Failed => "failed",
            TerminalDir::Locked => "locked",
            TerminalDir::Stuck => "stuck",
        }
    }

    /// Where the inputs of a job with `status` end up
    pub fn for_status(status: JobStatus) -> Option<TerminalDir> {
        match status {
            JobStatus::Success => Some(TerminalDir::Extracted),
            JobStatus::Failed => Some(TerminalDir::Failed),
            JobStatus::Locked => Some(TerminalDir::Locked),
            JobStatus::Stuck => Some(TerminalDir::Stuck),
            JobStatus::Pending | JobStatus::InProgress => None,
        }
    }
}

/// Owner of the on-disk layout of a run
#[derive(Debug, Clone)]
pub struct FileManager {
    input_dir: PathBuf,
    root: PathBuf,
}

impl FileManager {
    /// Layout rooted at `root` for inputs found under `input_dir`
    pub fn new(input_dir: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            root: root.into(),
        }
    }

    /// Layout root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a terminal directory (not created)
    pub fn dir(&self, dir: TerminalDir) -> PathBuf {
        self.root.join(dir.name())
    }

    /// Path of a terminal directory, created if missing
    pub async fn ensure(&self, dir: TerminalDir) -> Result<PathBuf> {
        let path = self.dir(dir);
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| Error::Layout {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        Ok(path)
    }

    /// Where extracted content goes
    pub fn output_root(&self) -> PathBuf {
        self.dir(TerminalDir::Output)
    }

    /// Scratch root
    pub fn work_root(&self) -> PathBuf {
        self.root.join(WORK_DIR_NAME)
    }

    /// Paths the detector must never descend into
    pub fn excluded_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = TerminalDir::ALL.iter().map(|d| self.dir(*d)).collect();
        paths.push(self.work_root());
        paths
    }

    /// Remove leftovers of earlier runs from the scratch root
    pub async fn purge_work_root(&self) -> Result<()> {
        let work = self.work_root();
        match tokio::fs::remove_dir_all(&work).await {
            Ok(()) => {
                debug!(?work, "purged scratch root");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Layout {
                path: work,
                reason: e.to_string(),
            }),
        }
    }

    /// Fresh, empty scratch directory for one attempt of `job_id`
    pub async fn scratch_for(&self, job_id: &JobId) -> Result<PathBuf> {
        let scratch = self.work_root().join(job_id.as_str());
        self.remove_scratch(job_id).await;
        tokio::fs::create_dir_all(&scratch)
            .await
            .map_err(|e| Error::Layout {
                path: scratch.clone(),
                reason: e.to_string(),
            })?;
        Ok(scratch)
    }

    /// Remove the scratch directory of `job_id`, if any
    pub async fn remove_scratch(&self, job_id: &JobId) {
        let scratch = self.work_root().join(job_id.as_str());
        if let Err(e) = tokio::fs::remove_dir_all(&scratch).await
            && e.kind() != ErrorKind::NotFound
        {
            warn!(?scratch, error = %e, "failed to remove scratch directory");
        }
    }

    /// Move `src` into `dest_dir`, adding ` (N)` before the extension until the name is free
    ///
    /// The first free name in the sequence `name.ext`, `name (1).ext`, `name (2).ext` wins,
    /// so the same starting state always yields the same name.
    pub async fn move_with_dedup(&self, src: &Path, dest_dir: &Path) -> Result<PathBuf> {
        let name = src
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ExtractError::InvalidPath {
                path: src.to_path_buf(),
                reason: "cannot move a path without file name".into(),
            })?;
        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| move_failed(src, dest_dir, e))?;

        for attempt in 0..=MAX_RENAME_ATTEMPTS {
            let candidate = dest_dir.join(dedup_name(&name, attempt));
            if claim(src, &candidate)
                .await
                .map_err(|e| move_failed(src, &candidate, e))?
            {
                if attempt > 0 {
                    debug!(?src, dest = ?candidate, "name taken, renamed");
                }
                return Ok(candidate);
            }
        }

        Err(ExtractError::FileCollision {
            path: dest_dir.join(&name),
            reason: format!(
                "could not find unique filename after {} attempts",
                MAX_RENAME_ATTEMPTS
            ),
        }
        .into())
    }

    /// Move everything below `scratch_out` into the output root, keeping relative paths
    ///
    /// `subdir` is the destination relative to the output root (empty for input archives).
    /// Returns the final path of every placed file. When a file cannot be placed, the files
    /// this call already placed are removed again before the error is returned.
    pub async fn place_outputs(&self, scratch_out: &Path, subdir: &Path) -> Result<Vec<PathBuf>> {
        let target = self.ensure(TerminalDir::Output).await?.join(subdir);
        let entries: Vec<(PathBuf, bool)> = WalkDir::new(scratch_out)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| {
                let is_dir = e.file_type().is_dir();
                (e.into_path(), is_dir)
            })
            .collect();

        let mut placed = Vec::new();
        for (path, is_dir) in entries {
            let Ok(relative) = path.strip_prefix(scratch_out) else {
                continue;
            };
            let step = if is_dir {
                // Keeps empty directories from the archive.
                tokio::fs::create_dir_all(target.join(relative))
                    .await
                    .map_err(|e| move_failed(&path, &target, e))
                    .map(|_| None)
            } else {
                let dest_dir = match relative.parent() {
                    Some(parent) => target.join(parent),
                    None => target.clone(),
                };
                self.move_with_dedup(&path, &dest_dir).await.map(Some)
            };
            match step {
                Ok(Some(dest)) => placed.push(dest),
                Ok(None) => {}
                Err(e) => {
                    unplace(&placed).await;
                    return Err(e);
                }
            }
        }
        Ok(placed)
    }

    /// Move a job's parts into the terminal directory for `status`
    ///
    /// Parts keep their directory relative to the input tree. Parts that are already gone are
    /// skipped.
    pub async fn relocate_inputs(
        &self,
        parts: &[PathBuf],
        status: JobStatus,
    ) -> Result<Vec<PathBuf>> {
        let Some(terminal) = TerminalDir::for_status(status) else {
            return Ok(Vec::new());
        };
        let base = self.ensure(terminal).await?;

        let mut moved = Vec::new();
        for part in parts {
            if !tokio::fs::try_exists(part).await.unwrap_or(false) {
                debug!(?part, "part already relocated");
                continue;
            }
            let dest_dir = match self.relative_parent(part) {
                Some(rel) => base.join(rel),
                None => base.clone(),
            };
            moved.push(self.move_with_dedup(part, &dest_dir).await?);
        }
        Ok(moved)
    }

    /// Files in `extracted/` that no success entry accounts for
    ///
    /// Matching is by file name with dedup suffixes ignored. The result is only reported;
    /// the ledger stays authoritative.
    pub fn audit(&self, successes: &[LedgerEntry]) -> Vec<PathBuf> {
        let expected: HashSet<String> = successes
            .iter()
            .flat_map(|e| e.part_paths.iter())
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect();

        let mut unaccounted = Vec::new();
        for entry in WalkDir::new(self.dir(TerminalDir::Extracted))
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let name = entry.file_name().to_string_lossy();
            if !expected.contains(name.as_ref())
                && !expected.contains(strip_dedup_suffix(&name).as_str())
            {
                warn!(
                    path = ?entry.path(),
                    "file in extracted/ has no success entry in the ledger"
                );
                unaccounted.push(entry.into_path());
            }
        }
        unaccounted
    }

    fn relative_parent(&self, part: &Path) -> Option<PathBuf> {
        let relative = part
            .strip_prefix(&self.input_dir)
            .or_else(|_| part.strip_prefix(&self.root))
            .ok()?;
        relative
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
    }
}

/// `name` with the `n`-th dedup suffix: `a.txt`, `a (1).txt`, `a (2).txt`
pub fn dedup_name(name: &str, n: u32) -> String {
    if n == 0 {
        return name.to_string();
    }
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    match path.extension() {
        Some(ext) => format!("{} ({}).{}", stem, n, ext.to_string_lossy()),
        None => format!("{} ({})", stem, n),
    }
}

/// Undo [`dedup_name`]: `a (3).txt` -> `a.txt`
pub fn strip_dedup_suffix(name: &str) -> String {
    match DEDUP_SUFFIX.captures(name) {
        Some(caps) => format!(
            "{}{}",
            &caps[1],
            caps.get(2).map(|m| m.as_str()).unwrap_or("")
        ),
        None => name.to_string(),
    }
}

/// Try to take `dest` for `src`; `Ok(false)` when the name is taken
async fn claim(src: &Path, dest: &Path) -> std::io::Result<bool> {
    match tokio::fs::hard_link(src, dest).await {
        Ok(()) => {
            tokio::fs::remove_file(src).await?;
            return Ok(true);
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
        // Cross-device or no link support: fall through to an exclusive copy.
        Err(_) => {}
    }

    let mut out = match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dest)
        .await
    {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e),
    };
    let copied = async {
        let mut input = tokio::fs::File::open(src).await?;
        tokio::io::copy(&mut input, &mut out).await?;
        out.flush().await?;
        out.sync_all().await
    }
    .await;
    if let Err(e) = copied {
        let _ = tokio::fs::remove_file(dest).await;
        return Err(e);
    }
    tokio::fs::remove_file(src).await?;
    Ok(true)
}

/// Remove files a failed placement already put in the output tree
async fn unplace(placed: &[PathBuf]) {
    for path in placed.iter().rev() {
        if let Err(e) = tokio::fs::remove_file(path).await
            && e.kind() != ErrorKind::NotFound
        {
            warn!(?path, error = %e, "failed to roll back placed output");
        }
    }
    if !placed.is_empty() {
        debug!(files = placed.len(), "rolled back partial placement");
    }
}

fn move_failed(src: &Path, dest: &Path, e: std::io::Error) -> Error {
    ExtractError::MoveFailed {
        source_path: src.to_path_buf(),
        dest_path: dest.to_path_buf(),
        reason: e.to_string(),
    }
    .into()
}
