//! Decompression backends
//!
//! A backend turns an ordered list of part files into extracted files in an output directory.
//! In-process backends (ZIP, 7z, RAR) run on the blocking pool and check the attempt's
//! cancellation token between entries; CLI backends wrap external tools and kill the child
//! process when the token fires.

mod cli;
mod password_list;
mod rar;
mod sevenz;
mod zip;

pub use cli::{CliBackend, CliTool};
pub use password_list::PasswordList;
pub use rar::RarBackend;
pub use sevenz::SevenZipBackend;
pub use zip::ZipBackend;

use crate::config::ToolsConfig;
use crate::error::{Error, ExtractError, Result};
use crate::types::ArchiveFormat;
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::spawn_blocking;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// How much of a damaged archive the caller is willing to accept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractMode {
    /// All or nothing
    Normal,
    /// Keep going past damaged entries and keep whatever is readable
    Partial,
}

/// Everything a backend needs for one invocation
#[derive(Debug, Clone)]
pub struct ExtractRequest {
    /// Ordered part files; the first one is opened
    pub parts: Vec<PathBuf>,
    /// Directory to extract into (created if missing)
    pub output_dir: PathBuf,
    /// Format the parts are expected to hold
    pub format: ArchiveFormat,
    /// Candidate passwords in priority order
    pub passwords: Arc<PasswordList>,
    /// Normal or best-effort extraction
    pub mode: ExtractMode,
    /// Filename encoding override, for backends that support it
    pub encoding: Option<String>,
    /// Fired by the progress monitor to abort the invocation
    pub cancel: CancellationToken,
    /// Hard ceiling for the invocation
    pub timeout: Duration,
}

impl ExtractRequest {
    /// The part handed to the backend
    pub fn primary(&self) -> &Path {
        &self.parts[0]
    }
}

/// Bounded outcome of one backend invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendOutcome {
    /// Extraction finished
    Success,
    /// Encrypted and none of the candidate passwords worked
    PasswordRequired,
    /// The data is damaged
    Corrupt,
    /// The backend cannot perform this request
    UnsupportedOperation,
}

/// Outcome plus the files that were produced
#[must_use]
#[derive(Debug, Clone)]
pub struct BackendReport {
    /// What happened
    pub outcome: BackendOutcome,
    /// Human-readable detail (tool output, error text)
    pub detail: String,
    /// Files written below the output directory
    pub produced: Vec<PathBuf>,
}

impl BackendReport {
    /// Successful report
    pub fn success(detail: impl Into<String>, produced: Vec<PathBuf>) -> Self {
        Self {
            outcome: BackendOutcome::Success,
            detail: detail.into(),
            produced,
        }
    }

    /// Unsuccessful report
    pub fn failed(outcome: BackendOutcome, detail: impl Into<String>) -> Self {
        Self {
            outcome,
            detail: detail.into(),
            produced: Vec::new(),
        }
    }
}

/// Capabilities of a backend implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendCapabilities {
    /// Follows format-native volumes from the first part
    pub multipart: bool,
    /// Supports [`ExtractMode::Partial`]
    pub partial: bool,
    /// Honors [`ExtractRequest::encoding`]
    pub encodings: bool,
}

/// Trait for archive decompression
///
/// Implementations can run in-process (a Rust archive library) or wrap an external binary.
/// `Err` is reserved for infrastructure problems (binary vanished, task panicked, attempt
/// cancelled); anything the archive itself causes is reported through [`BackendReport`].
#[async_trait]
pub trait DecompressionBackend: Send + Sync {
    /// Human-readable name for logging
    fn name(&self) -> &str;

    /// Formats this backend can open
    fn formats(&self) -> &[ArchiveFormat];

    /// Query capabilities of this backend
    fn capabilities(&self) -> BackendCapabilities;

    /// Extract `request.parts` into `request.output_dir`
    async fn extract(&self, request: &ExtractRequest) -> Result<BackendReport>;

    /// Whether this backend can open `format`
    fn supports(&self, format: ArchiveFormat) -> bool {
        self.formats().contains(&format)
    }
}

/// Ordered collection of backends
///
/// Registration order is preference order: the first backend registered for a format is the
/// one [`BackendRegistry::preferred`] returns.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: Vec<Arc<dyn DecompressionBackend>>,
}

impl BackendRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register in-process backends, then every external tool that can be found
    pub fn discover(tools: &ToolsConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ZipBackend));
        registry.register(Arc::new(SevenZipBackend));
        registry.register(Arc::new(RarBackend));
        for backend in CliBackend::discover(tools) {
            info!(backend = backend.name(), "external extraction tool available");
            registry.register(Arc::new(backend));
        }
        registry
    }

    /// Append a backend (lowest preference so far)
    pub fn register(&mut self, backend: Arc<dyn DecompressionBackend>) {
        self.backends.push(backend);
    }

    /// Every backend that can open `format`, in preference order
    pub fn for_format(&self, format: ArchiveFormat) -> Vec<Arc<dyn DecompressionBackend>> {
        self.backends
            .iter()
            .filter(|b| b.supports(format))
            .cloned()
            .collect()
    }

    /// The most preferred backend for `format`
    pub fn preferred(&self, format: ArchiveFormat) -> Option<Arc<dyn DecompressionBackend>> {
        self.backends.iter().find(|b| b.supports(format)).cloned()
    }

    /// Number of registered backends
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Whether no backend is registered
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.backends.iter().map(|b| b.name()))
            .finish()
    }
}

/// Inputs shared by every password attempt of an in-process backend
#[derive(Debug, Clone)]
pub(crate) struct BlockingAttempt {
    pub archive: PathBuf,
    pub dest: PathBuf,
    pub partial: bool,
    pub cancel: CancellationToken,
}

impl BlockingAttempt {
    pub fn check_cancelled(&self) -> std::result::Result<(), ExtractError> {
        if self.cancel.is_cancelled() {
            return Err(ExtractError::Cancelled {
                archive: self.archive.clone(),
            });
        }
        Ok(())
    }
}

/// Shared implementation for in-process extraction with password attempts
///
/// Tries each password by calling `try_extract_fn` via `spawn_blocking`. A wrong password
/// clears the output directory and moves on to the next candidate; any other error ends the
/// invocation.
pub(crate) async fn extract_with_passwords_impl(
    format_name: &str,
    try_extract_fn: impl Fn(&BlockingAttempt, &str) -> std::result::Result<Vec<PathBuf>, ExtractError>
    + Send
    + 'static
    + Clone,
    request: &ExtractRequest,
) -> Result<BackendReport> {
    let archive_path = request.primary();

    if request.passwords.is_empty() {
        warn!(
            ?archive_path,
            "no passwords to try for {} extraction", format_name
        );
    }

    // An unencrypted archive still needs one pass.
    let candidates: Vec<String> = if request.passwords.is_empty() {
        vec![String::new()]
    } else {
        request.passwords.iter().cloned().collect()
    };

    let attempt = BlockingAttempt {
        archive: archive_path.to_path_buf(),
        dest: request.output_dir.clone(),
        partial: request.mode == ExtractMode::Partial,
        cancel: request.cancel.clone(),
    };

    for (i, password) in candidates.iter().enumerate() {
        debug!(
            ?archive_path,
            attempt = i + 1,
            total = candidates.len(),
            password_length = password.len(),
            "trying password {}/{}",
            i + 1,
            candidates.len()
        );

        let attempt_owned = attempt.clone();
        let password_owned = password.clone();
        let try_fn = try_extract_fn.clone();

        let result = spawn_blocking(move || try_fn(&attempt_owned, &password_owned))
            .await
            .map_err(|e| {
                Error::Extract(ExtractError::ExtractionFailed {
                    archive: archive_path.to_path_buf(),
                    reason: format!("extraction task panicked: {}", e),
                })
            })?;

        match result {
            Ok(files) => {
                if attempt.partial && files.is_empty() {
                    return Ok(BackendReport::failed(
                        BackendOutcome::Corrupt,
                        "partial extraction recovered nothing",
                    ));
                }
                info!(
                    ?archive_path,
                    attempt = i + 1,
                    extracted_count = files.len(),
                    "{} extraction successful on attempt {}/{}",
                    format_name,
                    i + 1,
                    candidates.len()
                );
                return Ok(BackendReport::success(
                    format!("{} extracted {} file(s)", format_name, files.len()),
                    files,
                ));
            }
            Err(ExtractError::WrongPassword { .. }) => {
                debug!(attempt = i + 1, "wrong password, trying next");
                clear_dir(&request.output_dir)?;
                continue;
            }
            Err(e @ ExtractError::Cancelled { .. }) => return Err(Error::Extract(e)),
            Err(ExtractError::Unsupported { reason, .. }) => {
                return Ok(BackendReport::failed(
                    BackendOutcome::UnsupportedOperation,
                    reason,
                ));
            }
            Err(e) => {
                warn!(
                    error = %e,
                    ?archive_path,
                    "{} extraction failed with non-password error", format_name
                );
                return Ok(BackendReport::failed(BackendOutcome::Corrupt, e.to_string()));
            }
        }
    }

    warn!(
        ?archive_path,
        attempted = candidates.len(),
        "all passwords failed for {} extraction",
        format_name
    );
    Ok(BackendReport::failed(
        BackendOutcome::PasswordRequired,
        ExtractError::AllPasswordsFailed {
            archive: archive_path.to_path_buf(),
            count: candidates.len(),
        }
        .to_string(),
    ))
}

/// Reject multi-part requests for backends that only open single files
pub(crate) fn single_part_only(name: &str, request: &ExtractRequest) -> Option<BackendReport> {
    (request.parts.len() > 1).then(|| {
        BackendReport::failed(
            BackendOutcome::UnsupportedOperation,
            format!("{} cannot follow {} volumes", name, request.parts.len()),
        )
    })
}

/// Strip everything but normal components from an archive entry name
///
/// Returns `None` for names with no safe component left (`..`, `/`).
pub(crate) fn sanitize_entry_path(name: &str) -> Option<PathBuf> {
    let sanitized: PathBuf = Path::new(name)
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect();
    (!sanitized.as_os_str().is_empty()).then_some(sanitized)
}

/// Every regular file below `dir`, sorted
pub fn collect_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// Remove the contents of `dir`, keeping the directory itself
pub(crate) fn clear_dir(dir: &Path) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
