//! Extraction strategies and the per-mode strategy chain
//!
//! Every strategy honors one contract: given a job, an empty output directory and a private
//! work directory, produce files in the output directory and report a [`StrategyResult`].
//! On anything but success the output and work directories are emptied before the result is
//! returned, so the next strategy in the chain starts from a clean slate.

mod staging;
mod variants;

pub use staging::{joined_name, link_or_copy, stage_parts};

use crate::backend::{
    BackendOutcome, BackendRegistry, DecompressionBackend, ExtractMode, ExtractRequest,
    PasswordList, clear_dir,
};
use crate::config::Config;
use crate::error::{Error, ExtractError};
use crate::repair::RepairRegistry;
use crate::types::{ArchiveFormat, ArchiveJob, Mode, Outcome, StrategyKind, StrategyResult};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Shared, read-only inputs for every strategy invocation in a run
#[derive(Debug, Clone)]
pub struct StrategyContext {
    /// Decompression backends in preference order
    pub backends: BackendRegistry,
    /// Repair tools
    pub repairers: RepairRegistry,
    /// Candidate passwords
    pub passwords: Arc<PasswordList>,
    /// Encodings the encoding strategy cycles through
    pub encodings: Vec<String>,
    /// Ceiling handed to each backend invocation
    pub backend_timeout: Duration,
}

/// Where one strategy invocation may write, and how it is cancelled
#[derive(Debug, Clone)]
pub struct Attempt {
    /// Extraction target; empty on entry
    pub output_dir: PathBuf,
    /// Private scratch space for staging, repair copies and carving
    pub work_dir: PathBuf,
    /// Fired by the progress monitor
    pub cancel: CancellationToken,
}

/// One approach to extracting a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Single invocation of the preferred backend (single-part jobs)
    Basic,
    /// Repair a scratch copy, then extract it
    Repair,
    /// Stage every part together, then use a volume-aware backend
    Multipart,
    /// Every backend for the format, in preference order
    MultiTool,
    /// Best-effort recovery; success needs at least one file
    Partial,
    /// Retry with alternate filename encodings
    Encoding,
    /// Deep content re-detection for misnamed archives
    AlternativeFormat,
}

impl Strategy {
    /// Identifier used in attempt histories and logs
    pub fn kind(&self) -> StrategyKind {
        match self {
            Strategy::Basic => StrategyKind::Basic,
            Strategy::Repair => StrategyKind::Repair,
            Strategy::Multipart => StrategyKind::Multipart,
            Strategy::MultiTool => StrategyKind::MultiTool,
            Strategy::Partial => StrategyKind::Partial,
            Strategy::Encoding => StrategyKind::Encoding,
            Strategy::AlternativeFormat => StrategyKind::AlternativeFormat,
        }
    }

    /// Run this strategy once
    ///
    /// Never fails: every problem becomes an outcome. Non-success leaves the output and work
    /// directories empty.
    pub async fn attempt(
        &self,
        ctx: &StrategyContext,
        job: &ArchiveJob,
        attempt: &Attempt,
    ) -> StrategyResult {
        debug!(
            job_id = %job.id(),
            strategy = %self.kind(),
            "starting strategy"
        );

        let result = match self {
            Strategy::Basic => variants::basic(ctx, job, attempt).await,
            Strategy::Repair => variants::repair(ctx, job, attempt).await,
            Strategy::Multipart => variants::multipart(ctx, job, attempt).await,
            Strategy::MultiTool => variants::multi_tool(ctx, job, attempt).await,
            Strategy::Partial => variants::partial(ctx, job, attempt).await,
            Strategy::Encoding => variants::encoding(ctx, job, attempt).await,
            Strategy::AlternativeFormat => variants::alternative_format(ctx, job, attempt).await,
        };

        if !result.is_success() {
            for dir in [&attempt.output_dir, &attempt.work_dir] {
                if let Err(e) = clear_dir(dir) {
                    warn!(job_id = %job.id(), ?dir, error = %e, "failed to clean up after strategy");
                }
            }
        }
        result
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind())
    }
}

/// The ordered strategy chain for a configuration
///
/// - conservative: Basic, Multipart
/// - standard: Basic, Multipart, MultiTool, Repair (when enabled), Encoding
/// - aggressive: Basic, Multipart, MultiTool, Repair, Encoding, AlternativeFormat, Partial
///
/// Multipart is dropped from every mode when multipart support is off.
pub fn chain_for(config: &Config) -> Vec<Strategy> {
    let mut chain = match config.mode {
        Mode::Conservative => vec![Strategy::Basic, Strategy::Multipart],
        Mode::Standard => vec![
            Strategy::Basic,
            Strategy::Multipart,
            Strategy::MultiTool,
            Strategy::Repair,
            Strategy::Encoding,
        ],
        Mode::Aggressive => vec![
            Strategy::Basic,
            Strategy::Multipart,
            Strategy::MultiTool,
            Strategy::Repair,
            Strategy::Encoding,
            Strategy::AlternativeFormat,
            Strategy::Partial,
        ],
    };
    if !config.multipart {
        chain.retain(|s| *s != Strategy::Multipart);
    }
    if !config.repair_enabled() {
        chain.retain(|s| *s != Strategy::Repair);
    }
    chain
}

/// The strategies that actually run for `job`
///
/// An incomplete multipart set only gets the Partial strategy. `None` means the job is failed
/// without any backend call.
pub fn effective_chain(chain: &[Strategy], job: &ArchiveJob) -> Option<Vec<Strategy>> {
    if job.is_complete() {
        return Some(chain.to_vec());
    }
    chain
        .contains(&Strategy::Partial)
        .then(|| vec![Strategy::Partial])
}

/// Whether a failure detail points at filename decoding rather than archive data
pub fn is_encoding_problem(detail: &str) -> bool {
    let lower = detail.to_lowercase();
    [
        "utf-8",
        "utf8",
        "illegal byte sequence",
        "invalid encoding",
        "filename encoding",
        "mismatching local filename",
        "cannot convert",
        "invalid multibyte",
    ]
    .iter()
    .any(|needle| lower.contains(needle))
}

/// Invoke one backend and translate its report into a strategy result
pub(crate) async fn invoke(
    ctx: &StrategyContext,
    backend: &dyn DecompressionBackend,
    parts: Vec<PathBuf>,
    format: ArchiveFormat,
    attempt: &Attempt,
    mode: ExtractMode,
    encoding: Option<String>,
) -> StrategyResult {
    let request = ExtractRequest {
        parts,
        output_dir: attempt.output_dir.clone(),
        format,
        passwords: ctx.passwords.clone(),
        mode,
        encoding,
        cancel: attempt.cancel.clone(),
        timeout: ctx.backend_timeout,
    };

    match backend.extract(&request).await {
        Ok(report) => {
            let detail = format!("{}: {}", backend.name(), report.detail);
            match report.outcome {
                BackendOutcome::Success => StrategyResult::success(detail, report.produced),
                BackendOutcome::PasswordRequired => {
                    StrategyResult::failure(Outcome::PasswordRequired, detail)
                }
                BackendOutcome::Corrupt => StrategyResult::failure(Outcome::Corrupt, detail),
                BackendOutcome::UnsupportedOperation => StrategyResult::unsupported(detail),
            }
        }
        Err(Error::Extract(ExtractError::Cancelled { .. })) | Err(Error::Cancelled) => {
            StrategyResult::failure(
                Outcome::Timeout,
                format!("{}: cancelled by progress monitor", backend.name()),
            )
        }
        Err(e) => StrategyResult::unsupported(format!("{} unavailable: {}", backend.name(), e)),
    }
}

/// Pick the most telling failure out of several backend results
///
/// Password problems win over corruption, corruption over unsupported.
pub(crate) fn most_telling(results: Vec<StrategyResult>) -> StrategyResult {
    let rank = |o: Outcome| match o {
        Outcome::Success => 5,
        Outcome::Timeout => 4,
        Outcome::PasswordRequired => 3,
        Outcome::Corrupt => 2,
        Outcome::MissingParts => 1,
        Outcome::Unsupported => 0,
    };
    let details: Vec<String> = results.iter().map(|r| r.detail.clone()).collect();
    match results.into_iter().max_by_key(|r| rank(r.outcome)) {
        Some(best) => StrategyResult::failure(best.outcome, details.join("; ")),
        None => StrategyResult::unsupported("no backend available"),
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
