use crate::backend::{ExtractMode, clear_dir};
use crate::detection::deep_sniff;
use crate::types::{ArchiveJob, Outcome, StrategyResult};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::staging::stage_parts;
use super::{Attempt, StrategyContext, invoke, is_encoding_problem, most_telling};

pub(super) async fn basic(
    ctx: &StrategyContext,
    job: &ArchiveJob,
    attempt: &Attempt,
) -> StrategyResult {
    if job.is_multipart() {
        return StrategyResult::unsupported("multipart set needs the multipart strategy");
    }
    let Some(backend) = ctx.backends.preferred(job.format()) else {
        return StrategyResult::unsupported(format!("no backend for {}", job.format()));
    };
    invoke(
        ctx,
        backend.as_ref(),
        vec![job.primary().to_path_buf()],
        job.format(),
        attempt,
        ExtractMode::Normal,
        None,
    )
    .await
}

pub(super) async fn multipart(
    ctx: &StrategyContext,
    job: &ArchiveJob,
    attempt: &Attempt,
) -> StrategyResult {
    if !job.is_multipart() {
        return StrategyResult::unsupported("not a multipart set");
    }
    if !job.is_complete() {
        return StrategyResult::failure(
            Outcome::MissingParts,
            format!("missing part index(es) {:?}", job.missing_parts()),
        );
    }

    let staging_dir = attempt.work_dir.join("staged");
    let staged = match stage_parts(job, &staging_dir, &attempt.cancel, false).await {
        Ok(staged) => staged,
        Err(e) => return staging_failed(e),
    };

    let backend = if staged.len() > 1 {
        ctx.backends
            .for_format(job.format())
            .into_iter()
            .find(|b| b.capabilities().multipart)
    } else {
        ctx.backends.preferred(job.format())
    };
    let Some(backend) = backend else {
        return StrategyResult::unsupported(format!(
            "no volume-aware backend for {}",
            job.format()
        ));
    };

    invoke(
        ctx,
        backend.as_ref(),
        staged,
        job.format(),
        attempt,
        ExtractMode::Normal,
        None,
    )
    .await
}

pub(super) async fn multi_tool(
    ctx: &StrategyContext,
    job: &ArchiveJob,
    attempt: &Attempt,
) -> StrategyResult {
    let parts = match job_parts(job, attempt).await {
        Ok(parts) => parts,
        Err(result) => return result,
    };

    let candidates: Vec<_> = ctx
        .backends
        .for_format(job.format())
        .into_iter()
        .filter(|b| parts.len() == 1 || b.capabilities().multipart)
        .collect();
    if candidates.len() < 2 {
        return StrategyResult::unsupported(format!(
            "only {} backend(s) for {}",
            candidates.len(),
            job.format()
        ));
    }

    let mut failures = Vec::new();
    for backend in candidates {
        let result = invoke(
            ctx,
            backend.as_ref(),
            parts.clone(),
            job.format(),
            attempt,
            ExtractMode::Normal,
            None,
        )
        .await;
        if result.is_success() || result.outcome == Outcome::Timeout {
            return result;
        }
        debug!(
            job_id = %job.id(),
            backend = backend.name(),
            outcome = %result.outcome,
            "backend failed, trying next"
        );
        failures.push(result);
        if !discard_output(job, attempt) {
            break;
        }
    }
    most_telling(failures)
}

pub(super) async fn repair(
    ctx: &StrategyContext,
    job: &ArchiveJob,
    attempt: &Attempt,
) -> StrategyResult {
    if job.is_multipart() {
        return StrategyResult::unsupported("repair handles single-file archives only");
    }
    let Some(tool) = ctx.repairers.for_format(job.format()) else {
        return StrategyResult::unsupported(format!("no repair tool for {}", job.format()));
    };
    let Some(backend) = ctx.backends.preferred(job.format()) else {
        return StrategyResult::unsupported(format!("no backend for {}", job.format()));
    };

    let repair_dir = attempt.work_dir.join("repair");
    if let Err(e) = tokio::fs::create_dir_all(&repair_dir).await {
        return StrategyResult::unsupported(format!("cannot create repair directory: {}", e));
    }
    // Copy, never link: the tool may rewrite its input in place.
    let name = job
        .primary()
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| "archive".into());
    let copy = repair_dir.join(name);
    if let Err(e) = tokio::fs::copy(job.primary(), &copy).await {
        return StrategyResult::unsupported(format!("cannot copy archive for repair: {}", e));
    }

    let repaired = match tool.repair(&copy, &repair_dir, &attempt.cancel).await {
        Ok(repaired) => repaired,
        Err(crate::Error::Cancelled) => {
            return StrategyResult::failure(
                Outcome::Timeout,
                "repair cancelled by progress monitor",
            );
        }
        Err(e) => {
            warn!(job_id = %job.id(), tool = tool.name(), error = %e, "repair failed");
            return StrategyResult::failure(
                Outcome::Corrupt,
                format!("{} failed: {}", tool.name(), e),
            );
        }
    };
    info!(
        job_id = %job.id(),
        tool = tool.name(),
        "archive repaired, extracting repaired copy"
    );

    let mut result = invoke(
        ctx,
        backend.as_ref(),
        vec![repaired],
        job.format(),
        attempt,
        ExtractMode::Normal,
        None,
    )
    .await;
    result.detail = format!("after {}: {}", tool.name(), result.detail);
    result
}

pub(super) async fn partial(
    ctx: &StrategyContext,
    job: &ArchiveJob,
    attempt: &Attempt,
) -> StrategyResult {
    let parts = if job.is_multipart() {
        let staging_dir = attempt.work_dir.join("staged");
        match stage_parts(job, &staging_dir, &attempt.cancel, true).await {
            Ok(parts) if !parts.is_empty() => parts,
            Ok(_) => {
                return StrategyResult::failure(
                    Outcome::MissingParts,
                    "first volume is missing, nothing to recover from",
                );
            }
            Err(e) => return staging_failed(e),
        }
    } else {
        vec![job.primary().to_path_buf()]
    };

    let candidates: Vec<_> = ctx
        .backends
        .for_format(job.format())
        .into_iter()
        .filter(|b| b.capabilities().partial)
        .filter(|b| parts.len() == 1 || b.capabilities().multipart)
        .collect();
    if candidates.is_empty() {
        return StrategyResult::unsupported(format!(
            "no backend can partially extract {}",
            job.format()
        ));
    }

    let mut failures = Vec::new();
    for backend in candidates {
        let result = invoke(
            ctx,
            backend.as_ref(),
            parts.clone(),
            job.format(),
            attempt,
            ExtractMode::Partial,
            None,
        )
        .await;
        match result.outcome {
            Outcome::Success if !result.produced.is_empty() => {
                info!(
                    job_id = %job.id(),
                    recovered = result.produced.len(),
                    "partial extraction recovered files"
                );
                return result;
            }
            Outcome::Success => failures.push(StrategyResult::failure(
                Outcome::Corrupt,
                format!("{}: nothing recoverable", backend.name()),
            )),
            Outcome::Timeout => return result,
            _ => failures.push(result),
        }
        if !discard_output(job, attempt) {
            break;
        }
    }

    // Nothing recovered is corruption, whatever the individual backends said.
    let summary = most_telling(failures);
    match summary.outcome {
        Outcome::PasswordRequired => summary,
        _ => StrategyResult::failure(Outcome::Corrupt, summary.detail),
    }
}

pub(super) async fn encoding(
    ctx: &StrategyContext,
    job: &ArchiveJob,
    attempt: &Attempt,
) -> StrategyResult {
    if !job.attempts.iter().any(|a| is_encoding_problem(&a.detail)) {
        return StrategyResult::unsupported("no filename decoding problem observed");
    }
    let candidates: Vec<_> = ctx
        .backends
        .for_format(job.format())
        .into_iter()
        .filter(|b| b.capabilities().encodings)
        .collect();
    if candidates.is_empty() || ctx.encodings.is_empty() {
        return StrategyResult::unsupported(format!(
            "no backend can override filename encoding for {}",
            job.format()
        ));
    }

    let parts = match job_parts(job, attempt).await {
        Ok(parts) => parts,
        Err(result) => return result,
    };

    let mut failures = Vec::new();
    'encodings: for enc in &ctx.encodings {
        for backend in &candidates {
            if parts.len() > 1 && !backend.capabilities().multipart {
                continue;
            }
            let result = invoke(
                ctx,
                backend.as_ref(),
                parts.clone(),
                job.format(),
                attempt,
                ExtractMode::Normal,
                Some(enc.clone()),
            )
            .await;
            if result.is_success() || result.outcome == Outcome::Timeout {
                return result;
            }
            failures.push(result);
            if !discard_output(job, attempt) {
                break 'encodings;
            }
        }
    }
    most_telling(failures)
}

pub(super) async fn alternative_format(
    ctx: &StrategyContext,
    job: &ArchiveJob,
    attempt: &Attempt,
) -> StrategyResult {
    if job.is_multipart() {
        return StrategyResult::unsupported("re-detection handles single-file archives only");
    }

    let primary = job.primary().to_path_buf();
    let sniffed = tokio::task::spawn_blocking(move || deep_sniff(&primary)).await;
    let (format, offset) = match sniffed {
        Ok(Ok(Some(found))) => found,
        Ok(Ok(None)) => return StrategyResult::unsupported("no archive signature found"),
        Ok(Err(e)) => {
            return StrategyResult::unsupported(format!("cannot read archive: {}", e));
        }
        Err(e) => {
            return StrategyResult::unsupported(format!("signature scan panicked: {}", e));
        }
    };
    if format == job.format() && offset == 0 {
        return StrategyResult::unsupported(format!(
            "content matches nominal format {}",
            format
        ));
    }
    info!(
        job_id = %job.id(),
        nominal = %job.format(),
        detected = %format,
        offset,
        "content re-detected"
    );

    let dir = attempt.work_dir.join("redetected");
    let target = dir.join(format!("archive.{}", format.as_str()));
    if let Err(e) = carve(job.primary(), &target, offset as u64).await {
        return StrategyResult::unsupported(format!("cannot stage re-detected archive: {}", e));
    }

    let candidates = ctx.backends.for_format(format);
    if candidates.is_empty() {
        return StrategyResult::unsupported(format!(
            "no backend for re-detected format {}",
            format
        ));
    }
    let mut failures = Vec::new();
    for backend in candidates {
        let result = invoke(
            ctx,
            backend.as_ref(),
            vec![target.clone()],
            format,
            attempt,
            ExtractMode::Normal,
            None,
        )
        .await;
        if result.is_success() || result.outcome == Outcome::Timeout {
            return StrategyResult {
                detail: format!("as {}: {}", format, result.detail),
                ..result
            };
        }
        failures.push(result);
        if !discard_output(job, attempt) {
            break;
        }
    }
    most_telling(failures)
}

/// Empty the attempt's output before the next backend runs
///
/// Returns `false` when debris may remain; the caller stops trying so a later success is not
/// mixed with leftovers of a failed backend.
fn discard_output(job: &ArchiveJob, attempt: &Attempt) -> bool {
    match clear_dir(&attempt.output_dir) {
        Ok(()) => true,
        Err(e) => {
            warn!(
                job_id = %job.id(),
                dir = ?attempt.output_dir,
                error = %e,
                "failed to clear output between backends"
            );
            false
        }
    }
}

/// Copy `src` from `offset` onward into `dest`
async fn carve(src: &Path, dest: &Path, offset: u64) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut input = tokio::fs::File::open(src).await?;
    input.seek(std::io::SeekFrom::Start(offset)).await?;
    let mut output = tokio::fs::File::create(dest).await?;
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = input.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        output.write_all(&buf[..n]).await?;
    }
    output.flush().await
}

/// Parts a backend should see: the primary for single files, staged parts for sets
async fn job_parts(
    job: &ArchiveJob,
    attempt: &Attempt,
) -> Result<Vec<PathBuf>, StrategyResult> {
    if !job.is_multipart() {
        return Ok(vec![job.primary().to_path_buf()]);
    }
    if !job.is_complete() {
        return Err(StrategyResult::failure(
            Outcome::MissingParts,
            format!("missing part index(es) {:?}", job.missing_parts()),
        ));
    }
    let dir = attempt.work_dir.join("staged");
    if dir.exists()
        && let Err(e) = tokio::fs::remove_dir_all(&dir).await
    {
        warn!(job_id = %job.id(), ?dir, error = %e, "failed to remove previously staged parts");
    }
    stage_parts(job, &dir, &attempt.cancel, false)
        .await
        .map_err(staging_failed)
}

fn staging_failed(e: crate::Error) -> StrategyResult {
    match e {
        crate::Error::Extract(crate::error::ExtractError::Cancelled { .. }) => {
            StrategyResult::failure(Outcome::Timeout, "staging cancelled by progress monitor")
        }
        other => StrategyResult::unsupported(format!("cannot stage parts: {}", other)),
    }
}
