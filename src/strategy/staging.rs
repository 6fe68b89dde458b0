//! Staging of multipart sets into one working location

use crate::error::{ExtractError, Result};
use crate::types::{ArchiveFormat, ArchiveJob, VolumeScheme};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Place every part of `job` in `dir` and return the paths a backend should be given
///
/// Native volumes are linked (or copied) next to each other under their own names. Raw
/// splits are concatenated into a single archive. With `leading_only`, only the parts before
/// the first gap are used; a partial recovery of an incomplete set works from those.
pub async fn stage_parts(
    job: &ArchiveJob,
    dir: &Path,
    cancel: &CancellationToken,
    leading_only: bool,
) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(dir).await?;
    let parts = if leading_only {
        leading_parts(job)
    } else {
        job.parts().to_vec()
    };

    match job.volumes() {
        VolumeScheme::Single => Ok(vec![link_or_copy(job.primary(), dir).await?]),
        VolumeScheme::Native => {
            let mut staged = Vec::with_capacity(parts.len());
            for part in &parts {
                check_cancelled(job, cancel)?;
                staged.push(link_or_copy(part, dir).await?);
            }
            Ok(staged)
        }
        VolumeScheme::RawSplit => {
            let target = dir.join(joined_name(job.primary(), job.format()));
            let mut out = tokio::fs::File::create(&target).await?;
            for part in &parts {
                check_cancelled(job, cancel)?;
                let mut input = tokio::fs::File::open(part).await?;
                tokio::io::copy(&mut input, &mut out).await?;
            }
            out.flush().await?;
            debug!(parts = parts.len(), ?target, "joined raw split");
            Ok(vec![target])
        }
    }
}

/// Parts before the first missing index
fn leading_parts(job: &ArchiveJob) -> Vec<PathBuf> {
    let Some(&first_gap) = job.missing_parts().first() else {
        return job.parts().to_vec();
    };
    let names: Vec<(u32, &PathBuf)> = job
        .parts()
        .iter()
        .filter_map(|p| {
            let name = p.file_name()?.to_string_lossy().into_owned();
            let volume = crate::detection::parse_volume_name(&name)?;
            Some((volume.index, p))
        })
        .collect();
    names
        .into_iter()
        .filter(|(index, _)| *index < first_gap)
        .map(|(_, p)| p.clone())
        .collect()
}

/// Name of the archive a raw split joins into: `backup.7z.001` -> `backup.7z`,
/// `movie.part1.7z` and `movie.001.7z` -> `movie.7z`, `dump.001` (zip) -> `dump.zip`
pub fn joined_name(primary: &Path, format: ArchiveFormat) -> String {
    let name = primary
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    let stem = match name.rsplit_once('.') {
        Some((stem, idx)) if is_digits(idx) => stem.to_string(),
        Some((stem, ext)) => match stem.rsplit_once('.') {
            Some((base, idx)) if is_volume_marker(idx) => format!("{}.{}", base, ext),
            _ => name.clone(),
        },
        None => name.clone(),
    };
    if crate::detection::format_from_name(&stem) == Some(format) {
        stem
    } else {
        format!("{}.{}", stem, format.as_str())
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

/// `001` or `part1` (any case)
fn is_volume_marker(s: &str) -> bool {
    let lower = s.to_ascii_lowercase();
    is_digits(lower.strip_prefix("part").unwrap_or(&lower))
}

/// Hard-link `src` into `dir` under its own name, copying when linking is not possible
pub async fn link_or_copy(src: &Path, dir: &Path) -> Result<PathBuf> {
    let name = src.file_name().ok_or_else(|| ExtractError::InvalidPath {
        path: src.to_path_buf(),
        reason: "part has no file name".into(),
    })?;
    let dest = dir.join(name);
    if tokio::fs::hard_link(src, &dest).await.is_err() {
        tokio::fs::copy(src, &dest).await?;
    }
    Ok(dest)
}

fn check_cancelled(job: &ArchiveJob, cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(ExtractError::Cancelled {
            archive: job.primary().to_path_buf(),
        }
        .into());
    }
    Ok(())
}
