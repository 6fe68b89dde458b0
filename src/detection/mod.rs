//! Archive detection and multipart grouping
//!
//! Files are classified by extension first. Content signatures are consulted only when a file
//! has no extension or a generic one (`.bin`, `.dat`, ...), and for bare numeric splits
//! (`dump.001`) whose format is decided by the first part. Anything that matches neither is
//! left unclassified and skipped with a notice.

mod magic;
mod volumes;

pub use magic::{DEEP_SCAN_LEN, deep_sniff, sniff, sniff_file};
pub use volumes::{Convention, VolumeName, is_first_volume, missing_indices, parse_volume_name};

use crate::types::{ArchiveFormat, ArchiveJob, JobId, VolumeScheme};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Extensions too generic to trust either way; these files are sniffed
const AMBIGUOUS_EXTENSIONS: &[&str] = &["bin", "dat", "tmp", "part", "download", "arc"];

/// One logical archive found on disk, before it is given an identity
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DetectedArchive {
    /// Parts ordered by volume index, primary first
    pub parts: Vec<PathBuf>,
    /// Detected format
    pub format: ArchiveFormat,
    /// Volume layout
    pub volumes: VolumeScheme,
    /// Indices absent from the part sequence
    pub missing: Vec<u32>,
}

impl DetectedArchive {
    /// The part a backend is pointed at
    pub fn primary(&self) -> &Path {
        &self.parts[0]
    }

    /// Canonical form of the primary path, used for job identity
    pub fn canonical_primary(&self) -> PathBuf {
        std::fs::canonicalize(self.primary()).unwrap_or_else(|_| self.primary().to_path_buf())
    }

    /// Turn the detection result into a job with the given identity
    pub fn into_job(self, id: JobId) -> ArchiveJob {
        ArchiveJob::new(id, self.parts, self.format, self.volumes, self.missing)
    }
}

/// Walks a directory tree and groups archive files into logical archives
#[derive(Clone, Debug, Default)]
pub struct Detector {
    excluded: Vec<PathBuf>,
}

impl Detector {
    /// Create a detector that never descends into (or reports) the given paths
    pub fn new(excluded: Vec<PathBuf>) -> Self {
        Self { excluded }
    }

    /// Scan `root` recursively
    ///
    /// Unreadable entries are logged and skipped; they never abort the scan.
    pub fn scan(&self, root: &Path) -> Vec<DetectedArchive> {
        let files = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !self.is_excluded(entry.path()))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry during scan");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path());

        group_files(files)
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.excluded.iter().any(|x| x == path)
    }
}

/// Group a set of files into logical archives
///
/// Multipart sets are grouped per directory. The result is ordered by primary path.
pub fn group_files(files: impl IntoIterator<Item = PathBuf>) -> Vec<DetectedArchive> {
    type SetKey = (PathBuf, String, Convention);
    let mut sets: BTreeMap<SetKey, Vec<(u32, PathBuf, Option<ArchiveFormat>)>> = BTreeMap::new();
    let mut found = Vec::new();

    for path in files {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };

        if let Some(volume) = parse_volume_name(&name) {
            let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
            sets.entry((dir, volume.base, volume.convention))
                .or_default()
                .push((volume.index, path, volume.format));
            continue;
        }

        match detect_format(&path) {
            Some(format) => found.push(DetectedArchive {
                parts: vec![path],
                format,
                volumes: VolumeScheme::Single,
                missing: Vec::new(),
            }),
            None => debug!(?path, "not an archive, skipping"),
        }
    }

    for ((_, base, convention), mut members) in sets {
        members.sort_by_key(|(index, _, _)| *index);
        if let Some(archive) = assemble_set(&base, convention, members) {
            found.push(archive);
        }
    }

    found.sort_by(|a, b| a.primary().cmp(b.primary()));
    found
}

fn assemble_set(
    base: &str,
    convention: Convention,
    members: Vec<(u32, PathBuf, Option<ArchiveFormat>)>,
) -> Option<DetectedArchive> {
    let first = convention.first_index();
    if convention == Convention::NumberedSplit
        && let [(index, path, Some(format))] = members.as_slice()
        && *index != first
    {
        // `photos.123.7z` on its own is an archive with a number in its name.
        return Some(DetectedArchive {
            parts: vec![path.clone()],
            format: *format,
            volumes: VolumeScheme::Single,
            missing: Vec::new(),
        });
    }
    let indices: Vec<u32> = members.iter().map(|(i, _, _)| *i).collect();
    let missing = missing_indices(&indices, first);
    let has_first = indices.first() == Some(&first);

    let format = match convention {
        Convention::SplitBare => {
            // Only the first part of a raw split carries a header.
            let first_part = members.first().filter(|_| has_first).map(|(_, p, _)| p)?;
            match sniff_file(first_part) {
                Ok(Some(format)) => format,
                Ok(None) => {
                    debug!(?first_part, "numbered file is not an archive split, skipping");
                    return None;
                }
                Err(e) => {
                    warn!(?first_part, error = %e, "cannot read split part, skipping");
                    return None;
                }
            }
        }
        _ => members.iter().find_map(|(_, _, f)| *f)?,
    };

    let volumes = if convention.is_raw_split() {
        VolumeScheme::RawSplit
    } else if members.len() == 1 && has_first {
        VolumeScheme::Single
    } else {
        VolumeScheme::Native
    };

    if !missing.is_empty() {
        warn!(
            set = base,
            ?missing,
            "multipart set is incomplete, {} part(s) missing",
            missing.len()
        );
    }

    Some(DetectedArchive {
        parts: members.into_iter().map(|(_, p, _)| p).collect(),
        format,
        volumes,
        missing,
    })
}

/// Format implied by a file name's extension(s)
pub fn format_from_name(file_name: &str) -> Option<ArchiveFormat> {
    let lower = file_name.to_lowercase();
    for compound in ["tar.gz", "tar.bz2", "tar.xz"] {
        if lower.ends_with(&format!(".{}", compound)) {
            return format_from_extension(compound);
        }
    }
    let (_, ext) = lower.rsplit_once('.')?;
    format_from_extension(ext)
}

/// Format for a bare extension (without the leading dot)
pub fn format_from_extension(ext: &str) -> Option<ArchiveFormat> {
    match ext.to_lowercase().as_str() {
        "zip" | "cbz" => Some(ArchiveFormat::Zip),
        "rar" | "cbr" => Some(ArchiveFormat::Rar),
        "7z" => Some(ArchiveFormat::SevenZip),
        "tar" => Some(ArchiveFormat::Tar),
        "tar.gz" | "tgz" => Some(ArchiveFormat::TarGz),
        "tar.bz2" | "tbz2" | "tbz" => Some(ArchiveFormat::TarBz2),
        "tar.xz" | "txz" => Some(ArchiveFormat::TarXz),
        "gz" => Some(ArchiveFormat::Gzip),
        "bz2" => Some(ArchiveFormat::Bzip2),
        "xz" => Some(ArchiveFormat::Xz),
        _ => None,
    }
}

/// Classify a single (non-multipart) file
///
/// Extension first; content signature when the extension is absent or generic.
pub fn detect_format(path: &Path) -> Option<ArchiveFormat> {
    let name = path.file_name()?.to_string_lossy();
    if let Some(format) = format_from_name(&name) {
        return Some(format);
    }

    let sniffable = match path.extension() {
        None => true,
        Some(ext) => {
            let ext = ext.to_string_lossy().to_lowercase();
            AMBIGUOUS_EXTENSIONS.contains(&ext.as_str())
        }
    };
    if !sniffable {
        return None;
    }

    match sniff_file(path) {
        Ok(format) => format,
        Err(e) => {
            warn!(?path, error = %e, "cannot read file for signature check");
            None
        }
    }
}
