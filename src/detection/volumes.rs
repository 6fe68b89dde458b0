//! Multipart naming conventions and volume index parsing.
//!
//! Recognized conventions:
//! - `archive.part1.rar`, `archive.part01.rar` (RAR new-style, first index 1)
//! - `archive.part1.7z`, `archive.part1.zip` (renamed byte split, first index 1)
//! - `archive.001.7z` (renamed byte split, first index 1)
//! - `archive.rar` + `archive.r00`, `archive.r01`, ... (RAR old-style; `.rar` is index 0,
//!   `.rNN` is index NN + 1)
//! - `archive.7z.001`, `archive.zip.001`, ... (raw byte split of a known format, first index 1)
//! - `archive.001` (raw byte split, format decided by the first part's content, first index 1)

use crate::types::ArchiveFormat;
use regex::Regex;
use std::sync::LazyLock;

// Patterns are literals; compilation cannot fail at runtime.
#[allow(clippy::expect_used)]
static PART_EXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?P<base>.+)\.part(?P<idx>\d+)\.(?P<ext>rar|7z|zip)$")
        .expect("valid volume pattern")
});

#[allow(clippy::expect_used)]
static NUMBER_EXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?P<base>.+)\.(?P<idx>\d{3})\.(?P<ext>7z|zip)$").expect("valid volume pattern")
});

#[allow(clippy::expect_used)]
static RAR_OLD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?P<base>.+)\.r(?P<idx>\d{2,3})$").expect("valid volume pattern")
});

#[allow(clippy::expect_used)]
static SPLIT_EXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?P<base>.+)\.(?P<ext>zip|7z|rar|tar|tgz|tar\.gz|tar\.bz2|tar\.xz)\.(?P<idx>\d{3,})$")
        .expect("valid volume pattern")
});

#[allow(clippy::expect_used)]
static SPLIT_BARE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<base>.+)\.(?P<idx>\d{3,})$").expect("valid volume pattern")
});

/// Part-naming family a file belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Convention {
    /// `base.partN.rar`
    RarPart,
    /// `base.partN.7z`, `base.partN.zip`
    PartSplit,
    /// `base.NNN.7z`, `base.NNN.zip`
    NumberedSplit,
    /// `base.rar` + `base.rNN`
    RarOld,
    /// `base.<archive-ext>.NNN`
    SplitExt,
    /// `base.NNN`
    SplitBare,
}

impl Convention {
    /// Index the first volume of this convention carries
    pub fn first_index(&self) -> u32 {
        match self {
            Convention::RarOld => 0,
            Convention::RarPart
            | Convention::PartSplit
            | Convention::NumberedSplit
            | Convention::SplitExt
            | Convention::SplitBare => 1,
        }
    }

    /// Whether parts are a byte-level split that must be concatenated
    pub fn is_raw_split(&self) -> bool {
        matches!(
            self,
            Convention::PartSplit
                | Convention::NumberedSplit
                | Convention::SplitExt
                | Convention::SplitBare
        )
    }
}

/// A file name decomposed into its volume identity
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VolumeName {
    /// Lowercased base name shared by every part of the set
    pub base: String,
    /// Position within the set
    pub index: u32,
    /// Naming family
    pub convention: Convention,
    /// Format implied by the name, if any (`SplitBare` has none)
    pub format: Option<ArchiveFormat>,
}

/// Parse a file name into a volume identity
///
/// Returns `None` for names that follow none of the multipart conventions. A plain
/// `archive.rar` is reported as index 0 of the old-style family; the caller decides whether
/// it stands alone.
pub fn parse_volume_name(file_name: &str) -> Option<VolumeName> {
    if let Some(caps) = PART_EXT.captures(file_name) {
        let index = caps["idx"].parse().ok()?;
        let ext = caps["ext"].to_lowercase();
        let format = super::format_from_extension(&ext);
        if format == Some(ArchiveFormat::Rar) {
            return Some(VolumeName {
                base: caps["base"].to_lowercase(),
                index,
                convention: Convention::RarPart,
                format,
            });
        }
        return Some(VolumeName {
            base: format!("{}.{}", caps["base"].to_lowercase(), ext),
            index,
            convention: Convention::PartSplit,
            format,
        });
    }

    if let Some(caps) = NUMBER_EXT.captures(file_name) {
        let index = caps["idx"].parse().ok()?;
        let ext = caps["ext"].to_lowercase();
        return Some(VolumeName {
            base: format!("{}.{}", caps["base"].to_lowercase(), ext),
            index,
            convention: Convention::NumberedSplit,
            format: super::format_from_extension(&ext),
        });
    }

    let lower = file_name.to_lowercase();
    if let Some(base) = lower.strip_suffix(".rar") {
        return Some(VolumeName {
            base: base.to_string(),
            index: 0,
            convention: Convention::RarOld,
            format: Some(ArchiveFormat::Rar),
        });
    }

    if let Some(caps) = RAR_OLD.captures(file_name) {
        let nn: u32 = caps["idx"].parse().ok()?;
        return Some(VolumeName {
            base: caps["base"].to_lowercase(),
            index: nn + 1,
            convention: Convention::RarOld,
            format: Some(ArchiveFormat::Rar),
        });
    }

    if let Some(caps) = SPLIT_EXT.captures(file_name) {
        let index = caps["idx"].parse().ok()?;
        let ext = caps["ext"].to_lowercase();
        return Some(VolumeName {
            base: format!("{}.{}", caps["base"].to_lowercase(), ext),
            index,
            convention: Convention::SplitExt,
            format: super::format_from_extension(&ext),
        });
    }

    if let Some(caps) = SPLIT_BARE.captures(file_name) {
        let index = caps["idx"].parse().ok()?;
        return Some(VolumeName {
            base: caps["base"].to_lowercase(),
            index,
            convention: Convention::SplitBare,
            format: None,
        });
    }

    None
}

/// Indices missing from a set, given the indices present and the convention's first index
///
/// A set is complete when it is contiguous from `first` to its highest present index.
pub fn missing_indices(present: &[u32], first: u32) -> Vec<u32> {
    let Some(&max) = present.iter().max() else {
        return Vec::new();
    };
    (first..=max).filter(|i| !present.contains(i)).collect()
}

/// Check if a filename is the first volume of its set
pub fn is_first_volume(file_name: &str) -> bool {
    match parse_volume_name(file_name) {
        Some(v) => v.index == v.convention.first_index(),
        None => false,
    }
}
