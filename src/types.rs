//! Core types for extractall

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Number of hex characters kept from the identity digest
const JOB_ID_LEN: usize = 24;

/// Unique, restart-stable identifier for a job
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Identity of a top-level job, derived from its canonical primary path
    pub fn for_primary(canonical_primary: &Path) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(canonical_primary.to_string_lossy().as_bytes());
        Self::from_digest(hasher)
    }

    /// Identity of a job discovered inside another job's output
    ///
    /// The parent id and depth take part in the digest so that a path reused by a
    /// later, unrelated extraction does not alias an earlier ledger entry.
    pub fn for_nested(parent: &JobId, depth: u32, canonical_primary: &Path) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(parent.0.as_bytes());
        hasher.update(depth.to_le_bytes());
        hasher.update(canonical_primary.to_string_lossy().as_bytes());
        Self::from_digest(hasher)
    }

    fn from_digest(hasher: Sha256) -> Self {
        let hex: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        Self(hex[..JOB_ID_LEN].to_string())
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Extraction mode, selecting the strategy chain and nested rescanning
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Plain extraction only
    Conservative,
    /// Plain extraction plus alternative tools and filename encodings (default)
    #[default]
    Standard,
    /// Every strategy plus nested archive rescanning
    Aggressive,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Mode::Conservative => "conservative",
            Mode::Standard => "standard",
            Mode::Aggressive => "aggressive",
        };
        f.write_str(s)
    }
}

/// Detected archive format
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArchiveFormat {
    /// ZIP (also .cbz)
    #[serde(rename = "zip")]
    Zip,
    /// RAR v4/v5 (also .cbr)
    #[serde(rename = "rar")]
    Rar,
    /// 7-Zip
    #[serde(rename = "7z")]
    SevenZip,
    /// Uncompressed tar
    #[serde(rename = "tar")]
    Tar,
    /// gzip-compressed tar
    #[serde(rename = "tar.gz")]
    TarGz,
    /// bzip2-compressed tar
    #[serde(rename = "tar.bz2")]
    TarBz2,
    /// xz-compressed tar
    #[serde(rename = "tar.xz")]
    TarXz,
    /// Single gzip stream
    #[serde(rename = "gz")]
    Gzip,
    /// Single bzip2 stream
    #[serde(rename = "bz2")]
    Bzip2,
    /// Single xz stream
    #[serde(rename = "xz")]
    Xz,
}

impl ArchiveFormat {
    /// Short tag used in logs and the ledger
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Rar => "rar",
            ArchiveFormat::SevenZip => "7z",
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::TarGz => "tar.gz",
            ArchiveFormat::TarBz2 => "tar.bz2",
            ArchiveFormat::TarXz => "tar.xz",
            ArchiveFormat::Gzip => "gz",
            ArchiveFormat::Bzip2 => "bz2",
            ArchiveFormat::Xz => "xz",
        }
    }

    /// Whether this is one of the tar family
    pub fn is_tar(&self) -> bool {
        matches!(
            self,
            ArchiveFormat::Tar | ArchiveFormat::TarGz | ArchiveFormat::TarBz2 | ArchiveFormat::TarXz
        )
    }
}

impl std::fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the parts of a job relate to each other on disk
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeScheme {
    /// One self-contained file
    Single,
    /// Format-native volumes (RAR .partN / .rNN); the backend follows them from the first volume
    Native,
    /// A byte-level split (.001, .002, ...); parts concatenate into the archive
    RawSplit,
}

/// Persisted lifecycle status of a job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Known, not yet attempted in this run
    Pending,
    /// A worker owns the job and is running its chain
    InProgress,
    /// Extracted
    Success,
    /// Chain exhausted, depth exceeded, or incomplete multipart set
    Failed,
    /// Encrypted and no candidate password worked
    Locked,
    /// Aborted by the progress monitor; needs operator attention
    Stuck,
}

impl JobStatus {
    /// Whether a ledger entry with this status is skipped on resume
    pub fn is_resolved(&self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failed | JobStatus::Locked
        )
    }

    /// Whether this status ends a job's lifecycle for the current run
    pub fn is_terminal(&self) -> bool {
        self.is_resolved() || *self == JobStatus::Stuck
    }

    /// Lowercase tag
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Locked => "locked",
            JobStatus::Stuck => "stuck",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one strategy attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Files were produced
    Success,
    /// Encrypted and no candidate password worked
    PasswordRequired,
    /// The backend rejected the data as damaged
    Corrupt,
    /// This approach cannot handle the job
    Unsupported,
    /// Aborted by the progress monitor
    Timeout,
    /// The multipart set is incomplete
    MissingParts,
}

impl Outcome {
    /// Lowercase tag
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::PasswordRequired => "password_required",
            Outcome::Corrupt => "corrupt",
            Outcome::Unsupported => "unsupported",
            Outcome::Timeout => "timeout",
            Outcome::MissingParts => "missing_parts",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform result every strategy reports
#[must_use]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StrategyResult {
    /// What happened
    pub outcome: Outcome,
    /// Human-readable detail
    pub detail: String,
    /// Files produced (only meaningful on success)
    pub produced: Vec<PathBuf>,
}

impl StrategyResult {
    /// Successful attempt that produced `produced`
    pub fn success(detail: impl Into<String>, produced: Vec<PathBuf>) -> Self {
        Self {
            outcome: Outcome::Success,
            detail: detail.into(),
            produced,
        }
    }

    /// Unsuccessful attempt
    pub fn failure(outcome: Outcome, detail: impl Into<String>) -> Self {
        Self {
            outcome,
            detail: detail.into(),
            produced: Vec::new(),
        }
    }

    /// Shorthand for an `unsupported` result
    pub fn unsupported(detail: impl Into<String>) -> Self {
        Self::failure(Outcome::Unsupported, detail)
    }

    /// Whether the attempt succeeded
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

/// Identifies a strategy in attempt histories
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Single invocation of the preferred backend
    Basic,
    /// Repair a scratch copy, then extract it
    Repair,
    /// Stage all parts together, then extract
    Multipart,
    /// Every backend for the format in preference order
    MultiTool,
    /// Best-effort recovery from damaged archives
    Partial,
    /// Alternate filename encodings
    Encoding,
    /// Deep re-detection of misnamed archives
    AlternativeFormat,
}

impl StrategyKind {
    /// snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Basic => "basic",
            StrategyKind::Repair => "repair",
            StrategyKind::Multipart => "multipart",
            StrategyKind::MultiTool => "multi_tool",
            StrategyKind::Partial => "partial",
            StrategyKind::Encoding => "encoding",
            StrategyKind::AlternativeFormat => "alternative_format",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in a job's attempt history
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Strategy that ran
    pub strategy: StrategyKind,
    /// What it reported
    pub outcome: Outcome,
    /// Detail text
    pub detail: String,
    /// When the attempt finished
    pub timestamp: DateTime<Utc>,
}

/// One logical archive: a single file or a multipart set
///
/// The part list is fixed when the job is built; there is no way to change it afterwards.
#[derive(Clone, Debug)]
pub struct ArchiveJob {
    id: JobId,
    parts: Vec<PathBuf>,
    format: ArchiveFormat,
    volumes: VolumeScheme,
    missing: Vec<u32>,
    depth: u32,
    parent: Option<JobId>,
    output_subdir: PathBuf,
    /// Current status
    pub status: JobStatus,
    /// Attempts made in this run, in chain order
    pub attempts: Vec<AttemptRecord>,
}

impl ArchiveJob {
    /// Build a job from an ordered, non-empty part list (primary part first)
    pub fn new(
        id: JobId,
        parts: Vec<PathBuf>,
        format: ArchiveFormat,
        volumes: VolumeScheme,
        missing: Vec<u32>,
    ) -> Self {
        Self {
            id,
            parts,
            format,
            volumes,
            missing,
            depth: 0,
            parent: None,
            output_subdir: PathBuf::new(),
            status: JobStatus::Pending,
            attempts: Vec::new(),
        }
    }

    /// Mark this job as discovered inside `parent`'s output
    ///
    /// `output_subdir` is where the job's own output lands, relative to the output root.
    pub fn nested_under(mut self, parent: &JobId, depth: u32, output_subdir: PathBuf) -> Self {
        self.parent = Some(parent.clone());
        self.depth = depth;
        self.output_subdir = output_subdir;
        self
    }

    /// Job identity
    pub fn id(&self) -> &JobId {
        &self.id
    }

    /// Ordered part paths
    pub fn parts(&self) -> &[PathBuf] {
        &self.parts
    }

    /// The part a backend is pointed at
    pub fn primary(&self) -> &Path {
        &self.parts[0]
    }

    /// Detected format
    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    /// Volume layout
    pub fn volumes(&self) -> VolumeScheme {
        self.volumes
    }

    /// Whether the job spans several files
    pub fn is_multipart(&self) -> bool {
        self.volumes != VolumeScheme::Single
    }

    /// Indices missing from the part sequence (empty when complete)
    pub fn missing_parts(&self) -> &[u32] {
        &self.missing
    }

    /// Whether the part sequence is contiguous from its first index
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// Nesting depth (0 for input archives)
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Job whose output contained this one
    pub fn parent(&self) -> Option<&JobId> {
        self.parent.as_ref()
    }

    /// Output location relative to the output root
    pub fn output_subdir(&self) -> &Path {
        &self.output_subdir
    }

    /// Display name for logs
    pub fn display_name(&self) -> String {
        self.primary()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.primary().display().to_string())
    }

    /// Whether any attempt so far reported `outcome`
    pub fn saw_outcome(&self, outcome: Outcome) -> bool {
        self.attempts.iter().any(|a| a.outcome == outcome)
    }
}
