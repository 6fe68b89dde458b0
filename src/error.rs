//! Error types for extractall
//!
//! Errors are split by blast radius:
//! - [`ExtractError`] describes a single extraction attempt going wrong. These never
//!   escape the strategy chain; they are folded into a [`StrategyResult`](crate::types::StrategyResult).
//! - [`LedgerError`] and the layout/input variants of [`Error`] are fatal for the whole run.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for extractall operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for extractall
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_depth")
        key: Option<String>,
    },

    /// The input directory does not exist or is not a directory
    #[error("input directory not found: {0}")]
    InputMissing(PathBuf),

    /// A terminal or scratch directory could not be established
    #[error("cannot establish directory {path}: {reason}")]
    Layout {
        /// The directory that could not be created
        path: PathBuf,
        /// Underlying reason
        reason: String,
    },

    /// Resume ledger could not be read or written
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Extraction-level error (wrong password, corrupt archive, move failure, etc.)
    #[error("extraction error: {0}")]
    Extract(#[from] ExtractError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// External tool execution failed (7z, unrar, zip, etc.)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Operation not supported (missing binary, format without backend, etc.)
    #[error("not supported: {0}")]
    NotSupported(String),

    /// The run was cancelled (signal or fatal error elsewhere)
    #[error("run cancelled")]
    Cancelled,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error must abort the entire run.
    ///
    /// Everything that threatens the ledger or the terminal directory layout is fatal;
    /// anything scoped to one archive is not.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Config { .. } => true,
            Error::InputMissing(_) => true,
            Error::Layout { .. } => true,
            Error::Ledger(_) => true,
            Error::Cancelled => true,
            Error::Extract(ExtractError::MoveFailed { .. }) => true,
            Error::Extract(ExtractError::FileCollision { .. }) => true,
            Error::Extract(_) => false,
            Error::Io(_) => false,
            Error::Serialization(_) => false,
            Error::ExternalTool(_) => false,
            Error::NotSupported(_) => false,
            Error::Other(_) => false,
        }
    }

    /// Shorthand for a configuration error on a specific key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

/// Ledger (persisted resume state) errors
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The ledger file exists but could not be read
    #[error("failed to read ledger {path}: {reason}")]
    Read {
        /// Ledger path
        path: PathBuf,
        /// Underlying reason
        reason: String,
    },

    /// The ledger file is not valid ledger JSON
    #[error("ledger {path} is corrupt: {reason}")]
    Parse {
        /// Ledger path
        path: PathBuf,
        /// Underlying reason
        reason: String,
    },

    /// The ledger could not be durably replaced
    #[error("failed to write ledger {path}: {reason}")]
    Write {
        /// Ledger path
        path: PathBuf,
        /// Underlying reason
        reason: String,
    },

    /// The ledger was written by an incompatible version
    #[error("ledger {path} has unsupported version {version}")]
    UnsupportedVersion {
        /// Ledger path
        path: PathBuf,
        /// The version found in the file
        version: u32,
    },
}

/// Errors raised while extracting or relocating a single archive
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Archive extraction failed
    #[error("extraction failed for {archive}: {reason}")]
    ExtractionFailed {
        /// The archive file that failed to extract
        archive: PathBuf,
        /// The reason extraction failed
        reason: String,
    },

    /// Wrong password for encrypted archive
    #[error("wrong password for encrypted archive {archive}")]
    WrongPassword {
        /// The encrypted archive that could not be opened
        archive: PathBuf,
    },

    /// All passwords failed for archive extraction
    #[error("all {count} passwords failed for archive {archive}")]
    AllPasswordsFailed {
        /// The encrypted archive that could not be opened
        archive: PathBuf,
        /// The number of passwords that were tried
        count: usize,
    },

    /// No passwords available for encrypted archive
    #[error("no passwords available for encrypted archive {archive}")]
    NoPasswordsAvailable {
        /// The encrypted archive that requires a password
        archive: PathBuf,
    },

    /// The backend does not support the requested operation
    #[error("unsupported operation for {archive}: {reason}")]
    Unsupported {
        /// The archive the operation was requested for
        archive: PathBuf,
        /// What was unsupported
        reason: String,
    },

    /// The attempt was cancelled by the progress monitor
    #[error("extraction of {archive} was cancelled")]
    Cancelled {
        /// The archive whose extraction was cancelled
        archive: PathBuf,
    },

    /// File move/rename failed
    #[error("failed to move {source_path} to {dest_path}: {reason}")]
    MoveFailed {
        /// The source path of the file being moved
        source_path: PathBuf,
        /// The destination path where the file should be moved
        dest_path: PathBuf,
        /// The reason the move failed
        reason: String,
    },

    /// No free name could be found at the destination
    #[error("file collision at {path}: {reason}")]
    FileCollision {
        /// The path where the collision occurred
        path: PathBuf,
        /// The reason for the collision
        reason: String,
    },

    /// Invalid path encountered while placing files
    #[error("invalid path {path}: {reason}")]
    InvalidPath {
        /// The invalid path that was encountered
        path: PathBuf,
        /// The reason the path is invalid
        reason: String,
    },
}

impl ExtractError {
    /// Whether this error means the archive needs a password we do not have
    pub fn is_password_problem(&self) -> bool {
        matches!(
            self,
            ExtractError::WrongPassword { .. }
                | ExtractError::AllPasswordsFailed { .. }
                | ExtractError::NoPasswordsAvailable { .. }
        )
    }
}
