use crate::error::{ExtractError, Result};
use crate::types::ArchiveFormat;
use async_trait::async_trait;
use sevenz_rust::{Password, SevenZArchiveEntry};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{
    BackendCapabilities, BackendReport, BlockingAttempt, DecompressionBackend, ExtractRequest,
    extract_with_passwords_impl, sanitize_entry_path, single_part_only,
};

/// Marker carried through the library's error type when the attempt is cancelled
const CANCELLED_MARKER: &str = "extraction cancelled";

/// In-process 7z backend built on `sevenz-rust`
#[derive(Debug, Clone, Copy, Default)]
pub struct SevenZipBackend;

impl SevenZipBackend {
    /// Write one entry below `dest_path`, refusing names that would escape it
    fn write_entry(
        entry: &SevenZArchiveEntry,
        reader: &mut dyn Read,
        dest_path: &Path,
        produced: &mut Vec<PathBuf>,
    ) -> std::result::Result<bool, sevenz_rust::Error> {
        let io_err = |e: std::io::Error| sevenz_rust::Error::Other(e.to_string().into());

        let Some(relative) = sanitize_entry_path(entry.name()) else {
            warn!(entry = entry.name(), "skipping entry with unsafe path");
            return Ok(true);
        };
        let path = dest_path.join(relative);

        if entry.is_directory() {
            std::fs::create_dir_all(&path).map_err(io_err)?;
            return Ok(true);
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut out = std::fs::File::create(&path).map_err(io_err)?;
        if let Err(e) = std::io::copy(reader, &mut out) {
            drop(out);
            let _ = std::fs::remove_file(&path);
            return Err(io_err(e));
        }
        produced.push(path);
        Ok(true)
    }

    /// Try to extract a 7z archive with a single password
    pub(crate) fn try_extract(
        attempt: &BlockingAttempt,
        password: &str,
    ) -> std::result::Result<Vec<PathBuf>, ExtractError> {
        let archive_path = attempt.archive.as_path();
        let dest_path = attempt.dest.as_path();
        debug!(
            ?archive_path,
            password_length = password.len(),
            ?dest_path,
            "attempting 7z extraction"
        );

        std::fs::create_dir_all(dest_path).map_err(|e| ExtractError::ExtractionFailed {
            archive: archive_path.to_path_buf(),
            reason: format!("failed to create destination: {}", e),
        })?;

        let mut produced = Vec::new();
        let extract_fn = |entry: &SevenZArchiveEntry,
                          reader: &mut dyn Read,
                          _dest: &PathBuf|
         -> std::result::Result<bool, sevenz_rust::Error> {
            if attempt.cancel.is_cancelled() {
                return Err(sevenz_rust::Error::Other(CANCELLED_MARKER.into()));
            }
            Self::write_entry(entry, reader, dest_path, &mut produced)
        };

        let result = if password.is_empty() {
            sevenz_rust::decompress_file_with_extract_fn(archive_path, dest_path, extract_fn)
        } else {
            let source = std::fs::File::open(archive_path).map_err(|e| {
                ExtractError::ExtractionFailed {
                    archive: archive_path.to_path_buf(),
                    reason: format!("failed to open 7z archive: {}", e),
                }
            })?;
            sevenz_rust::decompress_with_extract_fn_and_password(
                source,
                dest_path,
                Password::from(password),
                extract_fn,
            )
        };

        match result {
            Ok(()) => Ok(produced),
            Err(e) => {
                let err_str = e.to_string();
                let lower = err_str.to_lowercase();
                if attempt.cancel.is_cancelled() || lower.contains(CANCELLED_MARKER) {
                    Err(ExtractError::Cancelled {
                        archive: archive_path.to_path_buf(),
                    })
                } else if lower.contains("password") || lower.contains("encrypted") {
                    Err(ExtractError::WrongPassword {
                        archive: archive_path.to_path_buf(),
                    })
                } else if lower.contains("unsupported") {
                    Err(ExtractError::Unsupported {
                        archive: archive_path.to_path_buf(),
                        reason: err_str,
                    })
                } else {
                    Err(ExtractError::ExtractionFailed {
                        archive: archive_path.to_path_buf(),
                        reason: format!("7z extraction failed: {}", err_str),
                    })
                }
            }
        }
    }
}

#[async_trait]
impl DecompressionBackend for SevenZipBackend {
    fn name(&self) -> &str {
        "sevenz-lib"
    }

    fn formats(&self) -> &[ArchiveFormat] {
        &[ArchiveFormat::SevenZip]
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            multipart: false,
            partial: false,
            encodings: false,
        }
    }

    async fn extract(&self, request: &ExtractRequest) -> Result<BackendReport> {
        if let Some(report) = single_part_only(self.name(), request) {
            return Ok(report);
        }
        extract_with_passwords_impl("7z", Self::try_extract, request).await
    }
}
