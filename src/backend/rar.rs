use crate::error::{ExtractError, Result};
use crate::types::ArchiveFormat;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{
    BackendCapabilities, BackendReport, BlockingAttempt, DecompressionBackend, ExtractRequest,
    extract_with_passwords_impl, sanitize_entry_path,
};

/// In-process RAR backend built on the `unrar` crate
///
/// Multi-volume sets are followed by the library as long as every volume sits next to the
/// first one.
#[derive(Debug, Clone, Copy, Default)]
pub struct RarBackend;

impl RarBackend {
    fn is_password_error(error_msg: &str) -> bool {
        let lower = error_msg.to_lowercase();
        lower.contains("password") || lower.contains("encrypted") || lower.contains("bad_password")
    }

    fn convert_unrar_error(e: unrar::error::UnrarError, archive_path: &Path) -> ExtractError {
        let err_str = e.to_string();
        if Self::is_password_error(&err_str) {
            ExtractError::WrongPassword {
                archive: archive_path.to_path_buf(),
            }
        } else {
            ExtractError::ExtractionFailed {
                archive: archive_path.to_path_buf(),
                reason: err_str,
            }
        }
    }

    /// End a partial pass early, keeping what was extracted before `error`
    fn salvage(
        error: ExtractError,
        attempt: &BlockingAttempt,
        extracted: Vec<PathBuf>,
    ) -> std::result::Result<Vec<PathBuf>, ExtractError> {
        if !attempt.partial || matches!(error, ExtractError::WrongPassword { .. }) {
            return Err(error);
        }
        warn!(
            archive = ?attempt.archive,
            recovered = extracted.len(),
            error = %error,
            "stopping at damaged entry, keeping what was recovered"
        );
        Ok(extracted)
    }

    /// Try to extract a RAR archive with a single password
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
            partial = attempt.partial,
            "attempting RAR extraction"
        );

        std::fs::create_dir_all(dest_path).map_err(|e| ExtractError::ExtractionFailed {
            archive: archive_path.to_path_buf(),
            reason: format!("failed to create destination: {}", e),
        })?;

        let archive = if password.is_empty() {
            unrar::Archive::new(archive_path)
        } else {
            unrar::Archive::with_password(archive_path, password.as_bytes())
        };

        let processor = archive
            .open_for_processing()
            .map_err(|e| Self::convert_unrar_error(e, archive_path))?;

        let mut extracted_files = Vec::new();

        // Process each entry using the state machine interface
        let mut at_header = processor;
        loop {
            attempt.check_cancelled()?;

            let at_file = match at_header.read_header() {
                Ok(Some(entry_processor)) => entry_processor,
                Ok(None) => break,
                Err(e) => {
                    let error = Self::convert_unrar_error(e, archive_path);
                    return Self::salvage(error, attempt, extracted_files);
                }
            };

            let header = at_file.entry();
            let is_directory = header.is_directory();
            let Some(sanitized) = sanitize_entry_path(&header.filename.to_string_lossy()) else {
                warn!(entry = ?header.filename, "skipping entry with unsafe path");
                at_header = at_file.skip().map_err(|e| ExtractError::ExtractionFailed {
                    archive: archive_path.to_path_buf(),
                    reason: format!("failed to skip unsafe entry: {}", e),
                })?;
                continue;
            };

            let file_path = dest_path.join(&sanitized);

            if is_directory {
                at_header = at_file.skip().map_err(|e| ExtractError::ExtractionFailed {
                    archive: archive_path.to_path_buf(),
                    reason: format!("failed to skip directory: {}", e),
                })?;
                continue;
            }

            match at_file.extract_to(&file_path) {
                Ok(next) => {
                    at_header = next;
                    extracted_files.push(file_path);
                }
                Err(e) => {
                    let _ = std::fs::remove_file(&file_path);
                    let error = Self::convert_unrar_error(e, archive_path);
                    return Self::salvage(error, attempt, extracted_files);
                }
            }
        }

        Ok(extracted_files)
    }
}

#[async_trait]
impl DecompressionBackend for RarBackend {
    fn name(&self) -> &str {
        "unrar-lib"
    }

    fn formats(&self) -> &[ArchiveFormat] {
        &[ArchiveFormat::Rar]
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            multipart: true,
            partial: true,
            encodings: false,
        }
    }

    async fn extract(&self, request: &ExtractRequest) -> Result<BackendReport> {
        extract_with_passwords_impl("RAR", Self::try_extract, request).await
    }
}
