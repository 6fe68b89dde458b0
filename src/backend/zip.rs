use crate::error::{ExtractError, Result};
use crate::types::ArchiveFormat;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{
    BackendCapabilities, BackendReport, BlockingAttempt, DecompressionBackend, ExtractRequest,
    extract_with_passwords_impl, single_part_only,
};

/// In-process ZIP backend built on the `zip` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipBackend;

fn is_password_message(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    lower.contains("password") || lower.contains("encrypted")
}

impl ZipBackend {
    /// Open a ZIP entry by index, handling password decryption if needed
    fn open_zip_entry<'a>(
        archive: &'a mut zip::ZipArchive<std::fs::File>,
        index: usize,
        password: &str,
        archive_path: &Path,
    ) -> std::result::Result<zip::read::ZipFile<'a>, ExtractError> {
        let classify = |e: zip::result::ZipError| {
            let err_str = e.to_string();
            if is_password_message(&err_str) {
                ExtractError::WrongPassword {
                    archive: archive_path.to_path_buf(),
                }
            } else {
                ExtractError::ExtractionFailed {
                    archive: archive_path.to_path_buf(),
                    reason: format!("failed to read ZIP entry {}: {}", index, e),
                }
            }
        };

        if password.is_empty() {
            archive.by_index(index).map_err(classify)
        } else {
            archive
                .by_index_decrypt(index, password.as_bytes())
                .map_err(classify)?
                .map_err(|_| ExtractError::WrongPassword {
                    archive: archive_path.to_path_buf(),
                })
        }
    }

    /// Extract a single ZIP entry to disk, creating directories as needed
    fn extract_zip_entry(
        mut file: zip::read::ZipFile,
        dest_path: &Path,
        archive_path: &Path,
    ) -> std::result::Result<Option<PathBuf>, ExtractError> {
        let file_path = match file.enclosed_name() {
            Some(path) => dest_path.join(path),
            None => {
                warn!(entry = file.name(), "skipping entry with unsafe path");
                return Ok(None);
            }
        };

        let io_failure = |what: &str, e: std::io::Error| ExtractError::ExtractionFailed {
            archive: archive_path.to_path_buf(),
            reason: format!("{}: {}", what, e),
        };

        if file.is_dir() {
            std::fs::create_dir_all(&file_path)
                .map_err(|e| io_failure("failed to create directory", e))?;
            return Ok(None);
        }

        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| io_failure("failed to create parent directories", e))?;
        }

        let mut outfile = std::fs::File::create(&file_path)
            .map_err(|e| io_failure("failed to create output file", e))?;

        if let Err(e) = std::io::copy(&mut file, &mut outfile) {
            drop(outfile);
            let _ = std::fs::remove_file(&file_path);
            return Err(if is_password_message(&e.to_string()) {
                ExtractError::WrongPassword {
                    archive: archive_path.to_path_buf(),
                }
            } else {
                io_failure("failed to extract file", e)
            });
        }

        Ok(Some(file_path))
    }

    /// Try to extract a ZIP archive with a single password
    ///
    /// In partial mode a damaged entry is dropped and extraction continues with the next one;
    /// password failures still abort the pass.
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
            "attempting ZIP extraction"
        );

        std::fs::create_dir_all(dest_path).map_err(|e| ExtractError::ExtractionFailed {
            archive: archive_path.to_path_buf(),
            reason: format!("failed to create destination: {}", e),
        })?;

        let file = std::fs::File::open(archive_path).map_err(|e| {
            ExtractError::ExtractionFailed {
                archive: archive_path.to_path_buf(),
                reason: format!("failed to open ZIP archive: {}", e),
            }
        })?;

        let mut archive = zip::ZipArchive::new(file).map_err(|e| match e {
            zip::result::ZipError::UnsupportedArchive(reason) => ExtractError::Unsupported {
                archive: archive_path.to_path_buf(),
                reason: reason.to_string(),
            },
            other => ExtractError::ExtractionFailed {
                archive: archive_path.to_path_buf(),
                reason: format!("failed to read ZIP archive: {}", other),
            },
        })?;

        let mut extracted_files = Vec::new();

        for i in 0..archive.len() {
            attempt.check_cancelled()?;

            let entry = Self::open_zip_entry(&mut archive, i, password, archive_path)
                .and_then(|file| Self::extract_zip_entry(file, dest_path, archive_path));

            match entry {
                Ok(Some(path)) => extracted_files.push(path),
                Ok(None) => {}
                Err(e @ ExtractError::WrongPassword { .. }) => return Err(e),
                Err(e) if attempt.partial => {
                    warn!(?archive_path, entry = i, error = %e, "skipping damaged entry");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(extracted_files)
    }
}

#[async_trait]
impl DecompressionBackend for ZipBackend {
    fn name(&self) -> &str {
        "zip"
    }

    fn formats(&self) -> &[ArchiveFormat] {
        &[ArchiveFormat::Zip]
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            multipart: false,
            partial: true,
            encodings: false,
        }
    }

    async fn extract(&self, request: &ExtractRequest) -> Result<BackendReport> {
        if let Some(report) = single_part_only(self.name(), request) {
            return Ok(report);
        }
        extract_with_passwords_impl("ZIP", Self::try_extract, request).await
    }
}
