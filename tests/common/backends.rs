//! Scripted decompression backends for driving the orchestrator deterministically

use async_trait::async_trait;
use extractall::backend::{
    BackendCapabilities, BackendOutcome, BackendReport, ExtractRequest, ZipBackend,
};
use extractall::{ArchiveFormat, DecompressionBackend, Error, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Capabilities every scripted backend reports
fn full_capabilities() -> BackendCapabilities {
    BackendCapabilities {
        multipart: true,
        partial: true,
        encodings: false,
    }
}

/// In-process ZIP backend that counts its invocations
#[derive(Debug, Default)]
pub struct CountingZip {
    calls: AtomicUsize,
}

impl CountingZip {
    /// Number of `extract` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DecompressionBackend for CountingZip {
    fn name(&self) -> &str {
        "counting-zip"
    }

    fn formats(&self) -> &[ArchiveFormat] {
        &[ArchiveFormat::Zip]
    }

    fn capabilities(&self) -> BackendCapabilities {
        ZipBackend.capabilities()
    }

    async fn extract(&self, request: &ExtractRequest) -> Result<BackendReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ZipBackend.extract(request).await
    }
}

/// Writes `<stem>.bin` for every request, recording the parts it was handed
#[derive(Debug, Default)]
pub struct PassBackend {
    calls: std::sync::Mutex<Vec<Vec<PathBuf>>>,
}

impl PassBackend {
    /// Parts handed to each call, in order
    pub fn calls(&self) -> Vec<Vec<PathBuf>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DecompressionBackend for PassBackend {
    fn name(&self) -> &str {
        "pass"
    }

    fn formats(&self) -> &[ArchiveFormat] {
        &[ArchiveFormat::Rar, ArchiveFormat::SevenZip]
    }

    fn capabilities(&self) -> BackendCapabilities {
        full_capabilities()
    }

    async fn extract(&self, request: &ExtractRequest) -> Result<BackendReport> {
        self.calls.lock().unwrap().push(request.parts.clone());
        tokio::fs::create_dir_all(&request.output_dir).await?;
        let stem = request.primary().file_stem().unwrap().to_string_lossy();
        let out = request.output_dir.join(format!("{}.bin", stem));
        tokio::fs::write(&out, b"payload").await?;
        Ok(BackendReport::success("extracted", vec![out]))
    }
}

/// Every archive is encrypted and no password fits
#[derive(Debug, Default)]
pub struct LockedBackend {
    calls: AtomicUsize,
}

impl LockedBackend {
    /// Number of `extract` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DecompressionBackend for LockedBackend {
    fn name(&self) -> &str {
        "locked"
    }

    fn formats(&self) -> &[ArchiveFormat] {
        &[ArchiveFormat::Zip, ArchiveFormat::Rar]
    }

    fn capabilities(&self) -> BackendCapabilities {
        full_capabilities()
    }

    async fn extract(&self, _request: &ExtractRequest) -> Result<BackendReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(BackendReport::failed(
            BackendOutcome::PasswordRequired,
            "archive is encrypted and no candidate password worked",
        ))
    }
}

/// Writes one file, then hangs until cancelled
#[derive(Debug, Default)]
pub struct StallBackend {
    calls: AtomicUsize,
}

impl StallBackend {
    /// Number of `extract` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DecompressionBackend for StallBackend {
    fn name(&self) -> &str {
        "stall"
    }

    fn formats(&self) -> &[ArchiveFormat] {
        &[ArchiveFormat::Zip, ArchiveFormat::Rar]
    }

    fn capabilities(&self) -> BackendCapabilities {
        full_capabilities()
    }

    async fn extract(&self, request: &ExtractRequest) -> Result<BackendReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::fs::create_dir_all(&request.output_dir).await?;
        tokio::fs::write(request.output_dir.join("partial.dat"), b"half").await?;
        request.cancel.cancelled().await;
        Err(Error::Cancelled)
    }
}

/// "Extracts" every archive into a copy of itself, so the output always holds another archive
#[derive(Debug, Default)]
pub struct SelfCopyBackend {
    calls: AtomicUsize,
}

impl SelfCopyBackend {
    /// Number of `extract` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DecompressionBackend for SelfCopyBackend {
    fn name(&self) -> &str {
        "self-copy"
    }

    fn formats(&self) -> &[ArchiveFormat] {
        &[ArchiveFormat::Zip]
    }

    fn capabilities(&self) -> BackendCapabilities {
        full_capabilities()
    }

    async fn extract(&self, request: &ExtractRequest) -> Result<BackendReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::fs::create_dir_all(&request.output_dir).await?;
        let out = request.output_dir.join("self.zip");
        tokio::fs::copy(request.primary(), &out).await?;
        Ok(BackendReport::success("copied", vec![out]))
    }
}
