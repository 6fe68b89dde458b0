use super::*;
use std::io::Write;
use tempfile::TempDir;

fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = std::fs::File::create(path).unwrap();
    let mut writer = ::zip::ZipWriter::new(file);
    let options = ::zip::write::FileOptions::default()
        .compression_method(::zip::CompressionMethod::Stored);
    for (name, data) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap();
}

fn request_for(archive: PathBuf, out: PathBuf) -> ExtractRequest {
    ExtractRequest {
        parts: vec![archive],
        output_dir: out,
        format: ArchiveFormat::Zip,
        passwords: Arc::new(PasswordList::new(vec![String::new()])),
        mode: ExtractMode::Normal,
        encoding: None,
        cancel: CancellationToken::new(),
        timeout: Duration::from_secs(30),
    }
}

struct NamedBackend {
    name: &'static str,
    formats: Vec<ArchiveFormat>,
}

#[async_trait]
impl DecompressionBackend for NamedBackend {
    fn name(&self) -> &str {
        self.name
    }

    fn formats(&self) -> &[ArchiveFormat] {
        &self.formats
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default()
    }

    async fn extract(&self, _request: &ExtractRequest) -> Result<BackendReport> {
        Ok(BackendReport::failed(BackendOutcome::Corrupt, "unused"))
    }
}

#[tokio::test]
async fn test_zip_backend_extracts_nested_directories() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("a.zip");
    write_zip(
        &archive,
        &[("top.txt", b"top"), ("sub/dir/deep.txt", b"deep")],
    );

    let out = dir.path().join("out");
    let report = ZipBackend
        .extract(&request_for(archive, out.clone()))
        .await
        .unwrap();

    assert_eq!(report.outcome, BackendOutcome::Success);
    assert_eq!(report.produced.len(), 2);
    assert_eq!(std::fs::read(out.join("sub/dir/deep.txt")).unwrap(), b"deep");
}

#[tokio::test]
async fn test_zip_backend_skips_path_traversal_entries() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("evil.zip");
    write_zip(&archive, &[("../escape.txt", b"x"), ("ok.txt", b"ok")]);

    let out = dir.path().join("out");
    let report = ZipBackend
        .extract(&request_for(archive, out.clone()))
        .await
        .unwrap();

    assert_eq!(report.outcome, BackendOutcome::Success);
    assert_eq!(report.produced, vec![out.join("ok.txt")]);
    assert!(!dir.path().join("escape.txt").exists());
}

#[tokio::test]
async fn test_zip_backend_reports_garbage_as_corrupt() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("broken.zip");
    std::fs::write(&archive, b"PK\x03\x04 this is not really a zip").unwrap();

    let report = ZipBackend
        .extract(&request_for(archive, dir.path().join("out")))
        .await
        .unwrap();
    assert_eq!(report.outcome, BackendOutcome::Corrupt);
    assert!(report.produced.is_empty());
}

#[tokio::test]
async fn test_zip_backend_honours_cancellation() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("a.zip");
    write_zip(&archive, &[("a.txt", b"a")]);

    let request = request_for(archive, dir.path().join("out"));
    request.cancel.cancel();
    let result = ZipBackend.extract(&request).await;
    assert!(matches!(
        result,
        Err(Error::Extract(ExtractError::Cancelled { .. }))
    ));
}

#[tokio::test]
async fn test_single_file_backends_refuse_volumes() {
    let dir = TempDir::new().unwrap();
    let mut request = request_for(dir.path().join("a.zip"), dir.path().join("out"));
    request.parts.push(dir.path().join("a.z01"));

    let report = ZipBackend.extract(&request).await.unwrap();
    assert_eq!(report.outcome, BackendOutcome::UnsupportedOperation);

    request.format = ArchiveFormat::SevenZip;
    let report = SevenZipBackend.extract(&request).await.unwrap();
    assert_eq!(report.outcome, BackendOutcome::UnsupportedOperation);
}

#[test]
fn test_registry_keeps_registration_order() {
    let mut registry = BackendRegistry::new();
    registry.register(Arc::new(NamedBackend {
        name: "first",
        formats: vec![ArchiveFormat::Zip],
    }));
    registry.register(Arc::new(NamedBackend {
        name: "second",
        formats: vec![ArchiveFormat::Zip, ArchiveFormat::Rar],
    }));

    let zip: Vec<_> = registry
        .for_format(ArchiveFormat::Zip)
        .iter()
        .map(|b| b.name().to_string())
        .collect();
    assert_eq!(zip, ["first", "second"]);
    assert_eq!(
        registry.preferred(ArchiveFormat::Rar).unwrap().name(),
        "second"
    );
    assert!(registry.preferred(ArchiveFormat::Xz).is_none());
}

#[test]
fn test_in_process_backends_are_registered_first() {
    let tools = crate::config::ToolsConfig {
        search_path: false,
        ..Default::default()
    };
    let registry = BackendRegistry::discover(&tools);
    assert_eq!(registry.len(), 3);
    assert_eq!(registry.preferred(ArchiveFormat::Zip).unwrap().name(), "zip");
    assert_eq!(
        registry.preferred(ArchiveFormat::Rar).unwrap().name(),
        "unrar-lib"
    );
}

#[test]
fn test_sanitize_entry_path() {
    assert_eq!(
        sanitize_entry_path("a/../b/c.txt"),
        Some(PathBuf::from("a/b/c.txt"))
    );
    assert_eq!(
        sanitize_entry_path("/etc/passwd"),
        Some(PathBuf::from("etc/passwd"))
    );
    assert_eq!(sanitize_entry_path("../.."), None);
}

#[test]
fn test_clear_dir_keeps_directory() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("x/y")).unwrap();
    std::fs::write(dir.path().join("x/y/f"), b"1").unwrap();
    std::fs::write(dir.path().join("g"), b"1").unwrap();

    clear_dir(dir.path()).unwrap();
    assert!(dir.path().exists());
    assert!(collect_files(dir.path()).is_empty());

    clear_dir(&dir.path().join("missing")).unwrap();
}
