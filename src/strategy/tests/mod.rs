use super::*;
use crate::backend::{BackendCapabilities, BackendReport, ZipBackend};
use crate::error::Result;
use crate::types::{AttemptRecord, JobId, VolumeScheme};
use async_trait::async_trait;
use chrono::Utc;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use tempfile::TempDir;

/// Backend that answers from a script and records every request it sees
struct ScriptedBackend {
    name: &'static str,
    formats: Vec<ArchiveFormat>,
    caps: BackendCapabilities,
    outcome: BackendOutcome,
    files: Vec<&'static str>,
    calls: Mutex<Vec<ExtractRequest>>,
}

impl ScriptedBackend {
    fn new(name: &'static str, outcome: BackendOutcome) -> Self {
        Self {
            name,
            formats: vec![ArchiveFormat::Zip, ArchiveFormat::Rar],
            caps: BackendCapabilities {
                multipart: true,
                partial: true,
                encodings: true,
            },
            outcome,
            files: vec!["out.txt"],
            calls: Mutex::new(Vec::new()),
        }
    }

    fn producing(mut self, files: Vec<&'static str>) -> Self {
        self.files = files;
        self
    }

    fn with_caps(mut self, caps: BackendCapabilities) -> Self {
        self.caps = caps;
        self
    }

    fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl DecompressionBackend for ScriptedBackend {
    fn name(&self) -> &str {
        self.name
    }

    fn formats(&self) -> &[ArchiveFormat] {
        &self.formats
    }

    fn capabilities(&self) -> BackendCapabilities {
        self.caps
    }

    async fn extract(&self, request: &ExtractRequest) -> Result<BackendReport> {
        self.calls.lock().unwrap().push(request.clone());
        std::fs::create_dir_all(&request.output_dir)?;
        // Failing backends still leave debris behind, like real tools do.
        let mut produced = Vec::new();
        for name in &self.files {
            let path = request.output_dir.join(name);
            std::fs::write(&path, b"data")?;
            produced.push(path);
        }
        Ok(match self.outcome {
            BackendOutcome::Success => BackendReport::success("ok", produced),
            other => BackendReport::failed(other, format!("{} scripted failure", self.name)),
        })
    }
}

fn context(backends: Vec<Arc<dyn DecompressionBackend>>) -> StrategyContext {
    let mut registry = BackendRegistry::new();
    for b in backends {
        registry.register(b);
    }
    StrategyContext {
        backends: registry,
        repairers: RepairRegistry::new(),
        passwords: Arc::new(PasswordList::new(vec![String::new()])),
        encodings: vec!["cp437".into(), "cp932".into()],
        backend_timeout: Duration::from_secs(30),
    }
}

fn attempt_in(dir: &Path) -> Attempt {
    Attempt {
        output_dir: dir.join("out"),
        work_dir: dir.join("work"),
        cancel: CancellationToken::new(),
    }
}

fn single_job(dir: &Path, name: &str) -> ArchiveJob {
    let path = dir.join(name);
    std::fs::write(&path, b"not used by scripted backends").unwrap();
    ArchiveJob::new(
        JobId::for_primary(&path),
        vec![path],
        ArchiveFormat::Zip,
        VolumeScheme::Single,
        Vec::new(),
    )
}

fn rar_set(dir: &Path, indices: &[u32], missing: Vec<u32>) -> ArchiveJob {
    let parts: Vec<PathBuf> = indices
        .iter()
        .map(|i| {
            let p = dir.join(format!("movie.part{}.rar", i));
            std::fs::write(&p, b"x").unwrap();
            p
        })
        .collect();
    ArchiveJob::new(
        JobId::for_primary(&parts[0]),
        parts,
        ArchiveFormat::Rar,
        VolumeScheme::Native,
        missing,
    )
}

#[test]
fn test_chain_per_mode() {
    let mut config = Config::new("/in");
    config.mode = Mode::Conservative;
    assert_eq!(chain_for(&config), vec![Strategy::Basic, Strategy::Multipart]);

    config.mode = Mode::Standard;
    assert_eq!(
        chain_for(&config),
        vec![
            Strategy::Basic,
            Strategy::Multipart,
            Strategy::MultiTool,
            Strategy::Encoding
        ]
    );

    config.repair = true;
    assert!(chain_for(&config).contains(&Strategy::Repair));

    config.mode = Mode::Aggressive;
    config.repair = false;
    let chain = chain_for(&config);
    assert_eq!(chain.first(), Some(&Strategy::Basic));
    assert_eq!(chain.last(), Some(&Strategy::Partial));
    assert!(chain.contains(&Strategy::Repair));
    assert!(chain.contains(&Strategy::AlternativeFormat));
}

#[test]
fn test_disabling_multipart_removes_it_everywhere() {
    for mode in [Mode::Conservative, Mode::Standard, Mode::Aggressive] {
        let mut config = Config::new("/in");
        config.mode = mode;
        config.multipart = false;
        assert!(!chain_for(&config).contains(&Strategy::Multipart));
    }
}

#[test]
fn test_incomplete_set_runs_only_partial() {
    let dir = TempDir::new().unwrap();
    let job = rar_set(dir.path(), &[1, 2, 4], vec![3]);

    let standard = [Strategy::Basic, Strategy::Multipart, Strategy::MultiTool];
    assert_eq!(effective_chain(&standard, &job), None);

    let aggressive = [Strategy::Basic, Strategy::Multipart, Strategy::Partial];
    assert_eq!(
        effective_chain(&aggressive, &job),
        Some(vec![Strategy::Partial])
    );
}

#[tokio::test]
async fn test_basic_success_reports_produced_files() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(ScriptedBackend::new("a", BackendOutcome::Success));
    let ctx = context(vec![backend.clone()]);
    let job = single_job(dir.path(), "a.zip");
    let attempt = attempt_in(dir.path());

    let result = Strategy::Basic.attempt(&ctx, &job, &attempt).await;
    assert_eq!(result.outcome, Outcome::Success);
    assert_eq!(result.produced, vec![attempt.output_dir.join("out.txt")]);
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_failed_strategy_leaves_no_output_behind() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(ScriptedBackend::new("a", BackendOutcome::Corrupt));
    let ctx = context(vec![backend]);
    let job = single_job(dir.path(), "a.zip");
    let attempt = attempt_in(dir.path());

    let result = Strategy::Basic.attempt(&ctx, &job, &attempt).await;
    assert_eq!(result.outcome, Outcome::Corrupt);
    assert!(crate::backend::collect_files(&attempt.output_dir).is_empty());
}

#[tokio::test]
async fn test_basic_leaves_multipart_sets_alone() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(ScriptedBackend::new("a", BackendOutcome::Success));
    let ctx = context(vec![backend.clone()]);
    let job = rar_set(dir.path(), &[1, 2], vec![]);

    let result = Strategy::Basic.attempt(&ctx, &job, &attempt_in(dir.path())).await;
    assert_eq!(result.outcome, Outcome::Unsupported);
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_multipart_stages_every_volume() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(ScriptedBackend::new("a", BackendOutcome::Success));
    let ctx = context(vec![backend.clone()]);
    let job = rar_set(dir.path(), &[1, 2, 3], vec![]);
    let attempt = attempt_in(dir.path());

    let result = Strategy::Multipart.attempt(&ctx, &job, &attempt).await;
    assert!(result.is_success());
    let calls = backend.calls.lock().unwrap();
    assert_eq!(calls[0].parts.len(), 3);
    assert!(calls[0].parts.iter().all(|p| p.starts_with(&attempt.work_dir)));
}

#[tokio::test]
async fn test_missing_parts_never_reach_a_backend() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(ScriptedBackend::new("a", BackendOutcome::Success));
    let ctx = context(vec![backend.clone()]);
    let job = rar_set(dir.path(), &[1, 2, 4], vec![3]);

    let result = Strategy::Multipart
        .attempt(&ctx, &job, &attempt_in(dir.path()))
        .await;
    assert_eq!(result.outcome, Outcome::MissingParts);
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_partial_on_incomplete_set_uses_leading_volumes() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(ScriptedBackend::new("a", BackendOutcome::Success));
    let ctx = context(vec![backend.clone()]);
    let job = rar_set(dir.path(), &[1, 2, 4], vec![3]);

    let result = Strategy::Partial
        .attempt(&ctx, &job, &attempt_in(dir.path()))
        .await;
    assert!(result.is_success());
    let calls = backend.calls.lock().unwrap();
    assert_eq!(calls[0].parts.len(), 2);
    assert_eq!(calls[0].mode, ExtractMode::Partial);
}

#[tokio::test]
async fn test_partial_without_recovered_files_is_corrupt() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(ScriptedBackend::new("a", BackendOutcome::Success).producing(vec![]));
    let ctx = context(vec![backend]);
    let job = single_job(dir.path(), "a.zip");

    let result = Strategy::Partial
        .attempt(&ctx, &job, &attempt_in(dir.path()))
        .await;
    assert_eq!(result.outcome, Outcome::Corrupt);
}

#[tokio::test]
async fn test_multi_tool_stops_at_first_success() {
    let dir = TempDir::new().unwrap();
    let first = Arc::new(ScriptedBackend::new("first", BackendOutcome::Corrupt));
    let second = Arc::new(ScriptedBackend::new("second", BackendOutcome::Success));
    let third = Arc::new(ScriptedBackend::new("third", BackendOutcome::Success));
    let ctx = context(vec![first.clone(), second.clone(), third.clone()]);
    let job = single_job(dir.path(), "a.zip");
    let attempt = attempt_in(dir.path());

    let result = Strategy::MultiTool.attempt(&ctx, &job, &attempt).await;
    assert!(result.is_success());
    assert!(result.detail.starts_with("second"));
    assert_eq!((first.calls(), second.calls(), third.calls()), (1, 1, 0));
    // Debris from the failed first backend was cleared before the second ran.
    assert_eq!(crate::backend::collect_files(&attempt.output_dir).len(), 1);
}

#[tokio::test]
async fn test_multi_tool_stops_when_output_cannot_be_cleared() {
    let dir = TempDir::new().unwrap();
    let first = Arc::new(ScriptedBackend::new("first", BackendOutcome::Corrupt));
    let second = Arc::new(ScriptedBackend::new("second", BackendOutcome::Success));
    let ctx = context(vec![first.clone(), second.clone()]);
    let job = single_job(dir.path(), "a.zip");
    let attempt = attempt_in(dir.path());
    // A plain file where the output directory belongs can be neither written nor emptied.
    std::fs::write(&attempt.output_dir, b"in the way").unwrap();

    let result = Strategy::MultiTool.attempt(&ctx, &job, &attempt).await;
    assert!(!result.is_success());
    assert_eq!((first.calls(), second.calls()), (1, 0));
}

#[tokio::test]
async fn test_multi_tool_prefers_password_outcome() {
    let dir = TempDir::new().unwrap();
    let ctx = context(vec![
        Arc::new(ScriptedBackend::new("a", BackendOutcome::PasswordRequired)),
        Arc::new(ScriptedBackend::new("b", BackendOutcome::Corrupt)),
    ]);
    let job = single_job(dir.path(), "a.zip");

    let result = Strategy::MultiTool
        .attempt(&ctx, &job, &attempt_in(dir.path()))
        .await;
    assert_eq!(result.outcome, Outcome::PasswordRequired);
}

#[tokio::test]
async fn test_encoding_needs_a_decoding_symptom() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(ScriptedBackend::new("a", BackendOutcome::Success));
    let ctx = context(vec![backend.clone()]);
    let mut job = single_job(dir.path(), "a.zip");

    let result = Strategy::Encoding
        .attempt(&ctx, &job, &attempt_in(dir.path()))
        .await;
    assert_eq!(result.outcome, Outcome::Unsupported);
    assert_eq!(backend.calls(), 0);

    job.attempts.push(AttemptRecord {
        strategy: StrategyKind::Basic,
        outcome: Outcome::Corrupt,
        detail: "cli-unzip: Illegal byte sequence".into(),
        timestamp: Utc::now(),
    });
    let result = Strategy::Encoding
        .attempt(&ctx, &job, &attempt_in(dir.path()))
        .await;
    assert!(result.is_success());
    assert_eq!(
        backend.calls.lock().unwrap()[0].encoding.as_deref(),
        Some("cp437")
    );
}

#[tokio::test]
async fn test_encoding_skips_backends_without_support() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(
        ScriptedBackend::new("a", BackendOutcome::Success)
            .with_caps(BackendCapabilities::default()),
    );
    let ctx = context(vec![backend.clone()]);
    let mut job = single_job(dir.path(), "a.zip");
    job.attempts.push(AttemptRecord {
        strategy: StrategyKind::Basic,
        outcome: Outcome::Corrupt,
        detail: "invalid utf-8 in file name".into(),
        timestamp: Utc::now(),
    });

    let result = Strategy::Encoding
        .attempt(&ctx, &job, &attempt_in(dir.path()))
        .await;
    assert_eq!(result.outcome, Outcome::Unsupported);
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_alternative_format_extracts_misnamed_zip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("holiday.rar");
    {
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = ::zip::ZipWriter::new(file);
        writer
            .start_file("photo.txt", ::zip::write::FileOptions::default())
            .unwrap();
        writer.write_all(b"sunny").unwrap();
        writer.finish().unwrap();
    }
    let job = ArchiveJob::new(
        JobId::for_primary(&path),
        vec![path],
        ArchiveFormat::Rar,
        VolumeScheme::Single,
        Vec::new(),
    );
    let ctx = context(vec![Arc::new(ZipBackend)]);
    let attempt = attempt_in(dir.path());

    let result = Strategy::AlternativeFormat
        .attempt(&ctx, &job, &attempt)
        .await;
    assert!(result.is_success(), "{}", result.detail);
    assert_eq!(
        std::fs::read(attempt.output_dir.join("photo.txt")).unwrap(),
        b"sunny"
    );
}

#[tokio::test]
async fn test_alternative_format_declines_matching_content() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("real.zip");
    std::fs::write(&path, b"PK\x03\x04rest").unwrap();
    let job = ArchiveJob::new(
        JobId::for_primary(&path),
        vec![path],
        ArchiveFormat::Zip,
        VolumeScheme::Single,
        Vec::new(),
    );
    let backend = Arc::new(ScriptedBackend::new("a", BackendOutcome::Success));
    let ctx = context(vec![backend.clone()]);

    let result = Strategy::AlternativeFormat
        .attempt(&ctx, &job, &attempt_in(dir.path()))
        .await;
    assert_eq!(result.outcome, Outcome::Unsupported);
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_cancelled_backend_becomes_timeout() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.zip");
    {
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = ::zip::ZipWriter::new(file);
        writer
            .start_file("a.txt", ::zip::write::FileOptions::default())
            .unwrap();
        writer.write_all(b"a").unwrap();
        writer.finish().unwrap();
    }
    let job = ArchiveJob::new(
        JobId::for_primary(&path),
        vec![path],
        ArchiveFormat::Zip,
        VolumeScheme::Single,
        Vec::new(),
    );
    let ctx = context(vec![Arc::new(ZipBackend)]);
    let attempt = attempt_in(dir.path());
    attempt.cancel.cancel();

    let result = Strategy::Basic.attempt(&ctx, &job, &attempt).await;
    assert_eq!(result.outcome, Outcome::Timeout);
}

#[test]
fn test_encoding_problem_detection() {
    assert!(is_encoding_problem("unzip: mismatching local filename"));
    assert!(is_encoding_problem("Invalid UTF-8 sequence"));
    assert!(!is_encoding_problem("CRC failed in a.txt"));
}
