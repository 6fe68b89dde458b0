//! External tool backends (`7z`, `unrar`, `unzip`, `tar`)

use crate::config::ToolsConfig;
use crate::error::{Error, ExtractError, Result};
use crate::types::ArchiveFormat;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{
    BackendCapabilities, BackendOutcome, BackendReport, DecompressionBackend, ExtractMode,
    ExtractRequest, clear_dir, collect_files,
};

/// Which external program a [`CliBackend`] drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliTool {
    /// 7-Zip (`7z`, `7zz` or `7za`)
    SevenZip,
    /// RARLAB `unrar`
    Unrar,
    /// Info-ZIP `unzip`
    Unzip,
    /// `tar` (compression auto-detected on read)
    Tar,
}

impl CliTool {
    /// Binary names searched in PATH, in order
    fn binary_names(&self) -> &'static [&'static str] {
        match self {
            CliTool::SevenZip => &["7z", "7zz", "7za"],
            CliTool::Unrar => &["unrar"],
            CliTool::Unzip => &["unzip"],
            CliTool::Tar => &["tar"],
        }
    }

    fn formats(&self) -> &'static [ArchiveFormat] {
        match self {
            CliTool::SevenZip => &[
                ArchiveFormat::SevenZip,
                ArchiveFormat::Zip,
                ArchiveFormat::Rar,
                ArchiveFormat::Tar,
                ArchiveFormat::Gzip,
                ArchiveFormat::Bzip2,
                ArchiveFormat::Xz,
            ],
            CliTool::Unrar => &[ArchiveFormat::Rar],
            CliTool::Unzip => &[ArchiveFormat::Zip],
            CliTool::Tar => &[
                ArchiveFormat::Tar,
                ArchiveFormat::TarGz,
                ArchiveFormat::TarBz2,
                ArchiveFormat::TarXz,
            ],
        }
    }

    fn name(&self) -> &'static str {
        match self {
            CliTool::SevenZip => "cli-7z",
            CliTool::Unrar => "cli-unrar",
            CliTool::Unzip => "cli-unzip",
            CliTool::Tar => "cli-tar",
        }
    }

    fn takes_password(&self) -> bool {
        !matches!(self, CliTool::Tar)
    }
}

/// Backend that runs an external extraction program
///
/// The child is spawned with `kill_on_drop`, so an abandoned invocation never outlives its
/// attempt. When the request's cancellation token fires the child is killed and reaped
/// before `extract` returns.
#[derive(Debug, Clone)]
pub struct CliBackend {
    tool: CliTool,
    binary_path: PathBuf,
}

impl CliBackend {
    /// Create a new CLI backend with an explicit binary path
    pub fn new(tool: CliTool, binary_path: PathBuf) -> Self {
        Self { tool, binary_path }
    }

    /// Attempt to find the tool in PATH
    pub fn from_path(tool: CliTool) -> Option<Self> {
        tool.binary_names()
            .iter()
            .find_map(|name| which::which(name).ok())
            .map(|path| Self::new(tool, path))
    }

    /// Every tool that is configured explicitly or (when allowed) found in PATH
    pub fn discover(tools: &ToolsConfig) -> Vec<Self> {
        [
            (CliTool::SevenZip, &tools.sevenzip_path),
            (CliTool::Unrar, &tools.unrar_path),
            (CliTool::Unzip, &tools.unzip_path),
            (CliTool::Tar, &tools.tar_path),
        ]
        .into_iter()
        .filter_map(|(tool, configured)| match configured {
            Some(path) => Some(Self::new(tool, path.clone())),
            None if tools.search_path => Self::from_path(tool),
            None => None,
        })
        .collect()
    }

    /// Which tool this backend drives
    pub fn tool(&self) -> CliTool {
        self.tool
    }

    /// Arguments for one invocation
    fn build_args(&self, request: &ExtractRequest, password: Option<&str>) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        let archive = request.primary().as_os_str().to_os_string();
        let out = request.output_dir.as_os_str();

        match self.tool {
            CliTool::SevenZip => {
                args.extend(["x", "-y", "-bd"].map(OsString::from));
                let mut o = OsString::from("-o");
                o.push(out);
                args.push(o);
                // An explicit (possibly empty) -p keeps 7z from prompting.
                args.push(format!("-p{}", password.unwrap_or_default()).into());
                if let Some(enc) = &request.encoding {
                    args.push(format!("-mcp={}", code_page_number(enc)).into());
                }
                args.push("--".into());
                args.push(archive);
            }
            CliTool::Unrar => {
                args.extend(["x", "-y", "-o+"].map(OsString::from));
                if request.mode == ExtractMode::Partial {
                    args.push("-kb".into());
                }
                match password {
                    Some(pw) if !pw.is_empty() => args.push(format!("-p{}", pw).into()),
                    _ => args.push("-p-".into()),
                }
                args.push("--".into());
                args.push(archive);
                let mut dest = out.to_os_string();
                dest.push(std::path::MAIN_SEPARATOR_STR);
                args.push(dest);
            }
            CliTool::Unzip => {
                args.push("-o".into());
                if let Some(enc) = &request.encoding {
                    args.push("-O".into());
                    args.push(enc.into());
                }
                args.push("-P".into());
                args.push(password.unwrap_or_default().into());
                args.push(archive);
                args.push("-d".into());
                args.push(out.to_os_string());
            }
            CliTool::Tar => {
                args.extend(["-x", "-f"].map(OsString::from));
                args.push(archive);
                args.push("-C".into());
                args.push(out.to_os_string());
            }
        }
        args
    }

    /// Run the tool once; `Err` only for spawn failures or cancellation
    async fn run_once(&self, request: &ExtractRequest, password: Option<&str>) -> Result<ToolRun> {
        let args = self.build_args(request, password);
        debug!(
            backend = self.name(),
            binary = ?self.binary_path,
            archive = ?request.primary(),
            "running external extraction tool"
        );

        let mut child = Command::new(&self.binary_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::ExternalTool(format!("failed to execute {}: {}", self.tool.name(), e))
            })?;

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(out) = stdout.as_mut() {
                let _ = out.read_to_end(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(err) = stderr.as_mut() {
                let _ = err.read_to_end(&mut buf).await;
            }
            buf
        });

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = request.cancel.cancelled() => {
                warn!(backend = self.name(), archive = ?request.primary(), "killing cancelled extraction tool");
                let _ = child.kill().await;
                return Err(ExtractError::Cancelled { archive: request.primary().to_path_buf() }.into());
            }
            _ = tokio::time::sleep(request.timeout) => {
                warn!(backend = self.name(), archive = ?request.primary(), "extraction tool exceeded its timeout");
                let _ = child.kill().await;
                return Err(ExtractError::Cancelled { archive: request.primary().to_path_buf() }.into());
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        Ok(ToolRun {
            success: status.success(),
            code: status.code(),
            output: format!(
                "{}\n{}",
                String::from_utf8_lossy(&stderr),
                String::from_utf8_lossy(&stdout)
            ),
        })
    }
}

/// Captured result of one tool invocation
#[derive(Debug)]
struct ToolRun {
    success: bool,
    code: Option<i32>,
    output: String,
}

/// How a failed run is read
#[derive(Debug, PartialEq, Eq)]
enum Failure {
    WrongPassword,
    Unsupported,
    Damaged,
}

fn classify_failure(tool: CliTool, code: Option<i32>, output: &str) -> Failure {
    let lower = output.to_lowercase();
    let bad_password_code = match tool {
        CliTool::Unrar => code == Some(11),
        CliTool::Unzip => code == Some(82),
        _ => false,
    };
    if bad_password_code
        || lower.contains("wrong password")
        || lower.contains("incorrect password")
        || lower.contains("enter password")
        || (lower.contains("password") && lower.contains("encrypted"))
    {
        return Failure::WrongPassword;
    }
    if lower.contains("unsupported")
        || lower.contains("not implemented")
        || lower.contains("unknown method")
        || lower.contains("can not open the file as archive")
        || lower.contains("is not rar archive")
        || lower.contains("cannot find zipfile directory")
    {
        return Failure::Unsupported;
    }
    Failure::Damaged
}

/// Last non-empty line of tool output, used as the report detail
fn summary_line(output: &str) -> String {
    output
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .unwrap_or("no output")
        .to_string()
}

/// `cp932` -> `932`; names without a `cp` prefix pass through
fn code_page_number(encoding: &str) -> &str {
    encoding
        .strip_prefix("cp")
        .or_else(|| encoding.strip_prefix("CP"))
        .unwrap_or(encoding)
}

#[async_trait]
impl DecompressionBackend for CliBackend {
    fn name(&self) -> &str {
        self.tool.name()
    }

    fn formats(&self) -> &[ArchiveFormat] {
        self.tool.formats()
    }

    fn capabilities(&self) -> BackendCapabilities {
        match self.tool {
            CliTool::SevenZip => BackendCapabilities {
                multipart: true,
                partial: true,
                encodings: true,
            },
            CliTool::Unrar => BackendCapabilities {
                multipart: true,
                partial: true,
                encodings: false,
            },
            CliTool::Unzip => BackendCapabilities {
                multipart: false,
                partial: false,
                encodings: true,
            },
            CliTool::Tar => BackendCapabilities::default(),
        }
    }

    async fn extract(&self, request: &ExtractRequest) -> Result<BackendReport> {
        let caps = self.capabilities();
        if request.parts.len() > 1 && !caps.multipart {
            return Ok(BackendReport::failed(
                BackendOutcome::UnsupportedOperation,
                format!("{} cannot follow volumes", self.name()),
            ));
        }
        if request.mode == ExtractMode::Partial && !caps.partial {
            return Ok(BackendReport::failed(
                BackendOutcome::UnsupportedOperation,
                format!("{} has no partial mode", self.name()),
            ));
        }
        if request.encoding.is_some() && !caps.encodings {
            return Ok(BackendReport::failed(
                BackendOutcome::UnsupportedOperation,
                format!("{} cannot override filename encoding", self.name()),
            ));
        }

        tokio::fs::create_dir_all(&request.output_dir).await?;

        let passwords: Vec<Option<&str>> =
            if !self.tool.takes_password() || request.passwords.is_empty() {
                vec![None]
            } else {
                request.passwords.iter().map(|p| Some(p.as_str())).collect()
            };

        let mut last_detail = String::new();
        for (i, password) in passwords.iter().enumerate() {
            let run = self.run_once(request, *password).await?;
            let produced = collect_files(&request.output_dir);

            if run.success {
                info!(
                    backend = self.name(),
                    archive = ?request.primary(),
                    extracted_count = produced.len(),
                    "external extraction successful"
                );
                return Ok(BackendReport::success(
                    format!("{} extracted {} file(s)", self.name(), produced.len()),
                    produced,
                ));
            }

            let detail = format!(
                "{} exited with {}: {}",
                self.name(),
                run.code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
                summary_line(&run.output)
            );

            match classify_failure(self.tool, run.code, &run.output) {
                Failure::WrongPassword => {
                    debug!(attempt = i + 1, "wrong password, trying next");
                    clear_dir(&request.output_dir)?;
                    last_detail = detail;
                }
                Failure::Unsupported => {
                    return Ok(BackendReport::failed(
                        BackendOutcome::UnsupportedOperation,
                        detail,
                    ));
                }
                Failure::Damaged => {
                    if request.mode == ExtractMode::Partial && !produced.is_empty() {
                        info!(
                            backend = self.name(),
                            recovered = produced.len(),
                            "tool failed but recovered some files"
                        );
                        return Ok(BackendReport::success(
                            format!("recovered {} file(s); {}", produced.len(), detail),
                            produced,
                        ));
                    }
                    return Ok(BackendReport::failed(BackendOutcome::Corrupt, detail));
                }
            }
        }

        Ok(BackendReport::failed(
            BackendOutcome::PasswordRequired,
            format!(
                "all {} passwords failed; last: {}",
                passwords.len(),
                last_detail
            ),
        ))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PasswordList;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn request(mode: ExtractMode, encoding: Option<&str>) -> ExtractRequest {
        ExtractRequest {
            parts: vec![PathBuf::from("/in/a.rar")],
            output_dir: PathBuf::from("/work/out"),
            format: ArchiveFormat::Rar,
            passwords: Arc::new(PasswordList::new(vec!["pw".into()])),
            mode,
            encoding: encoding.map(String::from),
            cancel: CancellationToken::new(),
            timeout: Duration::from_secs(5),
        }
    }

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_from_path_returns_none_for_nonexistent_binary() {
        let result = which::which("nonexistent-unrar-binary-xyz");
        assert!(result.is_err());
    }

    #[test]
    fn test_discover_respects_search_path_toggle() {
        let tools = ToolsConfig {
            search_path: false,
            unrar_path: Some(PathBuf::from("/opt/unrar")),
            ..Default::default()
        };
        let found = CliBackend::discover(&tools);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].tool(), CliTool::Unrar);
        assert_eq!(found[0].binary_path, PathBuf::from("/opt/unrar"));
    }

    #[test]
    fn test_unrar_args_for_partial_and_empty_password() {
        let backend = CliBackend::new(CliTool::Unrar, PathBuf::from("unrar"));
        let args = strings(backend.build_args(&request(ExtractMode::Partial, None), Some("")));
        assert!(args.contains(&"-kb".to_string()));
        assert!(args.contains(&"-p-".to_string()));
        assert!(args.last().unwrap().ends_with('/'));
    }

    #[test]
    fn test_sevenzip_args_carry_password_and_code_page() {
        let backend = CliBackend::new(CliTool::SevenZip, PathBuf::from("7z"));
        let args = strings(backend.build_args(&request(ExtractMode::Normal, Some("cp932")), Some("pw")));
        assert_eq!(args[0], "x");
        assert!(args.contains(&"-ppw".to_string()));
        assert!(args.contains(&"-mcp=932".to_string()));
        assert!(args.contains(&"-o/work/out".to_string()));
        assert_eq!(args.last().unwrap(), "/in/a.rar");
    }

    #[test]
    fn test_unzip_args_use_encoding_flag() {
        let backend = CliBackend::new(CliTool::Unzip, PathBuf::from("unzip"));
        let args = strings(backend.build_args(&request(ExtractMode::Normal, Some("cp866")), Some("pw")));
        let o = args.iter().position(|a| a == "-O").unwrap();
        assert_eq!(args[o + 1], "cp866");
        let p = args.iter().position(|a| a == "-P").unwrap();
        assert_eq!(args[p + 1], "pw");
    }

    #[test]
    fn test_classify_failure() {
        assert_eq!(
            classify_failure(CliTool::Unrar, Some(11), ""),
            Failure::WrongPassword
        );
        assert_eq!(
            classify_failure(CliTool::SevenZip, Some(2), "ERROR: Wrong password : a.txt"),
            Failure::WrongPassword
        );
        assert_eq!(
            classify_failure(CliTool::SevenZip, Some(2), "ERROR: Can not open the file as archive"),
            Failure::Unsupported
        );
        assert_eq!(
            classify_failure(CliTool::SevenZip, Some(2), "ERROR: Data Error : movie.mkv"),
            Failure::Damaged
        );
        assert_eq!(
            classify_failure(CliTool::Unzip, Some(9), "End-of-central-directory signature not found"),
            Failure::Damaged
        );
    }

    #[test]
    fn test_summary_line_takes_last_non_empty() {
        assert_eq!(summary_line("a\nb\n\n  \n"), "b");
        assert_eq!(summary_line(""), "no output");
    }

    #[tokio::test]
    async fn test_invalid_binary_is_an_error_not_a_report() {
        let backend = CliBackend::new(
            CliTool::Tar,
            PathBuf::from("/nonexistent/path/to/tar-xyz"),
        );
        let dir = tempfile::TempDir::new().unwrap();
        let mut req = request(ExtractMode::Normal, None);
        req.format = ArchiveFormat::Tar;
        req.output_dir = dir.path().join("out");
        let result = backend.extract(&req).await;
        assert!(matches!(result, Err(Error::ExternalTool(_))));
    }

    #[tokio::test]
    async fn test_unsupported_modes_are_refused_before_spawning() {
        let backend = CliBackend::new(CliTool::Tar, PathBuf::from("/nonexistent/tar"));
        let report = backend
            .extract(&request(ExtractMode::Partial, None))
            .await
            .unwrap();
        assert_eq!(report.outcome, BackendOutcome::UnsupportedOperation);
    }
}
