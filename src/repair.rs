//! Format-specific archive repair
//!
//! Repair always works on a scratch copy: the tool gets a copy of the archive inside the
//! attempt's work directory and the original input is never opened for writing.

use crate::config::ToolsConfig;
use crate::error::{Error, Result};
use crate::types::ArchiveFormat;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Trait for archive repair tools
#[async_trait]
pub trait RepairTool: Send + Sync {
    /// Human-readable name for logging
    fn name(&self) -> &str;

    /// Format this tool repairs
    fn format(&self) -> ArchiveFormat;

    /// Repair `archive` (already a scratch copy) and return the repaired file
    ///
    /// The repaired file is written inside `work_dir`.
    async fn repair(
        &self,
        archive: &Path,
        work_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf>;
}

/// Ordered collection of repair tools
#[derive(Clone, Default)]
pub struct RepairRegistry {
    tools: Vec<Arc<dyn RepairTool>>,
}

impl RepairRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every repair tool that is configured or found in PATH
    pub fn discover(tools: &ToolsConfig) -> Self {
        let mut registry = Self::new();
        let locate = |configured: &Option<PathBuf>, name: &str| match configured {
            Some(path) => Some(path.clone()),
            None if tools.search_path => which::which(name).ok(),
            None => None,
        };
        if let Some(path) = locate(&tools.zip_path, "zip") {
            registry.register(Arc::new(ZipFixTool::new(path)));
        }
        if let Some(path) = locate(&tools.rar_path, "rar") {
            registry.register(Arc::new(RarRepairTool::new(path)));
        }
        registry
    }

    /// Append a tool
    pub fn register(&mut self, tool: Arc<dyn RepairTool>) {
        self.tools.push(tool);
    }

    /// First tool that repairs `format`
    pub fn for_format(&self, format: ArchiveFormat) -> Option<Arc<dyn RepairTool>> {
        self.tools.iter().find(|t| t.format() == format).cloned()
    }
}

impl std::fmt::Debug for RepairRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.tools.iter().map(|t| t.name()))
            .finish()
    }
}

/// Run a repair command to completion, killing it if `cancel` fires
async fn run_tool(
    mut command: Command,
    stdin: &[u8],
    cancel: &CancellationToken,
    name: &str,
) -> Result<()> {
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::ExternalTool(format!("failed to execute {}: {}", name, e)))?;

    // Fed from its own task so a tool that never reads cannot hold up cancellation.
    let feeder = child.stdin.take().map(|mut input| {
        let data = stdin.to_vec();
        let tool = name.to_string();
        tokio::spawn(async move {
            if let Err(e) = input.write_all(&data).await {
                // The tool may exit without reading.
                debug!(%tool, error = %e, "could not write to tool stdin");
            }
        })
    });

    let output = tokio::select! {
        output = child.wait_with_output() => output?,
        _ = cancel.cancelled() => {
            if let Some(feeder) = feeder {
                feeder.abort();
            }
            return Err(Error::Cancelled);
        }
    };

    if !output.status.success() {
        return Err(Error::ExternalTool(format!(
            "{} exited with {}: {}",
            name,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// ZIP repair via Info-ZIP `zip -FF`
#[derive(Debug, Clone)]
pub struct ZipFixTool {
    binary_path: PathBuf,
}

impl ZipFixTool {
    /// Create a new tool with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self { binary_path }
    }
}

#[async_trait]
impl RepairTool for ZipFixTool {
    fn name(&self) -> &str {
        "zip -FF"
    }

    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Zip
    }

    async fn repair(
        &self,
        archive: &Path,
        work_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let fixed = work_dir.join("fixed.zip");
        debug!(?archive, ?fixed, "repairing ZIP archive");

        let mut command = Command::new(&self.binary_path);
        command.arg("-FF").arg(archive).arg("--out").arg(&fixed);
        // zip -FF asks whether a split archive is single-disk.
        run_tool(command, b"y\n", cancel, self.name()).await?;

        if !fixed.is_file() {
            return Err(Error::ExternalTool(
                "zip -FF reported success but wrote no archive".into(),
            ));
        }
        info!(?archive, "ZIP archive repaired");
        Ok(fixed)
    }
}

/// RAR repair via RARLAB `rar r` (needs a recovery record for best results)
#[derive(Debug, Clone)]
pub struct RarRepairTool {
    binary_path: PathBuf,
}

impl RarRepairTool {
    /// Create a new tool with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self { binary_path }
    }
}

#[async_trait]
impl RepairTool for RarRepairTool {
    fn name(&self) -> &str {
        "rar r"
    }

    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Rar
    }

    async fn repair(
        &self,
        archive: &Path,
        work_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        debug!(?archive, "repairing RAR archive");

        let mut command = Command::new(&self.binary_path);
        command.arg("r").arg("-y").arg(archive).current_dir(work_dir);
        run_tool(command, b"", cancel, self.name()).await?;

        // rar writes fixed.<name> (RAR4) or rebuilt.<name> (RAR5) into the working directory.
        let name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        for prefix in ["fixed.", "rebuilt."] {
            let candidate = work_dir.join(format!("{}{}", prefix, name));
            if candidate.is_file() {
                info!(?archive, "RAR archive repaired");
                return Ok(candidate);
            }
        }

        // Repaired in place.
        Ok(archive.to_path_buf())
    }
}
