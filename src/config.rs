//! Configuration types for extractall

use crate::error::{Error, Result};
use crate::types::Mode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Progress monitor settings (stall detection and hard timeout)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Hard ceiling for one strategy attempt (default: 300s)
    #[serde(default = "default_stuck_timeout")]
    pub stuck_timeout: Duration,

    /// Abort when the output has not grown for this long (default: 120s)
    ///
    /// Must be shorter than `stuck_timeout` to have any effect.
    #[serde(default = "default_no_progress_timeout")]
    pub no_progress_timeout: Duration,

    /// How often the output target is sampled (default: 1s)
    #[serde(default = "default_poll_interval")]
    pub poll_interval: Duration,

    /// How long a cancelled attempt may take to wind down before it is abandoned (default: 5s)
    #[serde(default = "default_cancel_grace")]
    pub cancel_grace: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            stuck_timeout: default_stuck_timeout(),
            no_progress_timeout: default_no_progress_timeout(),
            poll_interval: default_poll_interval(),
            cancel_grace: default_cancel_grace(),
        }
    }
}

/// Nested archive rescanning (aggressive mode only)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NestedConfig {
    /// Maximum nesting depth; jobs at this depth or deeper are failed unextracted (default: 5)
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
}

impl Default for NestedConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

/// External tool paths and password configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Passwords to try, in priority order
    #[serde(default)]
    pub passwords: Vec<String>,

    /// Path to global password file (one password per line)
    #[serde(default)]
    pub password_file: Option<PathBuf>,

    /// Try empty password as fallback
    #[serde(default = "default_true")]
    pub try_empty_password: bool,

    /// Path to 7z executable (auto-detected if None)
    #[serde(default)]
    pub sevenzip_path: Option<PathBuf>,

    /// Path to unrar executable (auto-detected if None)
    #[serde(default)]
    pub unrar_path: Option<PathBuf>,

    /// Path to unzip executable (auto-detected if None)
    #[serde(default)]
    pub unzip_path: Option<PathBuf>,

    /// Path to tar executable (auto-detected if None)
    #[serde(default)]
    pub tar_path: Option<PathBuf>,

    /// Path to zip executable, used for ZIP repair (auto-detected if None)
    #[serde(default)]
    pub zip_path: Option<PathBuf>,

    /// Path to rar executable, used for RAR repair (auto-detected if None)
    #[serde(default)]
    pub rar_path: Option<PathBuf>,

    /// Whether to search PATH for external binaries if explicit paths not set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,

    /// Filename encodings tried by the encoding strategy, in order
    #[serde(default = "default_encodings")]
    pub encodings: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            passwords: Vec::new(),
            password_file: None,
            try_empty_password: true,
            sevenzip_path: None,
            unrar_path: None,
            unzip_path: None,
            tar_path: None,
            zip_path: None,
            rar_path: None,
            search_path: true,
            encodings: default_encodings(),
        }
    }
}

/// Where terminal directories, scratch space and the ledger live
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LayoutConfig {
    /// Root for the terminal directories (default: the input directory)
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Ledger file name inside the root (default: "extraction_state.json")
    #[serde(default)]
    pub state_file: Option<String>,
}

/// Main configuration for a run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Directory tree to process
    pub input_dir: PathBuf,

    /// Extraction mode (default: standard)
    #[serde(default)]
    pub mode: Mode,

    /// Keep the multipart strategy in the chain (default: true); detection groups sets either way
    #[serde(default = "default_true")]
    pub multipart: bool,

    /// Add the repair strategy to the chain (always on in aggressive mode)
    #[serde(default)]
    pub repair: bool,

    /// Reprocess jobs the ledger already marks as resolved
    #[serde(default)]
    pub force: bool,

    /// Number of concurrent workers (default: 2)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Progress monitor settings
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Nested rescanning settings
    #[serde(default)]
    pub nested: NestedConfig,

    /// External tools and passwords
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Directory layout
    #[serde(default)]
    pub layout: LayoutConfig,
}

impl Config {
    /// Create a configuration with defaults for the given input directory
    pub fn new(input_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            mode: Mode::default(),
            multipart: true,
            repair: false,
            force: false,
            workers: default_workers(),
            monitor: MonitorConfig::default(),
            nested: NestedConfig::default(),
            tools: ToolsConfig::default(),
            layout: LayoutConfig::default(),
        }
    }

    /// Load a configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("cannot read config file {}: {}", path.display(), e),
            key: None,
        })?;
        serde_json::from_str(&content).map_err(|e| Error::Config {
            message: format!("invalid config file {}: {}", path.display(), e),
            key: None,
        })
    }

    /// Check settings that would make the run meaningless or unsafe
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::config("workers", "must be at least 1"));
        }
        if self.nested.max_depth == 0 {
            return Err(Error::config(
                "nested.max_depth",
                "must be at least 1 (top-level archives have depth 0)",
            ));
        }
        if self.monitor.stuck_timeout.is_zero() {
            return Err(Error::config("monitor.stuck_timeout", "must be positive"));
        }
        if self.monitor.poll_interval.is_zero() {
            return Err(Error::config("monitor.poll_interval", "must be positive"));
        }
        if self.monitor.no_progress_timeout < self.monitor.poll_interval {
            return Err(Error::config(
                "monitor.no_progress_timeout",
                "must not be shorter than the poll interval",
            ));
        }
        Ok(())
    }

    /// Root directory for terminal directories and the ledger
    pub fn layout_root(&self) -> PathBuf {
        self.layout
            .root
            .clone()
            .unwrap_or_else(|| self.input_dir.clone())
    }

    /// Full path of the ledger file
    pub fn state_file(&self) -> PathBuf {
        let name = self
            .layout
            .state_file
            .as_deref()
            .unwrap_or(DEFAULT_STATE_FILE);
        self.layout_root().join(name)
    }

    /// Whether the repair strategy belongs in the chain
    pub fn repair_enabled(&self) -> bool {
        self.repair || self.mode == Mode::Aggressive
    }

    /// Whether successful outputs are rescanned for nested archives
    pub fn nested_enabled(&self) -> bool {
        self.mode == Mode::Aggressive
    }
}

/// Default ledger file name
pub const DEFAULT_STATE_FILE: &str = "extraction_state.json";

fn default_true() -> bool {
    true
}

fn default_workers() -> usize {
    2
}

fn default_stuck_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_no_progress_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_cancel_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_max_depth() -> u32 {
    5
}

fn default_encodings() -> Vec<String> {
    ["cp437", "cp850", "cp866", "cp932", "cp936", "cp949"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
