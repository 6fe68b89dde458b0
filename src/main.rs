//! extractall command line entry point

use clap::{Parser, ValueEnum};
use extractall::{Config, Mode, Orchestrator, run_with_shutdown};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Extract every archive under a directory tree, resumably and without supervision
#[derive(Debug, Parser)]
#[command(name = "extractall", version, about)]
struct Cli {
    /// Directory to process
    input: PathBuf,

    /// Extraction mode
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Drop the multipart strategy from every mode
    ///
    /// Sets are still detected as one job each. Multi-tool, encoding and partial attempts may
    /// still extract them.
    #[arg(long)]
    no_multipart: bool,

    /// Try repair tools on archives that fail to extract
    #[arg(long)]
    repair: bool,

    /// Hard limit for a single extraction attempt, in seconds
    #[arg(long, value_name = "SECS")]
    stuck_timeout: Option<u64>,

    /// Abort an attempt whose output has not grown for this long, in seconds
    #[arg(long, value_name = "SECS")]
    no_progress_timeout: Option<u64>,

    /// Maximum nesting depth for archives found inside extracted output
    #[arg(long, value_name = "N")]
    max_depth: Option<u32>,

    /// Number of archives processed concurrently
    #[arg(long, value_name = "N")]
    workers: Option<usize>,

    /// Reprocess archives the ledger already marks as resolved
    #[arg(long)]
    force: bool,

    /// Password to try on encrypted archives (repeatable)
    #[arg(long = "password", value_name = "PW")]
    passwords: Vec<String>,

    /// File with one password per line
    #[arg(long, value_name = "FILE")]
    password_file: Option<PathBuf>,

    /// JSON configuration file; command line flags override it
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print every strategy attempt per archive after the summary
    #[arg(long)]
    history: bool,

    /// Log debug output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Conservative,
    Standard,
    Aggressive,
}

impl From<ModeArg> for Mode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Conservative => Mode::Conservative,
            ModeArg::Standard => Mode::Standard,
            ModeArg::Aggressive => Mode::Aggressive,
        }
    }
}

impl Cli {
    /// Configuration file (if any) with command line overrides applied
    fn into_config(self) -> extractall::Result<Config> {
        let mut config = match &self.config {
            Some(path) => {
                let mut config = Config::from_file(path)?;
                config.input_dir = self.input.clone();
                config
            }
            None => Config::new(self.input.clone()),
        };

        if let Some(mode) = self.mode {
            config.mode = mode.into();
        }
        if self.no_multipart {
            config.multipart = false;
        }
        config.repair |= self.repair;
        config.force |= self.force;
        if let Some(secs) = self.stuck_timeout {
            config.monitor.stuck_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.no_progress_timeout {
            config.monitor.no_progress_timeout = Duration::from_secs(secs);
        }
        if let Some(depth) = self.max_depth {
            config.nested.max_depth = depth;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        config.tools.passwords.extend(self.passwords);
        if self.password_file.is_some() {
            config.tools.password_file = self.password_file;
        }
        Ok(config)
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "extractall=debug" } else { "extractall=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // Logging is best effort; the summary still goes to stdout.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let history = cli.history;

    let result = async {
        let config = cli.into_config()?;
        let orchestrator = Orchestrator::new(config)?;
        run_with_shutdown(&orchestrator).await
    }
    .await;

    match result {
        Ok(summary) => {
            println!("{}", summary);
            if history && !summary.jobs.is_empty() {
                println!();
                print!("{}", summary.history());
            }
            if summary.interrupted {
                // Conventional exit status for SIGINT
                ExitCode::from(130)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            error!(error = %e, "run failed");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
