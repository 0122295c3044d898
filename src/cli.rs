use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::settings::{self, Settings};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Image URLs to queue before the console starts
    #[arg(index = 1)]
    pub urls: Vec<String>,

    /// File with one URL per line to queue before the console starts
    #[arg(short = 't', long = "tasks-file")]
    pub tasks_file: Option<PathBuf>,

    /// Directory to save downloaded files (defaults to the home directory)
    #[arg(short = 'd', long = "download-dir")]
    pub download_dir: Option<PathBuf>,

    /// Maximum number of concurrent downloads
    #[arg(short = 'c', long, default_value_t = settings::DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// How often a paused download re-checks the pause flag, in milliseconds
    #[arg(long = "pause-poll-ms", default_value_t = 1000)]
    pub pause_poll_ms: u64,

    /// How long the cancel signal stays raised, in milliseconds
    #[arg(long = "cancel-pulse-ms", default_value_t = 0)]
    pub cancel_pulse_ms: u64,

    /// Connect timeout in seconds (no timeout when omitted)
    #[arg(long = "connect-timeout")]
    pub connect_timeout: Option<u64>,

    /// Emit status events as JSON lines on stdout instead of progress bars
    #[arg(long)]
    pub json: bool,

    /// Do not read commands from stdin; exit once queued downloads finish
    #[arg(long = "no-console")]
    pub no_console: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short = 'q', long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Args {
    pub fn settings(&self) -> Settings {
        let mut download_dir = self
            .download_dir
            .clone()
            .unwrap_or_else(settings::default_download_dir);
        if download_dir.is_relative() {
            if let Ok(cwd) = std::env::current_dir() {
                download_dir = cwd.join(download_dir);
            }
        }

        Settings {
            download_dir,
            concurrency: self.concurrency.max(1),
            chunk_size: settings::CHUNK_SIZE,
            pause_poll: Duration::from_millis(self.pause_poll_ms.max(1)),
            cancel_pulse: Duration::from_millis(self.cancel_pulse_ms),
            connect_timeout: self.connect_timeout.map(Duration::from_secs),
        }
    }

    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}
