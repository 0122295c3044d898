use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CONCURRENCY: usize = 5;
pub const CHUNK_SIZE: usize = 4096;
pub const DEFAULT_PAUSE_POLL: Duration = Duration::from_secs(1);
pub const USER_AGENT: &str = concat!("imgdl/", env!("CARGO_PKG_VERSION"));

/// Runtime knobs for the download manager.
#[derive(Debug, Clone)]
pub struct Settings {
    pub download_dir: PathBuf,
    pub concurrency: usize,
    pub chunk_size: usize,
    /// How often a paused transfer re-checks the pause flag.
    pub pause_poll: Duration,
    /// How long `cancel` holds the flag raised before resetting it.
    pub cancel_pulse: Duration,
    /// `None` leaves the client without a connect timeout.
    pub connect_timeout: Option<Duration>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            concurrency: DEFAULT_CONCURRENCY,
            chunk_size: CHUNK_SIZE,
            pause_poll: DEFAULT_PAUSE_POLL,
            cancel_pulse: Duration::ZERO,
            connect_timeout: None,
        }
    }
}

impl Settings {
    #[cfg(test)]
    pub fn with_download_dir(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
            ..Self::default()
        }
    }

    pub fn build_client(&self) -> reqwest::Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
        if let Some(timeout) = self.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        builder.build()
    }
}

pub fn default_download_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}
