use std::path::PathBuf;

use thiserror::Error;

/// Why a single transfer failed. The `Display` text is what the operator sees.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Error downloading image: {source} ({url})")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Failed to connect to the server. HTTP error code: {status}")]
    HttpStatus { status: u16 },

    #[error("Invalid URL or URL does not point to an image: {url}")]
    NotAnImage { url: String },

    #[error("Error downloading image: {source}")]
    Network {
        #[source]
        source: reqwest::Error,
    },

    #[error("Error downloading image: {source}")]
    Read {
        #[source]
        source: std::io::Error,
    },

    #[error("Error downloading image: {source} ({})", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TransferError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn network(source: reqwest::Error) -> Self {
        Self::Network { source }
    }

    /// True for responses that were refused before any file was created.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::HttpStatus { .. } | Self::NotAnImage { .. })
    }
}

/// Errors returned to the operator-facing side of the manager.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("Please enter a valid image URL.")]
    EmptyUrl,

    #[error("download manager has shut down")]
    ShutDown,
}
