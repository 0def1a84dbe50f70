// Error taxonomy for the session layer.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SessionError>;

/// Coarse classification of a [`SessionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotInitialized,
    InvalidInput,
    NotFound,
    StorageUnwritable,
    NoPortAvailable,
    MetadataTimeout,
    EngineFailure,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Torrent client not initialized")]
    NotInitialized,

    #[error("{0}")]
    InvalidInput(String),

    #[error("Direct HTTP/HTTPS torrent links are not supported. Please use a magnet link instead.")]
    DirectLinkUnsupported,

    #[error("File index out of range (0-{})", .count.saturating_sub(1))]
    FileIndexOutOfRange { index: i64, count: usize },

    #[error("{0}")]
    NotFound(String),

    #[error("Cannot write to download directory {}: {source}", .path.display())]
    StorageUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Listener setup failures other than an exhausted port range.
    #[error("{context}: {source}")]
    Listener {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No available ports found ({span} ports tried from {base})")]
    NoPortAvailable { base: u16, span: u16 },

    #[error("Timed out waiting for torrent info after {}s", .0.as_secs())]
    MetadataTimeout(Duration),

    #[error("Transfer engine failure: {0:#}")]
    EngineFailure(#[from] anyhow::Error),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::NotInitialized => ErrorKind::NotInitialized,
            SessionError::InvalidInput(_)
            | SessionError::DirectLinkUnsupported
            | SessionError::FileIndexOutOfRange { .. } => ErrorKind::InvalidInput,
            SessionError::NotFound(_) => ErrorKind::NotFound,
            SessionError::StorageUnwritable { .. } | SessionError::Io { .. } => {
                ErrorKind::StorageUnwritable
            }
            SessionError::NoPortAvailable { .. } | SessionError::Listener { .. } => {
                ErrorKind::NoPortAvailable
            }
            SessionError::MetadataTimeout(_) => ErrorKind::MetadataTimeout,
            SessionError::EngineFailure(_) => ErrorKind::EngineFailure,
        }
    }

    pub(crate) fn unknown_transfer(hash: &str) -> Self {
        SessionError::NotFound(format!("Torrent with hash {hash} not found"))
    }

    pub(crate) fn listener(context: impl Into<String>, source: std::io::Error) -> Self {
        SessionError::Listener {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        SessionError::Io {
            context: context.into(),
            source,
        }
    }
}
