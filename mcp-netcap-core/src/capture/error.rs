//! Errors surfaced by the capture engine's public API.
//!
//! Transient I/O and malformed events never reach this type; they are logged
//! and skipped inside the engine.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// `start()` was called before a log source was attached.
    #[error("capture engine not configured: attach a browser session before starting")]
    NotConfigured,

    #[error("network capture is already running (logging to {0})")]
    AlreadyCapturing(PathBuf),

    /// The requested log directory already holds a session index.
    #[error("log directory {0} already contains a capture session")]
    LogDirInUse(PathBuf),

    #[error("network capture is not running")]
    NotCapturing,

    #[error("invalid search pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("no captured request with id '{0}'")]
    RecordNotFound(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed capture file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl CaptureError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
