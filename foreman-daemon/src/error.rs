use std::path::PathBuf;

use thiserror::Error;

use foreman_core::error::CoordinatorError;

/// Error surface for the daemon runtime and socket protocol.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
