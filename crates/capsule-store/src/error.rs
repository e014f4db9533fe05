//! Errors from filesystem operations.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{}: line {line}: parse error: {message}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("corrupted file {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("lock busy: {}", lock_path.display())]
    LockBusy { lock_path: PathBuf },

    #[error("invalid registry {}: {message}", path.display())]
    Registry { path: PathBuf, message: String },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_lock_busy(&self) -> bool {
        matches!(self, StoreError::LockBusy { .. })
    }
}
