//! Exclusive create-new lock files.

use crate::atomic::ensure_parent;
use crate::error::StoreError;
use chrono::Utc;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// `<output_root>/.locks/<feature_id>.lock`
pub fn feature_lock_path(output_root: &Path, feature_id: &str) -> PathBuf {
    output_root.join(".locks").join(format!("{feature_id}.lock"))
}

/// Held for the lifetime of the guard; the file is removed on drop.
#[derive(Debug)]
pub struct FileLockGuard {
    lock_path: PathBuf,
    _file: File,
}

impl FileLockGuard {
    /// Acquire or fail immediately with [`StoreError::LockBusy`].
    pub fn acquire(lock_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let lock_path = lock_path.into();
        ensure_parent(&lock_path)?;

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(mut file) => {
                let _ = writeln!(
                    file,
                    "pid={}\nutc={}",
                    std::process::id(),
                    Utc::now().to_rfc3339()
                );
                tracing::debug!(lock = %lock_path.display(), "lock acquired");
                Ok(Self {
                    lock_path,
                    _file: file,
                })
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(StoreError::LockBusy { lock_path })
            }
            Err(err) => Err(StoreError::io(&lock_path, err)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_busy_until_release() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = feature_lock_path(dir.path(), "demo-app");

        let guard = FileLockGuard::acquire(&path).expect("first acquire");
        let err = FileLockGuard::acquire(&path).expect_err("second acquire must fail");
        assert!(err.is_lock_busy());

        drop(guard);
        assert!(!path.exists());
        FileLockGuard::acquire(&path).expect("acquire after release");
    }
}
