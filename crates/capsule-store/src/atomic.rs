//! Temp-file-then-rename writes.

use crate::error::StoreError;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Sibling path unique to this process and instant.
pub fn tmp_write_path(path: &Path) -> PathBuf {
    let unique = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let mut tmp: OsString = path.as_os_str().to_os_string();
    tmp.push(format!(".tmp.{}.{}", std::process::id(), unique));
    PathBuf::from(tmp)
}

pub(crate) fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    Ok(())
}

/// Replace `path` with `bytes`. Readers see either the old or the new file.
pub fn write_atomic(path: impl AsRef<Path>, bytes: impl AsRef<[u8]>) -> Result<(), StoreError> {
    let path = path.as_ref();
    ensure_parent(path)?;

    let tmp_path = tmp_write_path(path);
    let write_result = (|| -> Result<(), StoreError> {
        let file = File::create(&tmp_path).map_err(|e| StoreError::io(&tmp_path, e))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(bytes.as_ref())
            .map_err(|e| StoreError::io(&tmp_path, e))?;
        writer.flush().map_err(|e| StoreError::io(&tmp_path, e))?;
        let file = writer
            .into_inner()
            .map_err(|e| StoreError::io(&tmp_path, e.into_error()))?;
        file.sync_all().map_err(|e| StoreError::io(&tmp_path, e))?;
        Ok(())
    })();

    if let Err(error) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(error);
    }

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        StoreError::io(path, e)
    })?;

    sync_parent(path)
}

pub(crate) fn sync_parent(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        let dir = File::open(parent).map_err(|e| StoreError::io(parent, e))?;
        dir.sync_all().map_err(|e| StoreError::io(parent, e))?;
    }
    Ok(())
}

/// Read a text file, rejecting NUL bytes and invalid UTF-8.
pub fn read_text(path: impl AsRef<Path>) -> Result<String, StoreError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| StoreError::io(path, e))?;
    if bytes.contains(&0) {
        return Err(StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: "contains NUL byte(s)".to_string(),
        });
    }
    String::from_utf8(bytes).map_err(|_| StoreError::Corrupt {
        path: path.to_path_buf(),
        reason: "contains non-UTF-8 byte sequence(s)".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_atomic_replaces_contents_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/schema.json");
        write_atomic(&path, "first").expect("first write");
        write_atomic(&path, "second").expect("second write");

        assert_eq!(fs::read_to_string(&path).expect("read back"), "second");
        let entries: Vec<_> = fs::read_dir(dir.path().join("nested"))
            .expect("list")
            .filter_map(Result::ok)
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn read_text_rejects_nul_and_non_utf8() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nul = dir.path().join("nul.md");
        fs::write(&nul, b"abc\0def").expect("fixture");
        assert!(matches!(read_text(&nul), Err(StoreError::Corrupt { .. })));

        let bad = dir.path().join("bad.md");
        fs::write(&bad, [0xff, 0xfe]).expect("fixture");
        match read_text(&bad) {
            Err(StoreError::Corrupt { reason, .. }) => assert!(reason.contains("non-UTF-8")),
            other => panic!("expected corrupt file error, got {other:?}"),
        }
    }
}
