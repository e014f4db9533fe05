//! Append-only JSONL logs: one JSON value per line.

use crate::atomic::{ensure_parent, read_text};
use crate::error::StoreError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Append one record as a single line.
pub fn append_jsonl<T: Serialize>(path: impl AsRef<Path>, record: &T) -> Result<(), StoreError> {
    append_jsonl_all(path, std::slice::from_ref(record))
}

/// Append several records with one write, so a run's lines stay contiguous.
pub fn append_jsonl_all<T: Serialize>(
    path: impl AsRef<Path>,
    records: &[T],
) -> Result<(), StoreError> {
    let path = path.as_ref();
    if records.is_empty() {
        return Ok(());
    }
    ensure_parent(path)?;

    let mut buffer = Vec::new();
    for record in records {
        serde_json::to_writer(&mut buffer, record)?;
        buffer.push(b'\n');
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| StoreError::io(path, e))?;
    file.write_all(&buffer).map_err(|e| StoreError::io(path, e))?;
    file.sync_data().map_err(|e| StoreError::io(path, e))?;
    Ok(())
}

/// Read every record. A missing file reads as empty.
pub fn read_jsonl<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>, StoreError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = read_text(path)?;
    let mut records = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let record = serde_json::from_str(trimmed).map_err(|e| StoreError::Parse {
            path: path.to_path_buf(),
            line: idx + 1,
            message: e.to_string(),
        })?;
        records.push(record);
    }
    Ok(records)
}
