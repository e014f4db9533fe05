//! Registry file loading and template discovery.

use crate::atomic::read_text;
use crate::error::StoreError;
use capsule_kernel::registry::{Registry, normalize_path};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// Load `doc_type → template path`. A missing file is `Ok(None)`.
pub fn load_registry(path: &Path) -> Result<Option<Registry>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let text = read_text(path)?;
    let value: Value = serde_json::from_str(&text).map_err(|e| StoreError::Registry {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let Value::Object(map) = value else {
        return Err(StoreError::Registry {
            path: path.to_path_buf(),
            message: "expected a JSON object of doc_type -> template path".to_string(),
        });
    };
    let mut registry = Registry::new();
    for (doc_type, template) in map {
        let Some(template) = template.as_str() else {
            return Err(StoreError::Registry {
                path: path.to_path_buf(),
                message: format!("value for `{doc_type}` must be a string"),
            });
        };
        registry.insert(doc_type, normalize_path(template));
    }
    Ok(Some(registry))
}

/// Every `*.md` under `templates_dir`, as `/`-separated paths relative to
/// `repo_root`.
pub fn discover_templates(
    repo_root: &Path,
    templates_dir: &Path,
) -> Result<BTreeSet<String>, StoreError> {
    let mut found = BTreeSet::new();
    let start = repo_root.join(templates_dir);
    if !start.is_dir() {
        return Ok(found);
    }
    let mut pending = vec![start];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))? {
            let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "md")
                && let Ok(relative) = path.strip_prefix(repo_root)
            {
                let parts: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                found.insert(parts.join("/"));
            }
        }
    }
    Ok(found)
}
