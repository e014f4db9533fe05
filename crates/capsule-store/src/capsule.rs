//! Loading a feature capsule from disk.
//!
//! Loading never fails because one document is unreadable: the failure is
//! kept in that document's slot so the orchestrator can report it as an
//! `io` verdict for that document alone.

use crate::atomic::read_text;
use crate::error::StoreError;
use capsule_kernel::config::EngineConfig;
use capsule_kernel::digest::sha256_hex;
use capsule_kernel::error::SchemaError;
use capsule_kernel::header::validate_feature_id;
use capsule_kernel::{Document, OutputContractSchema};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct DocumentSlot {
    /// File name relative to the capsule directory.
    pub name: String,
    pub path: PathBuf,
    pub content: Result<Document, String>,
}

#[derive(Debug)]
pub enum SchemaSlot {
    Missing,
    Unreadable(String),
    Invalid(SchemaError),
    Loaded(OutputContractSchema),
}

impl SchemaSlot {
    pub fn loaded(&self) -> Option<&OutputContractSchema> {
        match self {
            SchemaSlot::Loaded(schema) => Some(schema),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct CapsuleFiles {
    pub feature_id: String,
    pub dir: PathBuf,
    /// Markdown documents sorted by file name.
    pub documents: Vec<DocumentSlot>,
    pub schema_path: PathBuf,
    pub schema: SchemaSlot,
    /// Schema text as read at load time.
    pub schema_text: Option<String>,
    /// Required documents (in configured order) absent from the directory.
    pub missing: Vec<String>,
}

impl CapsuleFiles {
    /// Every input file of the capsule as loaded: documents plus the schema
    /// when present, sorted by name. Unreadable documents are omitted.
    ///
    /// These are the bytes the gate evaluated, so later edits on disk never
    /// reach a bundle.
    pub fn loaded_inputs(&self) -> Vec<(String, Vec<u8>)> {
        let mut inputs: Vec<(String, Vec<u8>)> = self
            .documents
            .iter()
            .filter_map(|slot| {
                let doc = slot.content.as_ref().ok()?;
                Some((slot.name.clone(), doc.raw.clone().into_bytes()))
            })
            .collect();
        if let Some(text) = &self.schema_text
            && let Some(name) = self.schema_path.file_name()
        {
            inputs.push((name.to_string_lossy().into_owned(), text.clone().into_bytes()));
        }
        inputs.sort();
        inputs
    }

    pub fn parsed_documents(&self) -> impl Iterator<Item = &Document> {
        self.documents
            .iter()
            .filter_map(|slot| slot.content.as_ref().ok())
    }
}

/// Read and parse one document, keeping a read failure as data.
pub fn load_document(path: impl AsRef<Path>, name: impl Into<String>) -> DocumentSlot {
    let path = path.as_ref();
    let name = name.into();
    let content = read_text(path)
        .map(|raw| Document::parse(name.clone(), raw))
        .map_err(|err| err.to_string());
    DocumentSlot {
        name,
        path: path.to_path_buf(),
        content,
    }
}

fn load_schema(path: &Path) -> (SchemaSlot, Option<String>) {
    if !path.exists() {
        return (SchemaSlot::Missing, None);
    }
    match read_text(path) {
        Err(err) => (SchemaSlot::Unreadable(err.to_string()), None),
        Ok(text) => match OutputContractSchema::parse(&text) {
            Ok(schema) => (SchemaSlot::Loaded(schema), Some(text)),
            Err(err) => (SchemaSlot::Invalid(err), Some(text)),
        },
    }
}

fn markdown_files(dir: &Path) -> Result<Vec<(String, PathBuf)>, StoreError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))? {
        let entry = entry.map_err(|e| StoreError::io(dir, e))?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "md") {
            files.push((entry.file_name().to_string_lossy().into_owned(), path));
        }
    }
    files.sort();
    Ok(files)
}

pub fn load_capsule(
    config: &EngineConfig,
    repo_root: &Path,
    feature_id: &str,
) -> Result<CapsuleFiles, StoreError> {
    let dir = config.capsule_dir(repo_root, feature_id);
    let documents: Vec<DocumentSlot> = markdown_files(&dir)?
        .into_iter()
        .map(|(name, path)| load_document(path, name))
        .collect();
    let schema_path = dir.join(&config.capsule.schema_file);
    let (schema, schema_text) = load_schema(&schema_path);
    let missing = config
        .capsule
        .required_documents
        .iter()
        .filter(|name| !dir.join(name.as_str()).is_file())
        .cloned()
        .collect();
    tracing::debug!(
        feature_id,
        documents = documents.len(),
        "capsule loaded from {}",
        dir.display()
    );
    Ok(CapsuleFiles {
        feature_id: feature_id.to_string(),
        dir,
        documents,
        schema_path,
        schema,
        schema_text,
        missing,
    })
}

/// Feature ids: subdirectories of the features directory whose names are
/// valid feature slugs, sorted.
pub fn list_features(config: &EngineConfig, repo_root: &Path) -> Result<Vec<String>, StoreError> {
    let dir = repo_root.join(&config.paths.features_dir);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut features = Vec::new();
    for entry in fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))? {
        let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        match validate_feature_id(&name) {
            Ok(()) => features.push(name),
            Err(reason) => {
                tracing::warn!(directory = %entry.path().display(), %reason, "skipping non-capsule directory");
            }
        }
    }
    features.sort();
    Ok(features)
}

/// Content fingerprint of the files directly inside a capsule directory.
///
/// Subdirectories (including reports) are excluded, so writing reports does
/// not change the fingerprint.
pub fn capsule_fingerprint(dir: &Path) -> Result<String, StoreError> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))? {
        let entry = entry.map_err(|e| StoreError::io(dir, e))?;
        let path = entry.path();
        if path.is_file() {
            entries.push((entry.file_name().to_string_lossy().into_owned(), path));
        }
    }
    entries.sort();
    let mut material = Vec::new();
    for (name, path) in entries {
        let bytes = fs::read(&path).map_err(|e| StoreError::io(&path, e))?;
        material.extend_from_slice(name.as_bytes());
        material.push(0);
        material.extend_from_slice(sha256_hex(&bytes).as_bytes());
        material.push(b'\n');
    }
    Ok(sha256_hex(&material))
}
