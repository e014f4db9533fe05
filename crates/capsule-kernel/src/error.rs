//! Error types for kernel operations.
//!
//! Rule violations are never errors: they are [`crate::Verdict`]s. Errors
//! are reserved for conditions that prevent the engine from evaluating at
//! all, such as an unreadable configuration layer.

use std::path::PathBuf;

/// Configuration could not be resolved.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config layer {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config layer {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("config profile not found: {}", .0.display())]
    ProfileMissing(PathBuf),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("forbidden pattern `{id}` does not compile: {source}")]
    Pattern { id: String, source: regex::Error },
}

impl ConfigError {
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            ConfigError::Read { path, .. }
            | ConfigError::Parse { path, .. }
            | ConfigError::ProfileMissing(path) => Some(path),
            ConfigError::Invalid(_) | ConfigError::Pattern { .. } => None,
        }
    }
}

/// The output contract schema could not be interpreted.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("schema is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("schema must be a JSON object")]
    NotAnObject,

    #[error("schema `version` is missing")]
    MissingVersion,

    #[error("schema `version` `{0}` is not a semantic version")]
    InvalidVersion(String),

    #[error("schema `required` must be an array of strings")]
    InvalidRequired,
}
