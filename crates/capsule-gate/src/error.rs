//! Engine errors. Rule violations are verdicts, never these.

use crate::diagnostics::StopNeed;
use crate::orchestrator::RunState;
use capsule_kernel::{ConfigError, SchemaError};
use capsule_store::StoreError;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("illegal gate transition {from:?} -> {to:?}")]
    IllegalTransition { from: RunState, to: RunState },

    #[error("check worker panicked while checking {subject}")]
    WorkerPanicked { subject: String },

    #[error("invalid feature id: {0}")]
    InvalidFeatureId(String),
}

#[derive(Debug, thiserror::Error)]
pub enum EvolutionError {
    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("refusing to bump {}: {source}", path.display())]
    Schema { path: PathBuf, source: SchemaError },

    #[error("a bump note is required")]
    NoteRequired,
}

#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("packaging lock busy: {}", .0.display())]
    LockBusy(PathBuf),

    #[error("packaging preconditions not met for {}", .0.target)]
    Precondition(StopNeed),

    #[error("bundle {} already exists with different contents", .0.display())]
    Conflict(PathBuf),
}

impl PackageError {
    pub(crate) fn from_store(err: StoreError) -> Self {
        match err {
            StoreError::LockBusy { lock_path } => PackageError::LockBusy(lock_path),
            other => PackageError::Store(other),
        }
    }
}
