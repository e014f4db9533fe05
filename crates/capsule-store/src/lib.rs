//! # capsule-store
//!
//! Filesystem layer for capsules.
//!
//! This crate provides:
//! - capsule loading (documents, output contract schema, missing required files)
//! - registry loading and template discovery
//! - append-only JSONL reports and the cross-run verification log
//! - temp-then-rename writes and create-new lock files
//!
//! It does not decide gates. Check logic lives in `capsule-kernel`; run
//! orchestration lives in `capsule-gate`.

pub mod atomic;
pub mod capsule;
pub mod error;
pub mod jsonl;
pub mod lock;
pub mod registry;
pub mod reports;

pub use atomic::{read_text, tmp_write_path, write_atomic};
pub use capsule::{
    CapsuleFiles, DocumentSlot, SchemaSlot, capsule_fingerprint, list_features, load_capsule,
    load_document,
};
pub use error::StoreError;
pub use jsonl::{append_jsonl, append_jsonl_all, read_jsonl};
pub use lock::{FileLockGuard, feature_lock_path};
pub use registry::{discover_templates, load_registry};
pub use reports::{
    ProvenanceEvent, ProvenanceRecord, ReportsStore, VerificationRecord, append_verification,
};
