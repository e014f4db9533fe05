//! # Capsule Kernel
//!
//! The pure half of the capsule engine: the document model, verdicts and
//! gates, layered configuration, and every check the gate orchestrator
//! composes.
//!
//! Checks never touch the filesystem. Each takes parsed input plus the
//! resolved configuration and returns [`Verdict`]s; a rule violation is data,
//! not an error.
//!
//! ## Architecture
//!
//! ```text
//! EngineConfig          ← defaults → profile → repo overlay → feature-local
//!     │
//! Document              ← header block + sections, parsed from markdown
//!     │
//! per-document checks   ← header, size, leakage
//!     │
//! capsule checks        ← acceptance, concurrency, open questions, registry
//!     │
//! Verdict / Gate        ← worst-of aggregation, implementable elevation
//! ```

pub mod acceptance;
pub mod concurrency;
pub mod config;
pub mod digest;
pub mod document;
pub mod error;
pub mod gate;
pub mod header;
pub mod policy;
pub mod questions;
pub mod registry;
pub mod schema;
pub mod semver;

pub use acceptance::{ChecklistRow, check_acceptance, extract_checklist};
pub use concurrency::{
    TupleSource, TupleValue, check_concurrency, source_from_document, source_from_schema,
};
pub use config::{ConfigLayers, EngineConfig, ProfileSource, ResolvedConfig};
pub use digest::{canonical_json_bytes, digest_value, sha256_hex};
pub use document::Document;
pub use error::{ConfigError, SchemaError};
pub use gate::{
    CAPSULE_SUBJECT, FailureClass, Gate, GateRun, Provenance, Verdict, aggregate,
    elevate_warnings,
};
pub use header::{SchemaRef, check_header, is_placeholder};
pub use policy::{Policy, PolicySnapshot, TokenEstimator, check_leakage, check_size};
pub use questions::{OpenQuestion, check_open_questions, scan_open_questions};
pub use registry::{Registry, check_registry};
pub use schema::OutputContractSchema;
pub use semver::{BumpKind, SemVer};
