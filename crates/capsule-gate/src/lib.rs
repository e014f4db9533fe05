//! # Capsule Gate
//!
//! Composes the kernel's pure checks into gate runs over a capsule on disk,
//! and owns the operations that act on a verdict: STOP/NEED diagnostics,
//! schema version bumps, bundle packaging and watch mode.
//!
//! ```text
//! Orchestrator::run_capsule
//!     Init → PerDocumentChecks → Aggregate → Decided(gate)
//!          → [ImplementableElevation] → Done
//!     │
//!     ├── reports/run_log.jsonl, provenance.jsonl, run_summary.md
//!     ├── bump_schema  → rewritten documents + schema, provenance row
//!     └── package      → <output_root>/capsules/<bundle>/ + verification log
//! ```

pub mod bundle;
pub mod diagnostics;
pub mod error;
pub mod evolution;
pub mod orchestrator;
pub mod watch;

pub use bundle::{
    BUNDLE_DIGEST_PREFIX, BUNDLES_DIR, MANIFEST_FILE, MANIFEST_SCHEMA, Manifest, ManifestFile,
    ManifestPolicy, PackageOutcome, PackageRequest, blocking_verdicts, bundle_name, package,
    render_bundle_summary,
};
pub use diagnostics::{StopNeed, render_run_summary, summary_line};
pub use error::{EvolutionError, GateError, PackageError};
pub use evolution::{BumpOutcome, BumpRequest, bump_schema, rewrite_document};
pub use orchestrator::{Orchestrator, RunOptions, RunState, run_all_features};
pub use watch::{WatchStats, run_watch};
