//! Per-capsule reports and the cross-run verification log.
//!
//! ```text
//! <capsule>/reports/run_log.jsonl      one line per verdict, every run
//! <capsule>/reports/provenance.jsonl   one line per recorded event
//! <capsule>/reports/run_summary.md     latest run, overwritten
//! <output_root>/verification_log.jsonl one line per successful package
//! ```

use crate::atomic::write_atomic;
use crate::error::StoreError;
use crate::jsonl::{append_jsonl, append_jsonl_all};
use capsule_kernel::config::EngineConfig;
use capsule_kernel::{Gate, GateRun, Provenance, Verdict};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const RUN_LOG_FILE: &str = "run_log.jsonl";
pub const PROVENANCE_FILE: &str = "provenance.jsonl";
pub const SUMMARY_FILE: &str = "run_summary.md";
pub const VERIFICATION_LOG_FILE: &str = "verification_log.jsonl";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunLogLine<'a> {
    run_id: &'a str,
    timestamp: DateTime<Utc>,
    target: &'a str,
    #[serde(flatten)]
    verdict: &'a Verdict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvenanceEvent {
    Validate,
    BumpSchema,
    Package,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceRecord {
    pub timestamp: DateTime<Utc>,
    pub event: ProvenanceEvent,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<Gate>,
    #[serde(flatten)]
    pub context: Provenance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_version: Option<String>,
}

impl ProvenanceRecord {
    pub fn new(event: ProvenanceEvent, target: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
            target: target.into(),
            run_id: None,
            gate: None,
            context: Provenance::default(),
            note: None,
            from_version: None,
            to_version: None,
        }
    }

    pub fn for_run(run: &GateRun) -> Self {
        Self {
            run_id: Some(run.run_id.clone()),
            gate: Some(run.gate),
            context: run.provenance.clone(),
            ..Self::new(ProvenanceEvent::Validate, run.target.clone())
        }
    }
}

/// One successful packaging, appended to the cross-run verification log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRecord {
    pub timestamp: DateTime<Utc>,
    pub feature_id: String,
    pub schema_version: String,
    pub revision: String,
    pub bundle: String,
    pub bundle_digest: String,
    pub policy_digest: String,
    pub run_id: String,
    /// The bundle already existed with identical contents.
    pub reused: bool,
}

pub fn append_verification(output_root: &Path, record: &VerificationRecord) -> Result<(), StoreError> {
    append_jsonl(output_root.join(VERIFICATION_LOG_FILE), record)
}

/// The reports area of one capsule.
#[derive(Debug, Clone)]
pub struct ReportsStore {
    dir: PathBuf,
}

impl ReportsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn for_capsule(config: &EngineConfig, repo_root: &Path, feature_id: &str) -> Self {
        Self::new(
            config
                .capsule_dir(repo_root, feature_id)
                .join(&config.paths.reports_dir),
        )
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn run_log_path(&self) -> PathBuf {
        self.dir.join(RUN_LOG_FILE)
    }

    pub fn provenance_path(&self) -> PathBuf {
        self.dir.join(PROVENANCE_FILE)
    }

    pub fn summary_path(&self) -> PathBuf {
        self.dir.join(SUMMARY_FILE)
    }

    /// Append one line per verdict of `run`.
    pub fn append_run(&self, run: &GateRun) -> Result<(), StoreError> {
        let lines: Vec<RunLogLine<'_>> = run
            .verdicts
            .iter()
            .map(|verdict| RunLogLine {
                run_id: &run.run_id,
                timestamp: run.started_at,
                target: &run.target,
                verdict,
            })
            .collect();
        append_jsonl_all(self.run_log_path(), &lines)
    }

    pub fn append_provenance(&self, record: &ProvenanceRecord) -> Result<(), StoreError> {
        append_jsonl(self.provenance_path(), record)
    }

    pub fn write_summary(&self, text: &str) -> Result<(), StoreError> {
        write_atomic(self.summary_path(), text)
    }
}
