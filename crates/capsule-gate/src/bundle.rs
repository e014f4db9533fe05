//! Packaging: turn a fully verified capsule into an immutable bundle.
//!
//! ```text
//! <output_root>/capsules/<feature_id>-<semver>-<YYYY-MM-DD>-<revision>/
//!     <every capsule input file>
//!     manifest.json
//!     SUMMARY.md
//! ```
//!
//! The whole operation holds the per-feature lock. Preconditions are
//! re-checked with a fresh gate run; any open hard gate aborts before a
//! single output byte is written. The bundle is staged in a sibling
//! directory and renamed into place.

use crate::diagnostics::StopNeed;
use crate::error::{GateError, PackageError};
use crate::orchestrator::{Orchestrator, RunOptions};
use capsule_kernel::header::validate_feature_id;
use capsule_kernel::policy::CHECK_SIZE;
use capsule_kernel::{Gate, GateRun, PolicySnapshot, Verdict, digest_value, sha256_hex};
use capsule_store::{
    CapsuleFiles, FileLockGuard, ProvenanceEvent, ProvenanceRecord, StoreError,
    VerificationRecord, append_verification,
    feature_lock_path, read_text, tmp_write_path, write_atomic,
};
use capsule_vcs::RevisionProbe;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

pub const MANIFEST_SCHEMA: &str = "capsule.bundle.v1";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const SUMMARY_FILE: &str = "SUMMARY.md";
pub const BUNDLES_DIR: &str = "capsules";
pub const BUNDLE_DIGEST_PREFIX: &str = "bnd1_";

#[derive(Debug, Clone, Default)]
pub struct PackageRequest {
    pub feature_id: String,
    /// Tolerate documents above the hard token limit, recording the override.
    pub allow_gt_hard_tokens: bool,
    /// Bundle date; today (UTC) when unset.
    pub date: Option<NaiveDate>,
    /// Revision label; probed from git/jj when unset.
    pub revision: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestFile {
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestPolicy {
    pub digest: String,
    pub snapshot: PolicySnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema: String,
    pub feature_id: String,
    pub schema_version: String,
    pub date: String,
    pub revision: String,
    pub files: Vec<ManifestFile>,
    pub policy: ManifestPolicy,
    pub bundle_digest: String,
}

#[derive(Debug, Clone)]
pub struct PackageOutcome {
    pub bundle_dir: PathBuf,
    pub manifest: Manifest,
    /// The bundle already existed with an identical manifest.
    pub reused: bool,
    pub run: GateRun,
}

impl PackageOutcome {
    /// The single line printed on success.
    pub fn success_line(&self) -> String {
        format!("PACKAGED {}", self.bundle_dir.display())
    }
}

pub fn bundle_name(feature_id: &str, version: &str, date: NaiveDate, revision: &str) -> String {
    format!("{feature_id}-{version}-{}-{revision}", date.format("%Y-%m-%d"))
}

/// Verdicts that block packaging: every FAIL, and every WARN except size
/// warnings when the hard-size override is allowed.
pub fn blocking_verdicts(run: &GateRun, allow_gt_hard_tokens: bool) -> Vec<Verdict> {
    run.verdicts
        .iter()
        .filter(|v| match v.gate {
            Gate::Fail => true,
            Gate::Warn => !(allow_gt_hard_tokens && v.check == CHECK_SIZE),
            Gate::Pass | Gate::Skip => false,
        })
        .cloned()
        .collect()
}

pub fn package(
    orchestrator: &Orchestrator,
    request: &PackageRequest,
) -> Result<PackageOutcome, PackageError> {
    let feature_id = request.feature_id.as_str();
    validate_feature_id(feature_id).map_err(GateError::InvalidFeatureId)?;
    let output_root = orchestrator.output_root();

    let _lock = FileLockGuard::acquire(feature_lock_path(&output_root, feature_id))
        .map_err(PackageError::from_store)?;
    let capsule = orchestrator.load(feature_id)?;

    let options = RunOptions {
        allow_hard_size: request.allow_gt_hard_tokens,
        ..RunOptions::default()
    };
    let run = orchestrator.evaluate_capsule(&capsule, &options)?;
    orchestrator.record(feature_id, &run)?;

    let blocking = blocking_verdicts(&run, request.allow_gt_hard_tokens);
    let Some(schema) = capsule.schema.loaded().filter(|_| blocking.is_empty()) else {
        tracing::warn!(feature_id, blocking = blocking.len(), "packaging refused");
        return Err(PackageError::Precondition(StopNeed::new(feature_id, blocking)));
    };

    let schema_version = schema.version.to_string();
    let date = request.date.unwrap_or_else(|| Utc::now().date_naive());
    let revision = match &request.revision {
        Some(revision) => revision.clone(),
        None => RevisionProbe::new(orchestrator.repo_root()).current().id,
    };

    let contents = capsule.loaded_inputs();
    let manifest = build_manifest(
        orchestrator,
        &capsule,
        &contents,
        &schema_version,
        date,
        &revision,
    )?;

    let name = bundle_name(feature_id, &schema_version, date, &revision);
    let bundles = output_root.join(BUNDLES_DIR);
    let bundle_dir = bundles.join(&name);

    let reused = if bundle_dir.exists() {
        if !matches_existing(&bundle_dir, &manifest)? {
            return Err(PackageError::Conflict(bundle_dir));
        }
        tracing::info!(bundle = %bundle_dir.display(), "bundle already present; reusing");
        true
    } else {
        stage_and_commit(&bundles, &bundle_dir, &contents, &manifest, &run)?;
        false
    };

    append_verification(
        &output_root,
        &VerificationRecord {
            timestamp: Utc::now(),
            feature_id: feature_id.to_string(),
            schema_version: schema_version.clone(),
            revision,
            bundle: bundle_dir.display().to_string(),
            bundle_digest: manifest.bundle_digest.clone(),
            policy_digest: manifest.policy.digest.clone(),
            run_id: run.run_id.clone(),
            reused,
        },
    )?;
    orchestrator
        .reports(feature_id)
        .append_provenance(&ProvenanceRecord {
            event: ProvenanceEvent::Package,
            note: Some(name),
            to_version: Some(schema_version),
            ..ProvenanceRecord::for_run(&run)
        })?;
    tracing::info!(feature_id, bundle = %bundle_dir.display(), reused, "capsule packaged");

    Ok(PackageOutcome {
        bundle_dir,
        manifest,
        reused,
        run,
    })
}

fn build_manifest(
    orchestrator: &Orchestrator,
    capsule: &CapsuleFiles,
    contents: &[(String, Vec<u8>)],
    schema_version: &str,
    date: NaiveDate,
    revision: &str,
) -> Result<Manifest, PackageError> {
    let schema_file = orchestrator.config().capsule.schema_file.as_str();
    let files: Vec<ManifestFile> = contents
        .iter()
        .map(|(name, bytes)| {
            let doc = capsule
                .parsed_documents()
                .find(|doc| doc.name == *name);
            let (doc_type, version) = match doc {
                Some(doc) => (
                    doc.doc_type().map(str::to_string),
                    doc.version().map(str::to_string),
                ),
                None if name == schema_file => (None, Some(schema_version.to_string())),
                None => (None, None),
            };
            ManifestFile {
                path: name.clone(),
                sha256: sha256_hex(bytes),
                bytes: bytes.len() as u64,
                doc_type,
                version,
            }
        })
        .collect();

    let hash_list: Vec<(&str, &str)> = files
        .iter()
        .map(|file| (file.path.as_str(), file.sha256.as_str()))
        .collect();
    let bundle_digest = digest_value(BUNDLE_DIGEST_PREFIX, &hash_list).map_err(StoreError::from)?;
    let config = orchestrator.config();

    Ok(Manifest {
        schema: MANIFEST_SCHEMA.to_string(),
        feature_id: capsule.feature_id.clone(),
        schema_version: schema_version.to_string(),
        date: date.format("%Y-%m-%d").to_string(),
        revision: revision.to_string(),
        files,
        policy: ManifestPolicy {
            digest: orchestrator.policy().digest().to_string(),
            snapshot: PolicySnapshot::new(&config.size, &config.leakage),
        },
        bundle_digest,
    })
}

fn render_manifest(manifest: &Manifest) -> Result<String, StoreError> {
    let mut text = serde_json::to_string_pretty(manifest)?;
    text.push('\n');
    Ok(text)
}

/// Deterministic bundle summary: no timestamps or run ids.
pub fn render_bundle_summary(manifest: &Manifest, run: &GateRun) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {} {}\n", manifest.feature_id, manifest.schema_version);
    let _ = writeln!(out, "- date: {}", manifest.date);
    let _ = writeln!(out, "- revision: {}", manifest.revision);
    let _ = writeln!(out, "- policy digest: `{}`", manifest.policy.digest);
    let _ = writeln!(out, "- bundle digest: `{}`", manifest.bundle_digest);
    let _ = writeln!(out, "\n## Files\n\n| file | doc_type | version | sha256 |\n|---|---|---|---|");
    for file in &manifest.files {
        let _ = writeln!(
            out,
            "| {} | {} | {} | `{}` |",
            file.path,
            file.doc_type.as_deref().unwrap_or("-"),
            file.version.as_deref().unwrap_or("-"),
            file.sha256
        );
    }
    let warnings: Vec<&Verdict> = run.warnings().collect();
    if !warnings.is_empty() {
        out.push_str("\n## Accepted warnings\n\n");
        for verdict in warnings {
            let _ = writeln!(out, "- {} [{}] {}", verdict.check, verdict.subject, verdict.message);
        }
    }
    out
}

fn stage_and_commit(
    bundles: &Path,
    bundle_dir: &Path,
    contents: &[(String, Vec<u8>)],
    manifest: &Manifest,
    run: &GateRun,
) -> Result<(), PackageError> {
    fs::create_dir_all(bundles).map_err(|source| StoreError::Io {
        path: bundles.to_path_buf(),
        source,
    })?;
    let staging = tmp_write_path(bundle_dir);
    let result = (|| -> Result<(), StoreError> {
        for (name, bytes) in contents {
            write_atomic(staging.join(name), bytes)?;
        }
        write_atomic(staging.join(MANIFEST_FILE), render_manifest(manifest)?)?;
        write_atomic(
            staging.join(SUMMARY_FILE),
            render_bundle_summary(manifest, run),
        )?;
        fs::rename(&staging, bundle_dir).map_err(|source| StoreError::Io {
            path: bundle_dir.to_path_buf(),
            source,
        })
    })();
    if let Err(err) = result {
        let _ = fs::remove_dir_all(&staging);
        return Err(err.into());
    }
    Ok(())
}

/// Whether an existing bundle carries exactly `manifest`: same files, same
/// policy, same labels.
fn matches_existing(bundle_dir: &Path, manifest: &Manifest) -> Result<bool, StoreError> {
    let path = bundle_dir.join(MANIFEST_FILE);
    if !path.is_file() {
        return Ok(false);
    }
    Ok(read_text(&path)? == render_manifest(manifest)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use capsule_kernel::{FailureClass, Provenance};

    fn run(verdicts: Vec<Verdict>) -> GateRun {
        GateRun {
            run_id: "run-1".to_string(),
            target: "demo-app".to_string(),
            started_at: Utc::now(),
            gate: capsule_kernel::aggregate(&verdicts),
            implementable: false,
            verdicts,
            provenance: Provenance::default(),
        }
    }

    #[test]
    fn bundle_name_is_feature_version_date_revision() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 17).expect("date");
        assert_eq!(
            bundle_name("demo-app", "1.2.0", date, "abc123def456"),
            "demo-app-1.2.0-2026-10-17-abc123def456"
        );
    }

    #[test]
    fn only_size_warnings_are_tolerated_and_only_with_the_flag() {
        let gate_run = run(vec![
            Verdict::warn("size", "vision.md", FailureClass::SizeViolation, "big"),
            Verdict::pass("leakage", "vision.md", "clean"),
        ]);
        assert!(blocking_verdicts(&gate_run, true).is_empty());
        assert_eq!(blocking_verdicts(&gate_run, false).len(), 1);

        let questions = run(vec![Verdict::warn(
            "open_questions",
            "capsule",
            FailureClass::OpenQuestion,
            "1 open",
        )]);
        assert_eq!(blocking_verdicts(&questions, true).len(), 1);
    }
}
