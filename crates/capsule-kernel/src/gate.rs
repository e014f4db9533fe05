//! Verdicts, gates, and worst-of aggregation.
//!
//! Every check in the kernel returns [`Verdict`]s. A verdict never aborts a
//! run: failures are data, aggregated by severity into a single [`Gate`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of one rule, ordered by severity: `Skip < Pass < Warn < Fail`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Gate {
    #[default]
    Skip,
    Pass,
    Warn,
    Fail,
}

impl Gate {
    pub fn as_str(self) -> &'static str {
        match self {
            Gate::Skip => "SKIP",
            Gate::Pass => "PASS",
            Gate::Warn => "WARN",
            Gate::Fail => "FAIL",
        }
    }

    /// PASS and WARN let a run proceed; FAIL does not.
    pub fn is_success(self) -> bool {
        self != Gate::Fail
    }
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error taxonomy attached to non-passing verdicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    MalformedHeader,
    IdentityMismatch,
    RegistryDrift,
    MappingGap,
    ConcurrencyDrift,
    ConcurrencyIncomplete,
    SizeViolation,
    LeakageDetected,
    IoError,
    OpenQuestion,
    PackagingPrecondition,
}

impl FailureClass {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureClass::MalformedHeader => "malformed_header",
            FailureClass::IdentityMismatch => "identity_mismatch",
            FailureClass::RegistryDrift => "registry_drift",
            FailureClass::MappingGap => "mapping_gap",
            FailureClass::ConcurrencyDrift => "concurrency_drift",
            FailureClass::ConcurrencyIncomplete => "concurrency_incomplete",
            FailureClass::SizeViolation => "size_violation",
            FailureClass::LeakageDetected => "leakage_detected",
            FailureClass::IoError => "io_error",
            FailureClass::OpenQuestion => "open_question",
            FailureClass::PackagingPrecondition => "packaging_precondition",
        }
    }
}

/// Subject used for verdicts that concern the capsule as a whole.
pub const CAPSULE_SUBJECT: &str = "capsule";

/// Result of evaluating one rule against one subject.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    /// Dotted rule name, e.g. `header.schema_ref`.
    pub check: String,
    pub gate: Gate,
    /// Document file name, or [`CAPSULE_SUBJECT`].
    pub subject: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<FailureClass>,
    /// Minimal corrective input, when one can be derived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remedy: Option<String>,
}

impl Verdict {
    pub fn new(
        check: impl Into<String>,
        gate: Gate,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            check: check.into(),
            gate,
            subject: subject.into(),
            message: message.into(),
            class: None,
            remedy: None,
        }
    }

    pub fn pass(
        check: impl Into<String>,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(check, Gate::Pass, subject, message)
    }

    pub fn warn(
        check: impl Into<String>,
        subject: impl Into<String>,
        class: FailureClass,
        message: impl Into<String>,
    ) -> Self {
        Self::new(check, Gate::Warn, subject, message).with_class(class)
    }

    pub fn fail(
        check: impl Into<String>,
        subject: impl Into<String>,
        class: FailureClass,
        message: impl Into<String>,
    ) -> Self {
        Self::new(check, Gate::Fail, subject, message).with_class(class)
    }

    pub fn skip(
        check: impl Into<String>,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(check, Gate::Skip, subject, message)
    }

    pub fn with_class(mut self, class: FailureClass) -> Self {
        self.class = Some(class);
        self
    }

    pub fn with_remedy(mut self, remedy: impl Into<String>) -> Self {
        self.remedy = Some(remedy.into());
        self
    }
}

/// Worst-of aggregation. An empty set aggregates to `Skip`.
pub fn aggregate<'a>(verdicts: impl IntoIterator<Item = &'a Verdict>) -> Gate {
    verdicts
        .into_iter()
        .map(|verdict| verdict.gate)
        .max()
        .unwrap_or(Gate::Skip)
}

/// Implementable mode: every WARN becomes a FAIL.
pub fn elevate_warnings(verdicts: &mut [Verdict]) -> usize {
    let mut elevated = 0;
    for verdict in verdicts.iter_mut().filter(|v| v.gate == Gate::Warn) {
        verdict.gate = Gate::Fail;
        verdict.message = format!("[implementable] {}", verdict.message);
        elevated += 1;
    }
    elevated
}

/// Context supplied by the caller and recorded alongside a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decisions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,
    /// Policy overrides taken during the run. Never silent.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<String>,
}

impl Provenance {
    /// Whether a provenance row should be written for this run.
    pub fn is_recordable(&self) -> bool {
        self.step.is_some()
            || !self.decisions.is_empty()
            || !self.links.is_empty()
            || !self.overrides.is_empty()
    }
}

/// One complete orchestrator run over a capsule (or a single document).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GateRun {
    pub run_id: String,
    pub target: String,
    pub started_at: DateTime<Utc>,
    pub gate: Gate,
    pub implementable: bool,
    pub verdicts: Vec<Verdict>,
    pub provenance: Provenance,
}

impl GateRun {
    pub fn failures(&self) -> impl Iterator<Item = &Verdict> {
        self.verdicts.iter().filter(|v| v.gate == Gate::Fail)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Verdict> {
        self.verdicts.iter().filter(|v| v.gate == Gate::Warn)
    }

    pub fn count(&self, gate: Gate) -> usize {
        self.verdicts.iter().filter(|v| v.gate == gate).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_order_is_fail_warn_pass_skip() {
        assert!(Gate::Fail > Gate::Warn);
        assert!(Gate::Warn > Gate::Pass);
        assert!(Gate::Pass > Gate::Skip);
    }

    #[test]
    fn aggregate_is_worst_of() {
        let verdicts = vec![
            Verdict::skip("a", "x", ""),
            Verdict::pass("b", "x", ""),
            Verdict::warn("c", "x", FailureClass::SizeViolation, ""),
        ];
        assert_eq!(aggregate(&verdicts), Gate::Warn);
        assert_eq!(aggregate(&Vec::<Verdict>::new()), Gate::Skip);
    }

    #[test]
    fn elevation_turns_every_warning_into_failure() {
        let mut verdicts = vec![
            Verdict::pass("a", "x", "ok"),
            Verdict::warn("b", "x", FailureClass::MappingGap, "empty"),
        ];
        assert_eq!(elevate_warnings(&mut verdicts), 1);
        assert_eq!(verdicts[1].gate, Gate::Fail);
        assert!(verdicts[1].message.starts_with("[implementable]"));
        assert_eq!(aggregate(&verdicts), Gate::Fail);
    }

    #[test]
    fn gate_serializes_uppercase() {
        let json = serde_json::to_string(&Gate::Warn).expect("gate serializes");
        assert_eq!(json, "\"WARN\"");
    }
}
