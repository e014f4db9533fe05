//! The gate orchestrator.
//!
//! A run moves through a fixed state machine:
//!
//! ```text
//! Init → PerDocumentChecks → Aggregate → Decided(gate)
//!                                            │
//!                                            ├─→ ImplementableElevation → Done
//!                                            └─→ Done
//! ```
//!
//! Per-document checks (header, size, leakage) run on scoped threads, one per
//! document. Capsule-level checks (required documents, schema, acceptance,
//! concurrency, open questions, registry) run once after they are joined.
//! Check failures are verdicts; only engine faults surface as [`GateError`].

use crate::diagnostics::render_run_summary;
use crate::error::GateError;
use capsule_kernel::acceptance::CHECK_ACCEPTANCE;
use capsule_kernel::config::{ConfigLayers, EngineConfig};
use capsule_kernel::gate::{FailureClass, Gate, GateRun, Provenance, Verdict};
use capsule_kernel::header::{CHECK_PLACEHOLDER, validate_feature_id};
use capsule_kernel::registry::{CHECK_ROUND_TRIP, REGISTRY_SUBJECT};
use capsule_kernel::{
    CAPSULE_SUBJECT, Document, OutputContractSchema, Policy, aggregate, check_acceptance,
    check_concurrency, check_header, check_leakage, check_open_questions, check_registry,
    check_size, elevate_warnings, extract_checklist, is_placeholder, scan_open_questions,
    source_from_document, source_from_schema,
};
use capsule_store::{
    CapsuleFiles, DocumentSlot, ProvenanceRecord, ReportsStore, SchemaSlot, discover_templates,
    list_features, load_capsule, load_document, load_registry,
};
use chrono::Utc;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const CHECK_IO: &str = "io";
pub const CHECK_IDENTITY: &str = "identity.feature_id";
pub const CHECK_DOCUMENTS: &str = "capsule.documents";
pub const CHECK_SCHEMA: &str = "schema.contract";
pub const CHECK_RUN: &str = "capsule.run";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    PerDocumentChecks,
    Aggregate,
    Decided(Gate),
    ImplementableElevation,
    Done,
}

impl RunState {
    pub fn can_advance_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Init, PerDocumentChecks)
                | (PerDocumentChecks, Aggregate)
                | (Aggregate, Decided(_))
                | (Decided(_), ImplementableElevation)
                | (Decided(_), Done)
                | (ImplementableElevation, Done)
        )
    }
}

#[derive(Debug)]
struct RunMachine {
    state: RunState,
}

impl RunMachine {
    fn new() -> Self {
        Self {
            state: RunState::Init,
        }
    }

    fn advance(&mut self, next: RunState) -> Result<(), GateError> {
        if !self.state.can_advance_to(next) {
            return Err(GateError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(from = ?self.state, to = ?next, "gate transition");
        self.state = next;
        Ok(())
    }
}

/// Per-run switches supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Downgrade hard size failures to recorded warnings.
    pub allow_hard_size: bool,
    /// Elevate every WARN to FAIL.
    pub implementable: bool,
    pub provenance: Provenance,
}

#[derive(Debug, Default)]
struct DocumentOutcome {
    verdicts: Vec<Verdict>,
    override_note: Option<String>,
}

#[derive(Debug)]
pub struct Orchestrator {
    repo_root: PathBuf,
    config: EngineConfig,
    policy: Policy,
}

impl Orchestrator {
    pub fn new(repo_root: impl Into<PathBuf>, config: EngineConfig) -> Result<Self, GateError> {
        let policy = Policy::from_config(&config)?;
        Ok(Self {
            repo_root: repo_root.into(),
            config,
            policy,
        })
    }

    /// Resolve configuration from `layers` and build an orchestrator over it.
    pub fn from_layers(layers: &ConfigLayers) -> Result<Self, GateError> {
        let resolved = EngineConfig::resolve(layers)?;
        for layer in &resolved.layers {
            tracing::debug!(layer = %layer.display(), "config layer applied");
        }
        Self::new(layers.repo_root.clone(), resolved.config)
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn output_root(&self) -> PathBuf {
        self.repo_root.join(&self.config.paths.output_root)
    }

    pub fn reports(&self, feature_id: &str) -> ReportsStore {
        ReportsStore::for_capsule(&self.config, &self.repo_root, feature_id)
    }

    pub fn load(&self, feature_id: &str) -> Result<CapsuleFiles, GateError> {
        validate_feature_id(feature_id).map_err(GateError::InvalidFeatureId)?;
        Ok(load_capsule(&self.config, &self.repo_root, feature_id)?)
    }

    /// Evaluate a loaded capsule without writing reports.
    pub fn evaluate_capsule(
        &self,
        capsule: &CapsuleFiles,
        options: &RunOptions,
    ) -> Result<GateRun, GateError> {
        let documents: Vec<&DocumentSlot> = capsule.documents.iter().collect();
        self.execute(
            capsule.feature_id.clone(),
            Some(&capsule.feature_id),
            &documents,
            || self.capsule_checks(capsule),
            options,
        )
    }

    /// Evaluate and record a whole capsule.
    pub fn run_capsule(&self, feature_id: &str, options: &RunOptions) -> Result<GateRun, GateError> {
        let capsule = self.load(feature_id)?;
        let run = self.evaluate_capsule(&capsule, options)?;
        self.record(feature_id, &run)?;
        Ok(run)
    }

    /// Evaluate one document. With a feature id, the capsule-level checks of
    /// that capsule run too and the run is recorded in its reports.
    pub fn run_document(
        &self,
        path: &Path,
        feature_id: Option<&str>,
        options: &RunOptions,
    ) -> Result<GateRun, GateError> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let slot = load_document(path, name.clone());

        match feature_id {
            Some(feature_id) => {
                let capsule = self.load(feature_id)?;
                let run = self.execute(
                    format!("{feature_id}/{name}"),
                    Some(feature_id),
                    &[&slot],
                    || self.capsule_checks(&capsule),
                    options,
                )?;
                self.record(feature_id, &run)?;
                Ok(run)
            }
            None => self.execute(
                path.display().to_string(),
                None,
                &[&slot],
                Vec::new,
                options,
            ),
        }
    }

    /// Registry consistency on its own. A missing registry file fails here.
    pub fn run_registry_check(&self, options: &RunOptions) -> Result<GateRun, GateError> {
        self.execute(
            REGISTRY_SUBJECT.to_string(),
            None,
            &[],
            || self.registry_verdicts(true),
            options,
        )
    }

    /// Append the run log, the provenance row when there is context to
    /// record, and overwrite the run summary.
    pub fn record(&self, feature_id: &str, run: &GateRun) -> Result<(), GateError> {
        let reports = self.reports(feature_id);
        reports.append_run(run)?;
        if run.provenance.is_recordable() {
            reports.append_provenance(&ProvenanceRecord::for_run(run))?;
        }
        reports.write_summary(&render_run_summary(run))?;
        tracing::debug!(feature_id, run_id = %run.run_id, "run recorded");
        Ok(())
    }

    fn execute(
        &self,
        target: String,
        expected_feature: Option<&str>,
        documents: &[&DocumentSlot],
        capsule_level: impl FnOnce() -> Vec<Verdict>,
        options: &RunOptions,
    ) -> Result<GateRun, GateError> {
        let mut machine = RunMachine::new();
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let mut provenance = options.provenance.clone();

        machine.advance(RunState::PerDocumentChecks)?;
        let mut verdicts = Vec::new();
        for outcome in self.check_documents(documents, expected_feature, options.allow_hard_size)? {
            verdicts.extend(outcome.verdicts);
            provenance.overrides.extend(outcome.override_note);
        }
        verdicts.extend(capsule_level());

        machine.advance(RunState::Aggregate)?;
        let mut gate = aggregate(&verdicts);
        machine.advance(RunState::Decided(gate))?;

        if options.implementable {
            machine.advance(RunState::ImplementableElevation)?;
            let elevated = elevate_warnings(&mut verdicts);
            gate = aggregate(&verdicts);
            tracing::debug!(elevated, "implementable mode applied");
        }
        machine.advance(RunState::Done)?;

        tracing::info!(
            run_target = %target,
            run_id = %run_id,
            gate = %gate,
            verdicts = verdicts.len(),
            "gate run complete"
        );
        Ok(GateRun {
            run_id,
            target,
            started_at,
            gate,
            implementable: options.implementable,
            verdicts,
            provenance,
        })
    }

    fn check_documents(
        &self,
        documents: &[&DocumentSlot],
        expected_feature: Option<&str>,
        allow_hard_size: bool,
    ) -> Result<Vec<DocumentOutcome>, GateError> {
        std::thread::scope(|scope| {
            let handles: Vec<_> = documents
                .iter()
                .map(|&slot| {
                    let handle = scope
                        .spawn(move || self.check_document(slot, expected_feature, allow_hard_size));
                    (slot.name.as_str(), handle)
                })
                .collect();
            handles
                .into_iter()
                .map(|(name, handle)| {
                    handle.join().map_err(|_| GateError::WorkerPanicked {
                        subject: name.to_string(),
                    })
                })
                .collect()
        })
    }

    fn check_document(
        &self,
        slot: &DocumentSlot,
        expected_feature: Option<&str>,
        allow_hard_size: bool,
    ) -> DocumentOutcome {
        let doc = match &slot.content {
            Ok(doc) => doc,
            Err(message) => {
                tracing::warn!(document = %slot.name, "document unreadable");
                return DocumentOutcome {
                    verdicts: vec![
                        Verdict::fail(CHECK_IO, &slot.name, FailureClass::IoError, message.clone())
                            .with_remedy(format!("make {} readable UTF-8 text", slot.name)),
                    ],
                    override_note: None,
                };
            }
        };

        let mut verdicts = check_header(doc, &self.config.identity);
        if verdicts.iter().any(|v| v.check == CHECK_PLACEHOLDER) {
            return DocumentOutcome {
                verdicts,
                override_note: None,
            };
        }

        if let (Some(expected), Some(actual)) = (expected_feature, doc.feature_id()) {
            verdicts.push(if expected == actual {
                Verdict::pass(CHECK_IDENTITY, &doc.name, "feature_id matches the capsule")
            } else {
                Verdict::fail(
                    CHECK_IDENTITY,
                    &doc.name,
                    FailureClass::IdentityMismatch,
                    format!("feature_id `{actual}` does not match capsule `{expected}`"),
                )
                .with_remedy(format!("set `feature_id: {expected}` in {}", doc.name))
            });
        }

        let size = check_size(doc, &self.policy, allow_hard_size);
        verdicts.push(size.verdict);
        verdicts.push(check_leakage(doc, &self.policy));
        tracing::debug!(document = %doc.name, tokens = size.tokens, "document checked");
        DocumentOutcome {
            verdicts,
            override_note: size.override_note,
        }
    }

    fn capsule_checks(&self, capsule: &CapsuleFiles) -> Vec<Verdict> {
        let identity = &self.config.identity;
        let docs: Vec<&Document> = capsule
            .parsed_documents()
            .filter(|doc| !is_placeholder(doc, identity))
            .collect();
        let schema = capsule.schema.loaded();

        let mut verdicts = vec![
            self.required_documents_verdict(capsule),
            self.schema_verdict(&capsule.schema),
        ];
        verdicts.push(match schema {
            Some(schema) => {
                let rows =
                    extract_checklist(docs.iter().copied(), &self.config.capsule.acceptance_heading);
                check_acceptance(&rows, &schema.required)
            }
            None => Verdict::skip(
                CHECK_ACCEPTANCE,
                CAPSULE_SUBJECT,
                "output contract schema unavailable",
            ),
        });
        verdicts.push(self.concurrency_verdict(&docs, schema));
        let questions =
            scan_open_questions(docs.iter().copied(), &self.config.capsule.open_questions_heading);
        verdicts.push(check_open_questions(&questions));
        verdicts.extend(self.registry_verdicts(false));
        verdicts
    }

    fn required_documents_verdict(&self, capsule: &CapsuleFiles) -> Verdict {
        let required = self.config.capsule.required_documents.len();
        if capsule.missing.is_empty() {
            return Verdict::pass(
                CHECK_DOCUMENTS,
                CAPSULE_SUBJECT,
                format!("{required} required document(s) present"),
            );
        }
        let missing = capsule.missing.join(", ");
        Verdict::warn(
            CHECK_DOCUMENTS,
            CAPSULE_SUBJECT,
            FailureClass::PackagingPrecondition,
            format!(
                "{} of {required} required document(s) missing: {missing}",
                capsule.missing.len()
            ),
        )
        .with_remedy(format!("create {missing} from the registered templates"))
    }

    fn schema_verdict(&self, slot: &SchemaSlot) -> Verdict {
        let subject = self.config.capsule.schema_file.as_str();
        match slot {
            SchemaSlot::Loaded(schema) => Verdict::pass(
                CHECK_SCHEMA,
                subject,
                format!(
                    "schema version {} with {} required key(s)",
                    schema.version,
                    schema.required.len()
                ),
            ),
            SchemaSlot::Missing => Verdict::fail(
                CHECK_SCHEMA,
                subject,
                FailureClass::MappingGap,
                "output contract schema not found",
            )
            .with_remedy(format!("create {subject} with `version` and `required`")),
            SchemaSlot::Unreadable(message) => {
                Verdict::fail(CHECK_SCHEMA, subject, FailureClass::IoError, message.clone())
            }
            SchemaSlot::Invalid(err) => Verdict::fail(
                CHECK_SCHEMA,
                subject,
                FailureClass::MappingGap,
                err.to_string(),
            )
            .with_remedy(format!("fix {subject} so it parses as an output contract")),
        }
    }

    fn concurrency_verdict(
        &self,
        docs: &[&Document],
        schema: Option<&OutputContractSchema>,
    ) -> Verdict {
        let settings = &self.config.concurrency;
        let find = |doc_type: &str| {
            docs.iter()
                .copied()
                .find(|doc| doc.doc_type() == Some(doc_type))
        };
        let label = |doc: Option<&Document>, doc_type: &str| {
            doc.map(|doc| doc.name.clone())
                .unwrap_or_else(|| doc_type.to_string())
        };
        let intent = find(&settings.intent_doc_type);
        let budget = find(&settings.budget_doc_type);
        check_concurrency(&[
            source_from_schema("schema", schema.and_then(|s| s.concurrency_targets())),
            source_from_document(label(intent, &settings.intent_doc_type), intent, settings),
            source_from_document(label(budget, &settings.budget_doc_type), budget, settings),
        ])
    }

    fn registry_verdicts(&self, missing_is_failure: bool) -> Vec<Verdict> {
        let path = self.repo_root.join(&self.config.paths.registry_file);
        let registry = match load_registry(&path) {
            Ok(Some(registry)) => registry,
            Ok(None) if missing_is_failure => {
                return vec![
                    Verdict::fail(
                        CHECK_ROUND_TRIP,
                        REGISTRY_SUBJECT,
                        FailureClass::RegistryDrift,
                        format!("registry not found at {}", path.display()),
                    )
                    .with_remedy(format!(
                        "create {} mapping each doc_type to its template",
                        self.config.paths.registry_file
                    )),
                ];
            }
            Ok(None) => {
                return vec![Verdict::skip(
                    CHECK_ROUND_TRIP,
                    REGISTRY_SUBJECT,
                    "no registry file; registry consistency not evaluated",
                )];
            }
            Err(err) => {
                return vec![Verdict::fail(
                    CHECK_ROUND_TRIP,
                    REGISTRY_SUBJECT,
                    FailureClass::RegistryDrift,
                    err.to_string(),
                )];
            }
        };
        let templates_dir = Path::new(&self.config.paths.templates_dir);
        match discover_templates(&self.repo_root, templates_dir) {
            Ok(discovered) => check_registry(
                &registry,
                &discovered,
                &self.config.identity.allowed_namespaces,
                |relative| self.repo_root.join(relative).is_file(),
            ),
            Err(err) => vec![Verdict::fail(
                CHECK_ROUND_TRIP,
                REGISTRY_SUBJECT,
                FailureClass::IoError,
                err.to_string(),
            )],
        }
    }
}

/// Run every capsule under the features directory, each with its own
/// feature-local configuration layer.
///
/// An engine fault in one capsule (an unreadable feature-local config, a
/// report that cannot be written) becomes a FAIL run for that capsule and
/// the remaining capsules still run.
pub fn run_all_features(
    layers: &ConfigLayers,
    options: &RunOptions,
) -> Result<Vec<GateRun>, GateError> {
    let base = Orchestrator::from_layers(layers)?;
    let mut runs = Vec::new();
    for feature_id in list_features(base.config(), base.repo_root())? {
        let outcome = Orchestrator::from_layers(&layers.clone().with_feature(&feature_id))
            .and_then(|orchestrator| orchestrator.run_capsule(&feature_id, options));
        let run = match outcome {
            Ok(run) => run,
            Err(err) => {
                tracing::warn!(feature_id = %feature_id, error = %err, "capsule run faulted");
                base.execute(
                    feature_id,
                    None,
                    &[],
                    || {
                        vec![
                            Verdict::fail(CHECK_RUN, CAPSULE_SUBJECT, FailureClass::IoError, err.to_string())
                                .with_remedy("fix the capsule configuration or permissions and re-run"),
                        ]
                    },
                    options,
                )?
            }
        };
        runs.push(run);
    }
    Ok(runs)
}
