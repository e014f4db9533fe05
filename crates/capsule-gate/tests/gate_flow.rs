mod common;

use capsule_gate::orchestrator::{CHECK_DOCUMENTS, CHECK_IO, CHECK_RUN};
use capsule_gate::{Orchestrator, RunOptions, StopNeed, run_all_features, summary_line};
use capsule_kernel::concurrency::CHECK_CONCURRENCY;
use capsule_kernel::header::{CHECK_PLACEHOLDER, CHECK_PRESENCE};
use capsule_kernel::policy::CHECK_SIZE;
use capsule_kernel::registry::CHECK_ROUND_TRIP;
use capsule_kernel::{EngineConfig, FailureClass, Gate, GateRun, Provenance, ProfileSource, Verdict};
use capsule_store::read_jsonl;
use common::{FEATURE, Fixture, REQUIRED_KEYS, VERSION, concurrency_section, document, schema};
use serde_json::{Value, json};
use std::fs;

fn failures(run: &GateRun) -> Vec<&Verdict> {
    run.failures().collect()
}

fn verdicts_for<'a>(run: &'a GateRun, check: &str) -> Vec<&'a Verdict> {
    run.verdicts.iter().filter(|v| v.check == check).collect()
}

#[test]
fn complete_capsule_passes_and_is_recorded() {
    let fixture = Fixture::new();
    let orchestrator = fixture.orchestrator();

    let run = orchestrator
        .run_capsule(FEATURE, &RunOptions::default())
        .expect("run");

    assert_eq!(run.gate, Gate::Pass, "{:#?}", run.verdicts);
    assert_eq!(run.count(Gate::Warn), 0);
    assert_eq!(StopNeed::from_run(&run), None);
    assert_eq!(
        summary_line(&run),
        format!(
            "PASS {FEATURE}: {} rule(s), 0 fail, 0 warn, 0 skip",
            run.verdicts.len()
        )
    );

    let reports = orchestrator.reports(FEATURE);
    let lines: Vec<Value> = read_jsonl(reports.run_log_path()).expect("run log");
    assert_eq!(lines.len(), run.verdicts.len());
    assert!(lines.iter().all(|line| line["runId"] == json!(run.run_id)));
    assert!(reports.summary_path().is_file());
    assert!(
        !reports.provenance_path().exists(),
        "no context, no provenance row"
    );
}

#[test]
fn removing_one_header_field_fails_exactly_that_field() {
    let fixture = Fixture::new();
    let text = fixture
        .read_doc("vision.md")
        .lines()
        .filter(|line| !line.starts_with("updated:"))
        .collect::<Vec<_>>()
        .join("\n");
    fixture.write_doc("vision.md", &text);

    let run = fixture
        .orchestrator()
        .run_capsule(FEATURE, &RunOptions::default())
        .expect("run");

    let failing = failures(&run);
    assert_eq!(run.gate, Gate::Fail);
    assert_eq!(failing.len(), 1, "{failing:#?}");
    assert_eq!(failing[0].check, CHECK_PRESENCE);
    assert_eq!(failing[0].subject, "vision.md");
    assert_eq!(failing[0].class, Some(FailureClass::MalformedHeader));
    assert!(failing[0].message.contains("updated"));

    let stop = StopNeed::from_run(&run).expect("stop block");
    let rendered = stop.render();
    assert!(rendered.starts_with(&format!("STOP {FEATURE}: 1 failing rule(s)")));
    assert!(rendered.contains("NEED\n  - vision.md: "));
}

#[test]
fn tuple_drift_names_the_drifting_source() {
    let fixture = Fixture::new();
    fixture.write_doc(
        "action_budget.md",
        &document(
            FEATURE,
            "action_budget",
            VERSION,
            &concurrency_section("150"),
        ),
    );

    let run = fixture
        .orchestrator()
        .run_capsule(FEATURE, &RunOptions::default())
        .expect("run");

    let tuple = verdicts_for(&run, CHECK_CONCURRENCY);
    assert_eq!(tuple.len(), 1);
    assert_eq!(tuple[0].gate, Gate::Fail);
    assert_eq!(tuple[0].class, Some(FailureClass::ConcurrencyDrift));
    assert!(
        tuple[0]
            .message
            .contains("action_budget.md.throughput_rps = 150 rps differs from schema (100 rps)"),
        "{}",
        tuple[0].message
    );
    assert!(!tuple[0].message.contains("intent_card.md"));
}

#[test]
fn pending_tuple_warns_and_implementable_mode_fails() {
    let fixture = Fixture::new();
    fixture.write_schema(&schema(VERSION, &REQUIRED_KEYS, Value::Null));
    for stem in ["intent_card", "action_budget"] {
        fixture.write_doc(
            &format!("{stem}.md"),
            &document(FEATURE, stem, VERSION, &concurrency_section("<TBD>")),
        );
    }
    let orchestrator = fixture.orchestrator();

    let run = orchestrator
        .run_capsule(FEATURE, &RunOptions::default())
        .expect("run");
    assert_eq!(run.gate, Gate::Warn, "{:#?}", run.verdicts);
    let tuple = verdicts_for(&run, CHECK_CONCURRENCY);
    assert_eq!(tuple[0].gate, Gate::Warn);
    assert!(summary_line(&run).contains("; warned: concurrency.tuple [capsule]"));

    let strict = orchestrator
        .run_capsule(
            FEATURE,
            &RunOptions {
                implementable: true,
                ..RunOptions::default()
            },
        )
        .expect("run");
    assert_eq!(strict.gate, Gate::Fail);
    assert!(strict.implementable);
    assert_eq!(strict.count(Gate::Warn), 0);
    let elevated = verdicts_for(&strict, CHECK_CONCURRENCY);
    assert_eq!(elevated[0].gate, Gate::Fail);
    assert!(elevated[0].message.starts_with("[implementable] "));
}

#[test]
fn unreadable_document_is_isolated() {
    let fixture = Fixture::new();
    fs::write(fixture.doc_path("exploration.md"), [0x66, 0x00, 0xff, 0xfe]).expect("garbage");

    let run = fixture
        .orchestrator()
        .run_capsule(FEATURE, &RunOptions::default())
        .expect("run completes despite the bad file");

    let failing = failures(&run);
    assert_eq!(failing.len(), 1, "{failing:#?}");
    assert_eq!(failing[0].check, CHECK_IO);
    assert_eq!(failing[0].subject, "exploration.md");
    assert_eq!(failing[0].class, Some(FailureClass::IoError));

    let vision_header = run
        .verdicts
        .iter()
        .find(|v| v.check == CHECK_PRESENCE && v.subject == "vision.md")
        .expect("other documents still checked");
    assert_eq!(vision_header.gate, Gate::Pass);
}

#[test]
fn missing_required_document_warns() {
    let fixture = Fixture::new();
    fs::remove_file(fixture.doc_path("audit_log.md")).expect("remove");

    let run = fixture
        .orchestrator()
        .run_capsule(FEATURE, &RunOptions::default())
        .expect("run");

    assert_eq!(run.gate, Gate::Warn);
    let documents = verdicts_for(&run, CHECK_DOCUMENTS);
    assert_eq!(documents[0].gate, Gate::Warn);
    assert_eq!(documents[0].class, Some(FailureClass::PackagingPrecondition));
    assert!(documents[0].message.contains("audit_log.md"));
}

#[test]
fn placeholder_document_is_skipped_only() {
    let fixture = Fixture::new();
    fixture.write_doc(
        "draft.md",
        &document("<feature_id>", "vision", "0.0.0", "Unfilled.\n"),
    );

    let run = fixture
        .orchestrator()
        .run_capsule(FEATURE, &RunOptions::default())
        .expect("run");

    let draft: Vec<&Verdict> = run
        .verdicts
        .iter()
        .filter(|v| v.subject == "draft.md")
        .collect();
    assert_eq!(draft.len(), 1);
    assert_eq!(draft[0].check, CHECK_PLACEHOLDER);
    assert_eq!(draft[0].gate, Gate::Skip);
    assert_eq!(run.gate, Gate::Pass);
}

#[test]
fn single_document_run_with_context_writes_provenance() {
    let fixture = Fixture::new();
    let orchestrator = fixture.orchestrator();
    let options = RunOptions {
        provenance: Provenance {
            step: Some(3),
            decisions: vec!["cap checkout at 100 rps".to_string()],
            links: vec!["ADR-7".to_string()],
            overrides: Vec::new(),
        },
        ..RunOptions::default()
    };

    let run = orchestrator
        .run_document(&fixture.doc_path("vision.md"), Some(FEATURE), &options)
        .expect("run");
    assert_eq!(run.target, format!("{FEATURE}/vision.md"));
    assert_eq!(run.gate, Gate::Pass, "{:#?}", run.verdicts);

    let rows: Vec<Value> =
        read_jsonl(orchestrator.reports(FEATURE).provenance_path()).expect("provenance");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["event"], json!("validate"));
    assert_eq!(rows[0]["step"], json!(3));
    assert_eq!(rows[0]["links"], json!(["ADR-7"]));
    assert_eq!(rows[0]["runId"], json!(run.run_id));
}

#[test]
fn hard_size_override_is_recorded_not_silent() {
    let fixture = Fixture::new();
    let long_body = "checkout ".repeat(1300);
    fixture.write_doc(
        "exploration.md",
        &document(FEATURE, "exploration", VERSION, &long_body),
    );
    let orchestrator = fixture.orchestrator();

    let blocked = orchestrator
        .run_capsule(FEATURE, &RunOptions::default())
        .expect("run");
    let size = verdicts_for(&blocked, CHECK_SIZE)
        .into_iter()
        .find(|v| v.subject == "exploration.md")
        .expect("size verdict");
    assert_eq!(size.gate, Gate::Fail);

    let allowed = orchestrator
        .run_capsule(
            FEATURE,
            &RunOptions {
                allow_hard_size: true,
                ..RunOptions::default()
            },
        )
        .expect("run");
    assert_eq!(allowed.gate, Gate::Warn);
    assert_eq!(allowed.provenance.overrides.len(), 1);
    assert!(allowed.provenance.overrides[0].contains("exploration.md"));

    let rows: Vec<Value> =
        read_jsonl(orchestrator.reports(FEATURE).provenance_path()).expect("provenance");
    assert_eq!(rows.len(), 1, "only the override run is recorded");
}

#[test]
fn registry_drift_is_detected_both_ways() {
    let fixture = Fixture::new();
    let orchestrator = fixture.orchestrator();
    let clean = orchestrator
        .run_registry_check(&RunOptions::default())
        .expect("run");
    assert_eq!(clean.gate, Gate::Pass, "{:#?}", clean.verdicts);

    fixture.write("templates/extra.md", "feature_id: <feature_id>\n");
    let extra = orchestrator
        .run_registry_check(&RunOptions::default())
        .expect("run");
    assert_eq!(extra.gate, Gate::Fail);
    fs::remove_file(fixture.root().join("templates/extra.md")).expect("remove extra");

    fs::remove_file(fixture.root().join("templates/vision.md")).expect("remove template");
    let deleted = orchestrator
        .run_registry_check(&RunOptions::default())
        .expect("run");
    assert_eq!(deleted.gate, Gate::Fail);
    let round_trip = verdicts_for(&deleted, CHECK_ROUND_TRIP);
    assert_eq!(round_trip[0].gate, Gate::Fail);
}

#[test]
fn missing_registry_fails_the_standalone_check_but_skips_in_capsule_runs() {
    let fixture = Fixture::new();
    fs::remove_file(fixture.root().join("templates/registry.json")).expect("remove registry");
    let orchestrator = fixture.orchestrator();

    let standalone = orchestrator
        .run_registry_check(&RunOptions::default())
        .expect("run");
    assert_eq!(standalone.gate, Gate::Fail);

    let capsule = orchestrator
        .run_capsule(FEATURE, &RunOptions::default())
        .expect("run");
    let registry = verdicts_for(&capsule, CHECK_ROUND_TRIP);
    assert_eq!(registry[0].gate, Gate::Skip);
}

#[test]
fn config_layers_apply_in_precedence_order() {
    let fixture = Fixture::new();
    fixture.write(
        "profile.toml",
        "[size]\nsoft_tokens = 100\nhard_tokens = 200\n\n[paths]\noutput_root = \"out-profile\"\n",
    );
    fixture.write(".capsule/config.toml", "[size]\nhard_tokens = 300\n");
    fixture.write(
        &format!("features/{FEATURE}/capsule.toml"),
        "[size]\nsoft_tokens = 5\nhard_tokens = 10\n",
    );

    let layers = fixture
        .layers()
        .with_profile(ProfileSource::Path(fixture.root().join("profile.toml")));
    let repo_only = EngineConfig::resolve(&layers).expect("resolve");
    assert_eq!(repo_only.config.size.soft_tokens, 100);
    assert_eq!(repo_only.config.size.hard_tokens, 300);
    assert_eq!(repo_only.config.paths.output_root, "out-profile");
    assert_eq!(repo_only.layers.len(), 2);

    let featured = layers.clone().with_feature(FEATURE);
    let resolved = EngineConfig::resolve(&featured).expect("resolve");
    assert_eq!(resolved.config.size.soft_tokens, 5);
    assert_eq!(resolved.config.size.hard_tokens, 10);
    assert_eq!(resolved.config.paths.output_root, "out-profile");
    assert_eq!(resolved.layers.len(), 3);

    let run = Orchestrator::from_layers(&featured)
        .expect("orchestrator")
        .run_capsule(FEATURE, &RunOptions::default())
        .expect("run");
    assert!(
        verdicts_for(&run, CHECK_SIZE)
            .iter()
            .all(|v| v.gate == Gate::Fail),
        "feature-local limits reach every size check"
    );
}

#[test]
fn run_all_features_covers_every_capsule() {
    let fixture = Fixture::new();
    fixture.write_doc("../other-feature/vision.md", "feature_id: other-feature\n");

    let runs = run_all_features(&fixture.layers(), &RunOptions::default()).expect("runs");
    let targets: Vec<&str> = runs.iter().map(|run| run.target.as_str()).collect();
    assert_eq!(targets, vec![FEATURE, "other-feature"]);
    assert_eq!(runs[0].gate, Gate::Pass);
    assert_eq!(runs[1].gate, Gate::Fail);
}

#[test]
fn run_all_features_isolates_bad_feature_directories() {
    let fixture = Fixture::new();
    fs::create_dir_all(fixture.root().join("features/Scratch_Notes")).expect("scratch dir");
    fixture.write("features/broken-config/capsule.toml", "[size\nhard_tokens = \n");

    let runs = run_all_features(&fixture.layers(), &RunOptions::default()).expect("runs");
    let targets: Vec<&str> = runs.iter().map(|run| run.target.as_str()).collect();
    assert_eq!(targets, vec!["broken-config", FEATURE]);

    assert_eq!(runs[0].gate, Gate::Fail);
    let faults = verdicts_for(&runs[0], CHECK_RUN);
    assert_eq!(faults.len(), 1, "{:#?}", runs[0].verdicts);
    assert_eq!(faults[0].class, Some(FailureClass::IoError));
    assert_eq!(runs[1].gate, Gate::Pass, "{:#?}", runs[1].verdicts);
}
