use serde_json::{Value, json};
use std::ffi::OsStr;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

const FEATURE: &str = "checkout-flow";
const DOCS: [&str; 15] = [
    "intent_card",
    "vision",
    "exploration",
    "assumptions",
    "reference_set",
    "observability_slos",
    "concurrency_model",
    "action_budget",
    "sync_policies",
    "test_plan",
    "manual_tests",
    "runtime_concurrency_tests",
    "validation_report",
    "phase_transition",
    "audit_log",
];

struct Repo {
    root: TempDir,
    config_home: TempDir,
}

impl Repo {
    fn new() -> Self {
        let repo = Self {
            root: tempfile::tempdir().expect("repo dir"),
            config_home: tempfile::tempdir().expect("config home"),
        };
        let mut registry = serde_json::Map::new();
        for stem in DOCS {
            repo.write(
                &format!("templates/{stem}.md"),
                &document("<feature_id>", stem, "0.0.0", "Template.\n"),
            );
            registry.insert(
                format!("planning.{stem}"),
                Value::String(format!("templates/{stem}.md")),
            );
            repo.write_doc(stem, &body_for(stem, "100"));
        }
        repo.write(
            "templates/registry.json",
            &serde_json::to_string_pretty(&Value::Object(registry)).expect("registry"),
        );
        repo.write(
            &format!("features/{FEATURE}/output_contract.schema.json"),
            &serde_json::to_string_pretty(&json!({
                "version": "1.0.0",
                "required": ["order_id", "status"],
                "properties": {
                    "concurrency_targets": {
                        "throughput_rps": 100,
                        "latency_ms": 250,
                        "error_budget_pct": 0.5,
                        "window_days": 30
                    }
                }
            }))
            .expect("schema"),
        );
        repo
    }

    fn path(&self) -> &Path {
        self.root.path()
    }

    fn write(&self, relative: &str, text: &str) {
        let path = self.path().join(relative);
        fs::create_dir_all(path.parent().expect("parent")).expect("parent dir");
        fs::write(path, text).expect("write");
    }

    fn write_doc(&self, stem: &str, body: &str) {
        self.write(
            &format!("features/{FEATURE}/{stem}.md"),
            &document(FEATURE, stem, "1.0.0", body),
        );
    }

    fn run<I, S>(&self, args: I) -> Output
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        Command::new(env!("CARGO_BIN_EXE_capsule"))
            .arg("--repo-root")
            .arg(self.path())
            .args(args)
            .env_remove("CAPSULE_PROFILE")
            .env_remove("CAPSULE_LOG")
            .env("XDG_CONFIG_HOME", self.config_home.path())
            .output()
            .expect("capsule command should execute")
    }
}

fn document(feature_id: &str, stem: &str, version: &str, body: &str) -> String {
    let major = version.split('.').next().unwrap_or("0");
    format!(
        "feature_id: {feature_id}\ndoc_type: planning.{stem}\nschema_ref: urn:capsule:schema:capsule:{feature_id}:planning.{stem}:v{major}@{version}\nversion: {version}\nupdated: 2026-10-17\n\n# {stem}\n\n{body}"
    )
}

fn body_for(stem: &str, throughput: &str) -> String {
    match stem {
        "intent_card" | "action_budget" => format!(
            "## Concurrency Targets\n- throughput_rps: {throughput}\n- latency_ms: 250\n- error_budget_pct: 0.5\n- window_days: 30\n"
        ),
        "test_plan" => {
            "## Acceptance Checklist\n- [ ] `order_id` returned\n- [ ] `status` returned\n".to_string()
        }
        _ => format!("Notes for {stem}.\n"),
    }
}

fn stdout_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn assert_exit(output: &Output, code: i32) {
    assert_eq!(
        output.status.code(),
        Some(code),
        "stdout:\n{}\nstderr:\n{}",
        stdout_text(output),
        stderr_text(output)
    );
}

#[test]
fn validate_passing_capsule_prints_one_summary_line() {
    let repo = Repo::new();
    let output = repo.run(["validate", "--feature-id", FEATURE]);
    assert_exit(&output, 0);
    let stdout = stdout_text(&output);
    assert_eq!(stdout.lines().count(), 1, "{stdout}");
    assert!(stdout.starts_with(&format!("PASS {FEATURE}: ")), "{stdout}");
}

#[test]
fn validate_failure_prints_stop_need_and_exits_one() {
    let repo = Repo::new();
    repo.write_doc("action_budget", &body_for("action_budget", "150"));

    let output = repo.run(["validate", "--feature-id", FEATURE]);
    assert_exit(&output, 1);
    let stdout = stdout_text(&output);
    assert!(stdout.starts_with(&format!("STOP {FEATURE}: 1 failing rule(s)")), "{stdout}");
    assert!(stdout.contains("\nNEED\n"));
    assert!(stdout.contains("action_budget.md.throughput_rps"));
}

#[test]
fn validate_json_reports_the_run() {
    let repo = Repo::new();
    let output = repo.run([
        "validate",
        "--feature-id",
        FEATURE,
        "--step",
        "4",
        "--decision",
        "keep v1 contract",
        "--json",
    ]);
    assert_exit(&output, 0);
    let payload: Value = serde_json::from_slice(&output.stdout).expect("json stdout");
    assert_eq!(payload["run"]["gate"], json!("PASS"));
    assert_eq!(payload["run"]["provenance"]["step"], json!(4));
    assert_eq!(payload["stopNeed"], Value::Null);
    assert!(
        repo.path()
            .join(format!("features/{FEATURE}/reports/provenance.jsonl"))
            .is_file()
    );
}

#[test]
fn require_implementable_turns_warnings_into_failures() {
    let repo = Repo::new();
    fs::remove_file(repo.path().join(format!("features/{FEATURE}/audit_log.md")))
        .expect("remove doc");

    let lenient = repo.run(["validate", "--feature-id", FEATURE]);
    assert_exit(&lenient, 0);
    assert!(stdout_text(&lenient).contains("warned: capsule.documents [capsule]"));

    let strict = repo.run(["validate", "--feature-id", FEATURE, "--require-implementable"]);
    assert_exit(&strict, 1);
    assert!(stdout_text(&strict).contains("[implementable] "));
}

#[test]
fn package_prints_packaged_path() {
    let repo = Repo::new();
    let output = repo.run([
        "package",
        "--feature-id",
        FEATURE,
        "--date",
        "2026-10-17",
        "--revision",
        "abc123def456",
    ]);
    assert_exit(&output, 0);
    let stdout = stdout_text(&output);
    let bundle = stdout
        .trim_end()
        .strip_prefix("PACKAGED ")
        .unwrap_or_else(|| panic!("unexpected stdout: {stdout}"));
    assert!(bundle.ends_with(&format!("{FEATURE}-1.0.0-2026-10-17-abc123def456")));
    assert!(Path::new(bundle).join("manifest.json").is_file());
}

#[test]
fn package_refusal_exits_one_with_stop_need() {
    let repo = Repo::new();
    repo.write_doc("intent_card", &body_for("intent_card", "90"));

    let output = repo.run(["package", "--feature-id", FEATURE, "--revision", "r1"]);
    assert_exit(&output, 1);
    assert!(stdout_text(&output).starts_with("STOP "));
    assert!(!repo.path().join("dist/capsules").exists());
}

#[test]
fn package_with_held_lock_is_an_infrastructure_error() {
    let repo = Repo::new();
    repo.write(&format!("dist/.locks/{FEATURE}.lock"), "held\n");

    let output = repo.run(["package", "--feature-id", FEATURE, "--revision", "r1"]);
    assert_exit(&output, 2);
    assert!(stderr_text(&output).starts_with("error: packaging lock busy"));
}

#[test]
fn bump_schema_reports_rewritten_documents() {
    let repo = Repo::new();
    let output = repo.run([
        "bump-schema",
        "--feature-id",
        FEATURE,
        "--kind",
        "patch",
        "--note",
        "clarify status enum",
        "--validate",
    ]);
    assert_exit(&output, 0);
    let stdout = stdout_text(&output);
    assert!(
        stdout.starts_with(&format!("BUMPED {FEATURE} 1.0.0 -> 1.0.1 (15 document(s) rewritten)")),
        "{stdout}"
    );
    let vision = fs::read_to_string(repo.path().join(format!("features/{FEATURE}/vision.md")))
        .expect("vision");
    assert!(vision.contains(":v1@1.0.1"));
}

#[test]
fn registry_check_json_passes_on_a_consistent_registry() {
    let repo = Repo::new();
    let output = repo.run(["registry-check", "--json"]);
    assert_exit(&output, 0);
    let payload: Value = serde_json::from_slice(&output.stdout).expect("json stdout");
    assert_eq!(payload["run"]["gate"], json!("PASS"));
}

#[test]
fn missing_profile_is_an_infrastructure_error() {
    let repo = Repo::new();
    let output = repo.run([
        "--profile",
        "/nonexistent/capsule-profile.toml",
        "registry-check",
    ]);
    assert_exit(&output, 2);
    assert!(stderr_text(&output).starts_with("error: "));
}
