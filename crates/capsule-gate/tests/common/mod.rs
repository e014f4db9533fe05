#![allow(dead_code)]

use capsule_gate::Orchestrator;
use capsule_kernel::config::DEFAULT_REQUIRED_DOCUMENTS;
use capsule_kernel::{ConfigLayers, ProfileSource};
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const FEATURE: &str = "checkout-flow";
pub const VERSION: &str = "1.0.0";
pub const REQUIRED_KEYS: [&str; 3] = ["order_id", "total_cents", "status"];

/// A repository holding one complete, passing capsule plus its templates
/// and registry.
pub struct Fixture {
    root: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let fixture = Self {
            root: tempfile::tempdir().expect("tempdir"),
        };
        fixture.write_templates();
        for name in DEFAULT_REQUIRED_DOCUMENTS {
            if let Some(stem) = name.strip_suffix(".md") {
                fixture.write_doc(name, &document(FEATURE, stem, VERSION, &body_for(stem)));
            }
        }
        fixture.write_schema(&schema(VERSION, &REQUIRED_KEYS, json!(100)));
        fixture
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn capsule_dir(&self) -> PathBuf {
        self.root().join("features").join(FEATURE)
    }

    pub fn doc_path(&self, name: &str) -> PathBuf {
        self.capsule_dir().join(name)
    }

    pub fn write_doc(&self, name: &str, text: &str) {
        let path = self.doc_path(name);
        fs::create_dir_all(path.parent().expect("parent")).expect("capsule dir");
        fs::write(path, text).expect("write document");
    }

    pub fn read_doc(&self, name: &str) -> String {
        fs::read_to_string(self.doc_path(name)).expect("read document")
    }

    pub fn write_schema(&self, value: &Value) {
        let text = serde_json::to_string_pretty(value).expect("schema json");
        self.write_doc("output_contract.schema.json", &format!("{text}\n"));
    }

    pub fn write(&self, relative: &str, text: &str) {
        let path = self.root().join(relative);
        fs::create_dir_all(path.parent().expect("parent")).expect("parent dir");
        fs::write(path, text).expect("write file");
    }

    pub fn layers(&self) -> ConfigLayers {
        ConfigLayers::new(self.root()).with_profile(ProfileSource::Disabled)
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::from_layers(&self.layers().with_feature(FEATURE)).expect("orchestrator")
    }

    fn write_templates(&self) {
        let mut registry = serde_json::Map::new();
        for name in DEFAULT_REQUIRED_DOCUMENTS {
            let Some(stem) = name.strip_suffix(".md") else {
                continue;
            };
            let path = format!("templates/{stem}.md");
            self.write(
                &path,
                &document("<feature_id>", stem, "0.0.0", "Template body.\n"),
            );
            registry.insert(format!("planning.{stem}"), Value::String(path));
        }
        let text = serde_json::to_string_pretty(&Value::Object(registry)).expect("registry");
        self.write("templates/registry.json", &format!("{text}\n"));
    }
}

pub fn schema_ref(feature_id: &str, stem: &str, version: &str) -> String {
    let major = version.split('.').next().unwrap_or("0");
    format!("urn:capsule:schema:capsule:{feature_id}:planning.{stem}:v{major}@{version}")
}

pub fn document(feature_id: &str, stem: &str, version: &str, body: &str) -> String {
    format!(
        "feature_id: {feature_id}\nowner: payments\ndoc_type: planning.{stem}\nschema_ref: {}\nversion: {version}\nupdated: 2026-10-17\n\n# {stem}\n\n{body}",
        schema_ref(feature_id, stem, version)
    )
}

pub fn concurrency_section(throughput: &str) -> String {
    format!(
        "## Concurrency Targets\n- throughput_rps: {throughput}\n- latency_ms: 250 ms\n- error_budget_pct: 0.5\n- window_days: 30\n"
    )
}

fn body_for(stem: &str) -> String {
    match stem {
        "intent_card" | "action_budget" => {
            format!("Checkout must stay fast under load.\n\n{}", concurrency_section("100"))
        }
        "test_plan" => {
            let mut body = String::from("## Acceptance Checklist\n");
            for key in REQUIRED_KEYS {
                body.push_str(&format!("- [ ] `{key}` is returned by the API\n"));
            }
            body
        }
        _ => format!("Notes for the {stem} stage of the checkout flow.\n"),
    }
}

pub fn schema(version: &str, required: &[&str], throughput: Value) -> Value {
    json!({
        "version": version,
        "required": required,
        "properties": {
            "order_id": {"type": "string"},
            "total_cents": {"type": "integer"},
            "status": {"type": "string"},
            "concurrency_targets": {
                "throughput_rps": throughput,
                "latency_ms": {"value": 250, "unit": "ms"},
                "error_budget_pct": 0.5,
                "window_days": 30
            }
        }
    })
}
