use capsule_gate::{Orchestrator, StopNeed, summary_line};
use capsule_kernel::{ConfigLayers, GateRun, ProfileSource};
use serde::Serialize;
use std::fmt::Display;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// PASS or WARN.
pub const EXIT_OK: i32 = 0;
/// A gate failed or packaging was refused.
pub const EXIT_FAIL: i32 = 1;
/// Usage, configuration, or I/O problem.
pub const EXIT_INFRA: i32 = 2;

pub const LOG_ENV: &str = "CAPSULE_LOG";

/// Global options shared by every subcommand.
#[derive(Debug, Clone)]
pub struct Context {
    pub repo_root: PathBuf,
    pub profile: Option<PathBuf>,
}

impl Context {
    pub fn layers(&self) -> ConfigLayers {
        let profile = match &self.profile {
            Some(path) => ProfileSource::Path(path.clone()),
            None => ProfileSource::Auto,
        };
        ConfigLayers::new(&self.repo_root).with_profile(profile)
    }

    pub fn feature_layers(&self, feature_id: Option<&str>) -> ConfigLayers {
        match feature_id {
            Some(feature_id) => self.layers().with_feature(feature_id),
            None => self.layers(),
        }
    }
}

/// Logs go to stderr so stdout stays machine-readable.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

pub fn infra_error(err: impl Display) -> i32 {
    eprintln!("error: {err}");
    EXIT_INFRA
}

pub fn orchestrator_or_exit(ctx: &Context, feature_id: Option<&str>) -> Orchestrator {
    Orchestrator::from_layers(&ctx.feature_layers(feature_id)).unwrap_or_else(|e| {
        eprintln!("error: {e}");
        std::process::exit(EXIT_INFRA);
    })
}

pub fn print_json(value: &impl Serialize) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(text) => {
            println!("{text}");
            EXIT_OK
        }
        Err(e) => infra_error(format!("failed to render JSON: {e}")),
    }
}

pub fn exit_code_for(run: &GateRun) -> i32 {
    if run.gate.is_success() {
        EXIT_OK
    } else {
        EXIT_FAIL
    }
}

/// STOP/NEED for a failing run, the one-line summary otherwise.
pub fn render_run_text(run: &GateRun) -> String {
    match StopNeed::from_run(run) {
        Some(stop) => format!("{}\n{}", stop.render(), summary_line(run)),
        None => summary_line(run),
    }
}
