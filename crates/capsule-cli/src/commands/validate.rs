use crate::support::{
    Context, EXIT_FAIL, EXIT_OK, exit_code_for, infra_error, orchestrator_or_exit, print_json,
    render_run_text,
};
use capsule_gate::{GateError, RunOptions, StopNeed, run_all_features, summary_line};
use capsule_kernel::{GateRun, Provenance};
use serde_json::{Value, json};
use std::path::PathBuf;

pub struct Args {
    pub feature_id: Option<String>,
    pub doc: Option<PathBuf>,
    pub step: Option<u32>,
    pub decisions: Vec<String>,
    pub links: Vec<String>,
    pub allow_hard_size: bool,
    pub require_implementable: bool,
    pub json: bool,
}

fn run_payload(run: &GateRun) -> Value {
    json!({
        "summary": summary_line(run),
        "stopNeed": StopNeed::from_run(run),
        "run": run,
    })
}

pub fn run(ctx: &Context, args: Args) -> i32 {
    let options = RunOptions {
        allow_hard_size: args.allow_hard_size,
        implementable: args.require_implementable,
        provenance: Provenance {
            step: args.step,
            decisions: args.decisions,
            links: args.links,
            overrides: Vec::new(),
        },
    };
    let feature_id = args.feature_id.as_deref();

    let runs: Result<Vec<GateRun>, GateError> = match (&args.doc, feature_id) {
        (Some(doc), _) => orchestrator_or_exit(ctx, feature_id)
            .run_document(doc, feature_id, &options)
            .map(|run| vec![run]),
        (None, Some(feature_id)) => orchestrator_or_exit(ctx, Some(feature_id))
            .run_capsule(feature_id, &options)
            .map(|run| vec![run]),
        (None, None) => run_all_features(&ctx.layers(), &options),
    };
    let runs = match runs {
        Ok(runs) => runs,
        Err(e) => return infra_error(e),
    };
    if runs.is_empty() {
        eprintln!("capsule validate: no capsules found");
        return EXIT_OK;
    }

    let code = if runs.iter().all(|run| exit_code_for(run) == EXIT_OK) {
        EXIT_OK
    } else {
        EXIT_FAIL
    };

    if args.json {
        let payload = match runs.as_slice() {
            [single] if args.feature_id.is_some() || args.doc.is_some() => run_payload(single),
            many => Value::Array(many.iter().map(run_payload).collect()),
        };
        let printed = print_json(&payload);
        return if printed == EXIT_OK { code } else { printed };
    }

    for run in &runs {
        println!("{}", render_run_text(run));
    }
    code
}
