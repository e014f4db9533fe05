use crate::support::{
    Context, EXIT_OK, exit_code_for, infra_error, orchestrator_or_exit, print_json,
    render_run_text,
};
use capsule_gate::{BumpRequest, bump_schema, summary_line};
use capsule_kernel::BumpKind;
use serde_json::json;

pub fn run(
    ctx: &Context,
    feature_id: String,
    kind: BumpKind,
    note: String,
    validate: bool,
    json_output: bool,
) -> i32 {
    let orchestrator = orchestrator_or_exit(ctx, Some(&feature_id));
    let request = BumpRequest {
        feature_id,
        kind,
        note,
        validate,
    };
    let outcome = match bump_schema(&orchestrator, &request) {
        Ok(outcome) => outcome,
        Err(e) => return infra_error(e),
    };
    let code = outcome.run.as_ref().map_or(EXIT_OK, exit_code_for);

    if json_output {
        let printed = print_json(&json!({
            "featureId": request.feature_id,
            "kind": kind.as_str(),
            "from": outcome.from.to_string(),
            "to": outcome.to.to_string(),
            "schema": outcome.schema_path.display().to_string(),
            "rewritten": outcome.rewritten,
            "validation": outcome.run.as_ref().map(summary_line),
        }));
        return if printed == EXIT_OK { code } else { printed };
    }

    println!(
        "BUMPED {} {} -> {} ({} document(s) rewritten)",
        request.feature_id,
        outcome.from,
        outcome.to,
        outcome.rewritten.len()
    );
    for name in &outcome.rewritten {
        println!("  - {name}");
    }
    if let Some(run) = &outcome.run {
        println!("{}", render_run_text(run));
    }
    code
}
