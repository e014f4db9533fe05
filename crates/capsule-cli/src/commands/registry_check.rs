use crate::support::{
    Context, EXIT_OK, exit_code_for, infra_error, orchestrator_or_exit, print_json,
    render_run_text,
};
use capsule_gate::{RunOptions, StopNeed, summary_line};
use serde_json::json;

pub fn run(ctx: &Context, json_output: bool) -> i32 {
    let run = match orchestrator_or_exit(ctx, None).run_registry_check(&RunOptions::default()) {
        Ok(run) => run,
        Err(e) => return infra_error(e),
    };
    let code = exit_code_for(&run);

    if json_output {
        let printed = print_json(&json!({
            "summary": summary_line(&run),
            "stopNeed": StopNeed::from_run(&run),
            "run": run,
        }));
        return if printed == EXIT_OK { code } else { printed };
    }
    println!("{}", render_run_text(&run));
    code
}
