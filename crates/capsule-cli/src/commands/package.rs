use crate::support::{
    Context, EXIT_FAIL, EXIT_INFRA, EXIT_OK, infra_error, orchestrator_or_exit, print_json,
};
use capsule_gate::{PackageError, PackageRequest, package};
use chrono::NaiveDate;
use serde_json::json;

pub struct Args {
    pub feature_id: String,
    pub allow_gt_hard_tokens: bool,
    pub date: Option<NaiveDate>,
    pub revision: Option<String>,
    pub json: bool,
}

pub fn run(ctx: &Context, args: Args) -> i32 {
    let orchestrator = orchestrator_or_exit(ctx, Some(&args.feature_id));
    let request = PackageRequest {
        feature_id: args.feature_id,
        allow_gt_hard_tokens: args.allow_gt_hard_tokens,
        date: args.date,
        revision: args.revision,
    };

    match package(&orchestrator, &request) {
        Ok(outcome) => {
            if args.json {
                return print_json(&json!({
                    "packaged": true,
                    "bundle": outcome.bundle_dir.display().to_string(),
                    "reused": outcome.reused,
                    "manifest": outcome.manifest,
                }));
            }
            println!("{}", outcome.success_line());
            EXIT_OK
        }
        Err(PackageError::Precondition(stop)) => {
            if args.json {
                let printed = print_json(&json!({
                    "packaged": false,
                    "stopNeed": stop,
                }));
                return if printed == EXIT_OK { EXIT_FAIL } else { printed };
            }
            println!("{}", stop.render());
            EXIT_FAIL
        }
        Err(e @ PackageError::LockBusy(_)) => {
            eprintln!("error: {e}; another packaging run holds the lock");
            EXIT_INFRA
        }
        Err(e) => infra_error(e),
    }
}
