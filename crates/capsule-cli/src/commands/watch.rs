use crate::support::{Context, EXIT_OK, infra_error, orchestrator_or_exit, render_run_text};
use capsule_gate::RunOptions;
use capsule_gate::watch::run_watch;
use std::time::Duration;
use tokio::sync::watch;

pub fn run(ctx: &Context, feature_id: String, interval_ms: u64, require_implementable: bool) -> i32 {
    let orchestrator = orchestrator_or_exit(ctx, Some(&feature_id));
    let dir = orchestrator
        .config()
        .capsule_dir(orchestrator.repo_root(), &feature_id);
    if !dir.is_dir() {
        return infra_error(format!("capsule directory not found: {}", dir.display()));
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => return infra_error(format!("failed to create tokio runtime: {e}")),
    };

    eprintln!("capsule watch {feature_id}");
    eprintln!("  directory: {}", dir.display());
    eprintln!("  interval: {interval_ms}ms (ctrl-c to stop)");

    let options = RunOptions {
        implementable: require_implementable,
        ..RunOptions::default()
    };
    let stats = runtime.block_on(async move {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = shutdown_tx.send(true);
            }
        });
        run_watch(
            dir,
            Duration::from_millis(interval_ms),
            shutdown_rx,
            move || orchestrator.run_capsule(&feature_id, &options),
            |outcome| match outcome {
                Ok(run) => println!("{}", render_run_text(&run)),
                Err(e) => eprintln!("error: {e}"),
            },
        )
        .await
    });

    eprintln!(
        "capsule watch stopped: {} run(s), {} skipped tick(s)",
        stats.runs, stats.skipped_ticks
    );
    EXIT_OK
}
