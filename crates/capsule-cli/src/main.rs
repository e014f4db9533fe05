//! Capsule CLI: the `capsule` command.

mod cli;
mod commands;
mod support;

use clap::Parser;
use cli::{Cli, Commands};
use support::Context;

fn main() {
    let cli = Cli::parse();
    support::init_tracing();

    let ctx = Context {
        repo_root: cli.repo_root,
        profile: cli.profile,
    };
    tracing::debug!(repo_root = %ctx.repo_root.display(), "capsule invoked");

    let code = match cli.command {
        Commands::Validate {
            feature_id,
            doc,
            step,
            decisions,
            links,
            allow_hard_size,
            require_implementable,
            json,
        } => commands::validate::run(
            &ctx,
            commands::validate::Args {
                feature_id,
                doc,
                step,
                decisions,
                links,
                allow_hard_size,
                require_implementable,
                json,
            },
        ),

        Commands::Package {
            feature_id,
            allow_gt_hard_tokens,
            date,
            revision,
            json,
        } => commands::package::run(
            &ctx,
            commands::package::Args {
                feature_id,
                allow_gt_hard_tokens: allow_gt_hard_tokens.is_yes(),
                date,
                revision,
                json,
            },
        ),

        Commands::BumpSchema {
            feature_id,
            kind,
            note,
            validate,
            json,
        } => commands::bump_schema::run(&ctx, feature_id, kind.into(), note, validate, json),

        Commands::RegistryCheck { json } => commands::registry_check::run(&ctx, json),

        Commands::Watch {
            feature_id,
            interval_ms,
            require_implementable,
        } => commands::watch::run(&ctx, feature_id, interval_ms, require_implementable),
    };

    std::process::exit(code);
}
