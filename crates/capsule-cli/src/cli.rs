use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "capsule",
    about = "Capsule: gate-based validation and packaging for feature planning capsules",
    version
)]
pub struct Cli {
    /// Repository root holding the features and templates directories
    #[arg(long, global = true, default_value = ".")]
    pub repo_root: PathBuf,

    /// Profile configuration layer (overrides $CAPSULE_PROFILE)
    #[arg(long, global = true)]
    pub profile: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the gate over one capsule, one document, or every capsule
    Validate {
        /// Feature id of the capsule to validate
        #[arg(long)]
        feature_id: Option<String>,

        /// Validate a single document (with --feature-id, capsule checks run too)
        #[arg(long)]
        doc: Option<PathBuf>,

        /// Pipeline step number recorded in provenance
        #[arg(long)]
        step: Option<u32>,

        /// Decision recorded in provenance (repeatable)
        #[arg(long = "decision")]
        decisions: Vec<String>,

        /// Reference recorded in provenance (repeatable)
        #[arg(long = "link")]
        links: Vec<String>,

        /// Downgrade hard size failures to recorded warnings
        #[arg(long)]
        allow_hard_size: bool,

        /// Treat every warning as a failure
        #[arg(long)]
        require_implementable: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Package a verified capsule into an immutable bundle
    Package {
        /// Feature id of the capsule to package
        #[arg(long)]
        feature_id: String,

        /// Accept documents above the hard token limit
        #[arg(long = "allow-gt-1600", value_enum, default_value_t = YesNo::No)]
        allow_gt_hard_tokens: YesNo,

        /// Bundle date (YYYY-MM-DD); today in UTC by default
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Revision label; probed from git or jj by default
        #[arg(long)]
        revision: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Bump the output contract version and rewrite dependent references
    BumpSchema {
        /// Feature id of the capsule whose schema is bumped
        #[arg(long)]
        feature_id: String,

        /// Which version component to bump
        #[arg(long, value_enum)]
        kind: BumpKindArg,

        /// Why the contract changed (recorded in provenance)
        #[arg(long)]
        note: String,

        /// Re-run the gate after rewriting
        #[arg(long)]
        validate: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check the template registry against the templates on disk
    RegistryCheck {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Re-validate a capsule whenever its files change
    Watch {
        /// Feature id of the capsule to watch
        #[arg(long)]
        feature_id: String,

        /// Poll interval in milliseconds
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,

        /// Treat every warning as a failure
        #[arg(long)]
        require_implementable: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum YesNo {
    Yes,
    No,
}

impl YesNo {
    pub fn is_yes(self) -> bool {
        self == YesNo::Yes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BumpKindArg {
    Patch,
    Minor,
    Major,
}

impl From<BumpKindArg> for capsule_kernel::BumpKind {
    fn from(kind: BumpKindArg) -> Self {
        match kind {
            BumpKindArg::Patch => capsule_kernel::BumpKind::Patch,
            BumpKindArg::Minor => capsule_kernel::BumpKind::Minor,
            BumpKindArg::Major => capsule_kernel::BumpKind::Major,
        }
    }
}
