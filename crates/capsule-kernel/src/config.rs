//! Engine configuration and layered resolution.
//!
//! Configuration is resolved once per invocation and threaded through every
//! check. Layers are merged in precedence order, later layers winning:
//!
//! ```text
//! built-in defaults
//!     ← profile          (--profile, $CAPSULE_PROFILE, <config_dir>/capsule/config.toml)
//!     ← repo overlay     (<repo>/.capsule/config.toml)
//!     ← feature-local    (<features_dir>/<feature_id>/capsule.toml)
//! ```
//!
//! Tables merge key by key; scalars and arrays replace wholesale.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use toml::{Table, Value};

pub const PROFILE_ENV: &str = "CAPSULE_PROFILE";
pub const REPO_OVERLAY_PATH: &str = ".capsule/config.toml";
pub const FEATURE_CONFIG_FILE: &str = "capsule.toml";

/// Document set of a complete capsule, in authoring order.
pub const DEFAULT_REQUIRED_DOCUMENTS: [&str; 16] = [
    "intent_card.md",
    "output_contract.schema.json",
    "vision.md",
    "exploration.md",
    "assumptions.md",
    "reference_set.md",
    "observability_slos.md",
    "concurrency_model.md",
    "action_budget.md",
    "sync_policies.md",
    "test_plan.md",
    "manual_tests.md",
    "runtime_concurrency_tests.md",
    "validation_report.md",
    "phase_transition.md",
    "audit_log.md",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub identity: IdentityConfig,
    pub size: SizeConfig,
    pub leakage: LeakageConfig,
    pub concurrency: ConcurrencyConfig,
    pub capsule: CapsuleConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdentityConfig {
    /// `<ns>` segment of `urn:<ns>:schema:capsule:...`.
    pub urn_namespace: String,
    /// Documents carrying this feature_id are template skeletons and skipped.
    pub placeholder_feature_id: String,
    pub allowed_namespaces: Vec<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            urn_namespace: "capsule".to_string(),
            placeholder_feature_id: "<feature_id>".to_string(),
            allowed_namespaces: vec![
                "planning.".to_string(),
                "governance.".to_string(),
                "quality.".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorKind {
    /// Whitespace-separated words times `words_multiplier`.
    Words,
    /// Characters divided by four.
    Chars,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SizeConfig {
    pub soft_tokens: usize,
    pub hard_tokens: usize,
    pub estimator: EstimatorKind,
    pub words_multiplier: f64,
}

impl Default for SizeConfig {
    fn default() -> Self {
        Self {
            soft_tokens: 800,
            hard_tokens: 1600,
            estimator: EstimatorKind::Words,
            words_multiplier: 1.33,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatternConfig {
    pub id: String,
    pub regex: String,
}

impl PatternConfig {
    fn new(id: &str, regex: &str) -> Self {
        Self {
            id: id.to_string(),
            regex: regex.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LeakageConfig {
    /// Version of the pattern set itself; part of the policy digest.
    pub patterns_version: String,
    pub patterns: Vec<PatternConfig>,
}

impl Default for LeakageConfig {
    fn default() -> Self {
        Self {
            patterns_version: "2026.10.1".to_string(),
            patterns: vec![
                PatternConfig::new("meta.ai_disclaimer", r"(?i)\bas an ai(?: language)? model\b"),
                PatternConfig::new(
                    "meta.instruction_echo",
                    r"(?i)\b(?:ignore|disregard) (?:all )?(?:previous|prior|above) instructions\b",
                ),
                PatternConfig::new(
                    "meta.prompt_marker",
                    r"(?i)(?:<\|im_start\|>|<\|system\|>|\bsystem prompt\s*:)",
                ),
                PatternConfig::new(
                    "meta.authoring_directive",
                    r"(?i)<!--\s*(?:prompt|instructions?|llm)\s*:",
                ),
                PatternConfig::new("secret.aws_access_key", r"\bAKIA[0-9A-Z]{16}\b"),
                PatternConfig::new("secret.private_key", r"-----BEGIN (?:[A-Z]+ )?PRIVATE KEY-----"),
                PatternConfig::new("secret.github_token", r"\bgh[pousr]_[A-Za-z0-9]{36,}\b"),
                PatternConfig::new(
                    "secret.assignment",
                    r#"(?i)\b(?:api[_-]?key|secret|password|access[_-]?token)\b\s*[:=]\s*["']?[A-Za-z0-9/+_\-]{16,}"#,
                ),
                PatternConfig::new("phrase.lorem_ipsum", r"(?i)\blorem ipsum\b"),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConcurrencyConfig {
    pub intent_doc_type: String,
    pub budget_doc_type: String,
    /// Heading (case-insensitive substring) of the tuple section.
    pub section_heading: String,
    /// Exact token marking a value as not yet concrete.
    pub pending_sentinel: String,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            intent_doc_type: "planning.intent_card".to_string(),
            budget_doc_type: "planning.action_budget".to_string(),
            section_heading: "concurrency targets".to_string(),
            pending_sentinel: "<TBD>".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CapsuleConfig {
    pub schema_file: String,
    pub required_documents: Vec<String>,
    pub acceptance_heading: String,
    pub open_questions_heading: String,
}

impl Default for CapsuleConfig {
    fn default() -> Self {
        Self {
            schema_file: "output_contract.schema.json".to_string(),
            required_documents: DEFAULT_REQUIRED_DOCUMENTS
                .iter()
                .map(|name| name.to_string())
                .collect(),
            acceptance_heading: "acceptance".to_string(),
            open_questions_heading: "open question".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub features_dir: String,
    pub templates_dir: String,
    pub registry_file: String,
    pub output_root: String,
    /// Per-feature reports directory, relative to the capsule directory.
    pub reports_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            features_dir: "features".to_string(),
            templates_dir: "templates".to_string(),
            registry_file: "templates/registry.json".to_string(),
            output_root: "dist".to_string(),
            reports_dir: "reports".to_string(),
        }
    }
}

/// Where the profile layer comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ProfileSource {
    /// `$CAPSULE_PROFILE`, else `<config_dir>/capsule/config.toml` if present.
    #[default]
    Auto,
    /// An explicit path, which must exist.
    Path(PathBuf),
    Disabled,
}

/// Inputs to configuration resolution.
#[derive(Debug, Clone)]
pub struct ConfigLayers {
    pub repo_root: PathBuf,
    pub profile: ProfileSource,
    pub feature_id: Option<String>,
}

impl ConfigLayers {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            profile: ProfileSource::Auto,
            feature_id: None,
        }
    }

    pub fn with_profile(mut self, profile: ProfileSource) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_feature(mut self, feature_id: impl Into<String>) -> Self {
        self.feature_id = Some(feature_id.into());
        self
    }
}

/// A resolved configuration plus the layer files that contributed to it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub config: EngineConfig,
    pub layers: Vec<PathBuf>,
}

impl EngineConfig {
    /// Resolve defaults → profile → repo overlay → feature-local.
    pub fn resolve(layers: &ConfigLayers) -> Result<ResolvedConfig, ConfigError> {
        let mut merged = match Value::try_from(EngineConfig::default()) {
            Ok(Value::Table(table)) => table,
            Ok(_) => return Err(ConfigError::Invalid("defaults must be a table".to_string())),
            Err(err) => return Err(ConfigError::Invalid(err.to_string())),
        };
        let mut applied = Vec::new();

        if let Some(path) = profile_path(&layers.profile)? {
            merge_tables(&mut merged, read_layer(&path)?);
            applied.push(path);
        }

        let overlay = layers.repo_root.join(REPO_OVERLAY_PATH);
        if overlay.is_file() {
            merge_tables(&mut merged, read_layer(&overlay)?);
            applied.push(overlay);
        }

        if let Some(feature_id) = &layers.feature_id {
            let features_dir = merged
                .get("paths")
                .and_then(|paths| paths.get("features_dir"))
                .and_then(Value::as_str)
                .unwrap_or("features")
                .to_string();
            let local = layers
                .repo_root
                .join(features_dir)
                .join(feature_id)
                .join(FEATURE_CONFIG_FILE);
            if local.is_file() {
                merge_tables(&mut merged, read_layer(&local)?);
                applied.push(local);
            }
        }

        let config: EngineConfig = Value::Table(merged)
            .try_into()
            .map_err(|err: toml::de::Error| ConfigError::Invalid(err.to_string()))?;
        config.validate()?;
        tracing::debug!(layers = applied.len(), "configuration resolved");
        Ok(ResolvedConfig {
            config,
            layers: applied,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.size.soft_tokens > self.size.hard_tokens {
            return Err(ConfigError::Invalid(format!(
                "size.soft_tokens ({}) exceeds size.hard_tokens ({})",
                self.size.soft_tokens, self.size.hard_tokens
            )));
        }
        if !(self.size.words_multiplier.is_finite() && self.size.words_multiplier > 0.0) {
            return Err(ConfigError::Invalid(
                "size.words_multiplier must be a positive number".to_string(),
            ));
        }
        if self.identity.allowed_namespaces.is_empty() {
            return Err(ConfigError::Invalid(
                "identity.allowed_namespaces must not be empty".to_string(),
            ));
        }
        if self.concurrency.pending_sentinel.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "concurrency.pending_sentinel must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Directory holding one feature's capsule.
    pub fn capsule_dir(&self, repo_root: &Path, feature_id: &str) -> PathBuf {
        repo_root.join(&self.paths.features_dir).join(feature_id)
    }
}

fn profile_path(source: &ProfileSource) -> Result<Option<PathBuf>, ConfigError> {
    match source {
        ProfileSource::Disabled => Ok(None),
        ProfileSource::Path(path) => {
            if path.is_file() {
                Ok(Some(path.clone()))
            } else {
                Err(ConfigError::ProfileMissing(path.clone()))
            }
        }
        ProfileSource::Auto => {
            if let Some(explicit) = std::env::var_os(PROFILE_ENV).filter(|v| !v.is_empty()) {
                return profile_path(&ProfileSource::Path(PathBuf::from(explicit)));
            }
            Ok(dirs::config_dir()
                .map(|dir| dir.join("capsule").join("config.toml"))
                .filter(|path| path.is_file()))
        }
    }
}

fn read_layer(path: &Path) -> Result<Table, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    text.parse::<Table>().map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn merge_tables(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Table(existing)), Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
