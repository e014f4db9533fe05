//! Size and leakage policy.
//!
//! The size rule estimates a token count with a swappable [`TokenEstimator`]
//! and grades it against soft and hard thresholds. The leakage rule scans
//! for forbidden patterns and reports pattern ids, never the matched text.

use crate::config::{EngineConfig, EstimatorKind, LeakageConfig, SizeConfig};
use crate::digest::digest_value;
use crate::document::Document;
use crate::error::ConfigError;
use crate::gate::{FailureClass, Verdict};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;

pub const CHECK_SIZE: &str = "size";
pub const CHECK_LEAKAGE: &str = "leakage";
pub const POLICY_DIGEST_PREFIX: &str = "pol1_";

/// Approximates how many model tokens a text occupies.
pub trait TokenEstimator: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;
    fn estimate(&self, text: &str) -> usize;
}

/// Whitespace-separated words times a multiplier, rounded up.
#[derive(Debug, Clone, Copy)]
pub struct WordEstimator {
    pub multiplier: f64,
}

impl TokenEstimator for WordEstimator {
    fn name(&self) -> &'static str {
        "words"
    }

    fn estimate(&self, text: &str) -> usize {
        let words = text.split_whitespace().count();
        (words as f64 * self.multiplier).ceil() as usize
    }
}

/// Four characters per token, rounded up.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharEstimator;

impl TokenEstimator for CharEstimator {
    fn name(&self) -> &'static str {
        "chars"
    }

    fn estimate(&self, text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }
}

#[derive(Debug, Clone)]
pub struct ForbiddenPattern {
    pub id: String,
    pub regex: Regex,
}

/// Compiled size and leakage policy.
#[derive(Debug)]
pub struct Policy {
    pub soft_tokens: usize,
    pub hard_tokens: usize,
    pub estimator: Box<dyn TokenEstimator>,
    pub patterns_version: String,
    pub patterns: Vec<ForbiddenPattern>,
    digest: String,
}

/// The policy material captured in bundle manifests.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicySnapshot {
    pub soft_tokens: usize,
    pub hard_tokens: usize,
    pub estimator: EstimatorKind,
    pub words_multiplier: f64,
    pub patterns_version: String,
    pub patterns: BTreeMap<String, String>,
}

impl PolicySnapshot {
    pub fn new(size: &SizeConfig, leakage: &LeakageConfig) -> Self {
        Self {
            soft_tokens: size.soft_tokens,
            hard_tokens: size.hard_tokens,
            estimator: size.estimator,
            words_multiplier: size.words_multiplier,
            patterns_version: leakage.patterns_version.clone(),
            patterns: leakage
                .patterns
                .iter()
                .map(|p| (p.id.clone(), p.regex.clone()))
                .collect(),
        }
    }
}

impl Policy {
    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        let estimator: Box<dyn TokenEstimator> = match config.size.estimator {
            EstimatorKind::Words => Box::new(WordEstimator {
                multiplier: config.size.words_multiplier,
            }),
            EstimatorKind::Chars => Box::new(CharEstimator),
        };
        let mut patterns = Vec::with_capacity(config.leakage.patterns.len());
        for pattern in &config.leakage.patterns {
            let regex = Regex::new(&pattern.regex).map_err(|source| ConfigError::Pattern {
                id: pattern.id.clone(),
                source,
            })?;
            patterns.push(ForbiddenPattern {
                id: pattern.id.clone(),
                regex,
            });
        }
        let digest = digest_value(
            POLICY_DIGEST_PREFIX,
            &PolicySnapshot::new(&config.size, &config.leakage),
        )
        .map_err(|err| ConfigError::Invalid(format!("policy digest: {err}")))?;
        Ok(Self {
            soft_tokens: config.size.soft_tokens,
            hard_tokens: config.size.hard_tokens,
            estimator,
            patterns_version: config.leakage.patterns_version.clone(),
            patterns,
            digest,
        })
    }

    /// Swap the token estimator, e.g. for a model-specific tokenizer.
    pub fn with_estimator(mut self, estimator: Box<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Digest over thresholds, estimator, and the versioned pattern set.
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

/// Outcome of the size rule for one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeOutcome {
    pub tokens: usize,
    pub verdict: Verdict,
    /// Set when the hard threshold was exceeded and the override downgraded it.
    pub override_note: Option<String>,
}

pub fn check_size(doc: &Document, policy: &Policy, allow_hard: bool) -> SizeOutcome {
    let tokens = policy.estimator.estimate(&doc.raw);
    let estimator = policy.estimator.name();
    let subject = doc.name.as_str();

    if tokens > policy.hard_tokens {
        if allow_hard {
            let note = format!(
                "size override: {subject} at ~{tokens} tokens exceeds hard limit {}",
                policy.hard_tokens
            );
            tracing::warn!(document = subject, tokens, "hard size limit overridden");
            return SizeOutcome {
                tokens,
                verdict: Verdict::warn(
                    CHECK_SIZE,
                    subject,
                    FailureClass::SizeViolation,
                    format!(
                        "~{tokens} tokens ({estimator}) exceeds hard limit {} (override recorded)",
                        policy.hard_tokens
                    ),
                ),
                override_note: Some(note),
            };
        }
        let excess = tokens - policy.hard_tokens;
        return SizeOutcome {
            tokens,
            verdict: Verdict::fail(
                CHECK_SIZE,
                subject,
                FailureClass::SizeViolation,
                format!(
                    "~{tokens} tokens ({estimator}) exceeds hard limit {}",
                    policy.hard_tokens
                ),
            )
            .with_remedy(format!(
                "trim about {excess} tokens from {subject}, or re-run with the hard-size override"
            )),
            override_note: None,
        };
    }

    let verdict = if tokens > policy.soft_tokens {
        Verdict::warn(
            CHECK_SIZE,
            subject,
            FailureClass::SizeViolation,
            format!(
                "~{tokens} tokens ({estimator}) exceeds soft limit {}",
                policy.soft_tokens
            ),
        )
    } else {
        Verdict::pass(
            CHECK_SIZE,
            subject,
            format!("~{tokens} tokens ({estimator})"),
        )
    };
    SizeOutcome {
        tokens,
        verdict,
        override_note: None,
    }
}

pub fn check_leakage(doc: &Document, policy: &Policy) -> Verdict {
    let mut hits: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (idx, line) in doc.raw.lines().enumerate() {
        for pattern in &policy.patterns {
            if pattern.regex.is_match(line) {
                hits.entry(pattern.id.as_str()).or_default().push(idx + 1);
            }
        }
    }

    if hits.is_empty() {
        return Verdict::pass(
            CHECK_LEAKAGE,
            &doc.name,
            format!(
                "no forbidden patterns (set {}, {} patterns)",
                policy.patterns_version,
                policy.patterns.len()
            ),
        );
    }

    let detail = hits
        .iter()
        .map(|(id, lines)| {
            let lines = lines
                .iter()
                .map(|line| line.to_string())
                .collect::<Vec<_>>()
                .join(",");
            format!("{id} (line {lines})")
        })
        .collect::<Vec<_>>()
        .join("; ");
    let remedy = format!(
        "remove or rewrite the flagged lines in {}: {}",
        doc.name,
        hits.keys().copied().collect::<Vec<_>>().join(", ")
    );
    Verdict::fail(
        CHECK_LEAKAGE,
        &doc.name,
        FailureClass::LeakageDetected,
        format!("forbidden pattern(s) matched: {detail}"),
    )
    .with_remedy(remedy)
}
