//! Registry consistency: doc_type labels ↔ template files.
//!
//! The registry must be a bijection with the discovered template set. The
//! two directions are checked independently and then combined into one
//! round-trip verdict.

use crate::gate::{FailureClass, Gate, Verdict, aggregate};
use crate::header::validate_doc_type;
use std::collections::{BTreeMap, BTreeSet};

pub const CHECK_NAMESPACE: &str = "registry.namespace";
pub const CHECK_FORWARD: &str = "registry.forward";
pub const CHECK_REVERSE: &str = "registry.reverse";
pub const CHECK_ROUND_TRIP: &str = "registry.round_trip";
pub const REGISTRY_SUBJECT: &str = "registry";

/// doc_type → template path (repo-relative, `/`-separated).
pub type Registry = BTreeMap<String, String>;

pub fn normalize_path(path: &str) -> String {
    let mut normalized = path.trim().replace('\\', "/");
    while let Some(stripped) = normalized.strip_prefix("./") {
        normalized = stripped.to_string();
    }
    normalized
}

/// Check the registry against the discovered templates.
///
/// `exists` answers whether a registry value resolves to a file on disk.
pub fn check_registry(
    registry: &Registry,
    discovered: &BTreeSet<String>,
    allowed_namespaces: &[String],
    exists: impl Fn(&str) -> bool,
) -> Vec<Verdict> {
    let mut verdicts = Vec::with_capacity(4);

    let bad_keys: Vec<String> = registry
        .keys()
        .filter_map(|key| validate_doc_type(key, allowed_namespaces).err())
        .collect();
    verdicts.push(if bad_keys.is_empty() {
        Verdict::pass(
            CHECK_NAMESPACE,
            REGISTRY_SUBJECT,
            format!("{} doc_type key(s) in allowed namespaces", registry.len()),
        )
    } else {
        Verdict::fail(
            CHECK_NAMESPACE,
            REGISTRY_SUBJECT,
            FailureClass::RegistryDrift,
            bad_keys.join("; "),
        )
    });

    let mut forward_problems = Vec::new();
    let mut owners: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for (doc_type, path) in registry {
        let path = normalize_path(path);
        if !exists(&path) {
            forward_problems.push(format!("{doc_type} -> {path}: template missing"));
        }
        owners.entry(path).or_default().push(doc_type);
    }
    for (path, doc_types) in &owners {
        if doc_types.len() > 1 {
            forward_problems.push(format!(
                "{path} registered by more than one doc_type: {}",
                doc_types.join(", ")
            ));
        }
    }
    verdicts.push(if forward_problems.is_empty() {
        Verdict::pass(
            CHECK_FORWARD,
            REGISTRY_SUBJECT,
            "every registered template exists",
        )
    } else {
        Verdict::fail(
            CHECK_FORWARD,
            REGISTRY_SUBJECT,
            FailureClass::RegistryDrift,
            forward_problems.join("; "),
        )
        .with_remedy("restore the missing template files or drop their registry entries")
    });

    let orphans: Vec<&str> = discovered
        .iter()
        .filter(|path| !owners.contains_key(path.as_str()))
        .map(String::as_str)
        .collect();
    verdicts.push(if orphans.is_empty() {
        Verdict::pass(
            CHECK_REVERSE,
            REGISTRY_SUBJECT,
            format!("all {} template file(s) registered", discovered.len()),
        )
    } else {
        Verdict::fail(
            CHECK_REVERSE,
            REGISTRY_SUBJECT,
            FailureClass::RegistryDrift,
            format!("unregistered template(s): {}", orphans.join(", ")),
        )
        .with_remedy(format!(
            "register a doc_type for {} or delete the file(s)",
            orphans.join(", ")
        ))
    });

    let combined = aggregate(&verdicts);
    let round_trip = if combined == Gate::Pass {
        Verdict::pass(
            CHECK_ROUND_TRIP,
            REGISTRY_SUBJECT,
            "registry and templates are in bijection",
        )
    } else {
        let failing: Vec<&str> = verdicts
            .iter()
            .filter(|v| v.gate == Gate::Fail)
            .map(|v| v.check.as_str())
            .collect();
        Verdict::new(
            CHECK_ROUND_TRIP,
            combined,
            REGISTRY_SUBJECT,
            format!("registry drift detected by {}", failing.join(", ")),
        )
        .with_class(FailureClass::RegistryDrift)
    };
    verdicts.push(round_trip);
    verdicts
}
