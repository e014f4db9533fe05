//! Concurrency tuple consistency across three independent sources.
//!
//! The tuple `{throughput_rps, latency_ms, error_budget_pct, window_days}`
//! must appear in the intent document, the action-budget document, and the
//! schema's `properties.concurrency_targets`, with identical values and
//! units. A value that is not yet known is written as an explicit sentinel
//! and parses to [`TupleValue::Pending`]; anything else that is not a number
//! is a parse failure, never a placeholder.

use crate::config::ConcurrencyConfig;
use crate::document::Document;
use crate::gate::{CAPSULE_SUBJECT, FailureClass, Verdict};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

pub const CHECK_CONCURRENCY: &str = "concurrency.tuple";

/// Tuple fields and their implied units.
pub const TUPLE_FIELDS: [(&str, &str); 4] = [
    ("throughput_rps", "rps"),
    ("latency_ms", "ms"),
    ("error_budget_pct", "%"),
    ("window_days", "days"),
];

#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    pub value: f64,
    /// Literal as written, for messages.
    pub literal: String,
    pub unit: String,
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.literal, self.unit)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TupleValue {
    Concrete(Quantity),
    /// Explicit "required but not yet concrete" marker.
    Pending,
    /// Present but neither a number nor the sentinel.
    Invalid(String),
}

/// The values one source declares, keyed by field name.
#[derive(Debug, Clone, PartialEq)]
pub struct TupleSource {
    pub label: String,
    /// `None` when the source itself (document, section, or object) is absent.
    pub values: Option<BTreeMap<String, TupleValue>>,
}

impl TupleSource {
    pub fn missing(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            values: None,
        }
    }
}

fn implied_unit(field: &str) -> &'static str {
    TUPLE_FIELDS
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, unit)| *unit)
        .unwrap_or("")
}

fn parse_quantity(field: &str, text: &str) -> Option<Quantity> {
    let text = text.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let value: f64 = number.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    let unit = unit.trim();
    Some(Quantity {
        value,
        literal: number.to_string(),
        unit: if unit.is_empty() {
            implied_unit(field).to_string()
        } else {
            unit.to_string()
        },
    })
}

fn parse_text_value(field: &str, text: &str, sentinel: &str) -> TupleValue {
    let text = text.trim().trim_matches('`').trim();
    if text == sentinel {
        return TupleValue::Pending;
    }
    match parse_quantity(field, text) {
        Some(quantity) => TupleValue::Concrete(quantity),
        None => TupleValue::Invalid(text.to_string()),
    }
}

fn field_line(line: &str) -> Option<(String, String)> {
    let trimmed = line.trim();
    let trimmed = trimmed
        .strip_prefix("- ")
        .or_else(|| trimmed.strip_prefix("* "))
        .unwrap_or(trimmed);
    if trimmed.starts_with('|') {
        let cells: Vec<&str> = trimmed
            .trim_matches('|')
            .split('|')
            .map(|cell| cell.trim().trim_matches('`').trim())
            .collect();
        let key = *cells.first()?;
        let value = cells.get(1)?;
        let unit = cells.get(2).copied().unwrap_or("");
        return Some((key.to_string(), format!("{value} {unit}")));
    }
    let (key, value) = trimmed.split_once(':')?;
    Some((
        key.trim().trim_matches('`').trim().to_string(),
        value.to_string(),
    ))
}

/// Extract a tuple source from a document section.
pub fn source_from_document(
    label: impl Into<String>,
    doc: Option<&Document>,
    config: &ConcurrencyConfig,
) -> TupleSource {
    let label = label.into();
    let Some(doc) = doc else {
        return TupleSource::missing(label);
    };
    let mut values = BTreeMap::new();
    let mut found_section = false;
    for section in doc.sections_matching(&config.section_heading) {
        found_section = true;
        for (_, line) in section.lines() {
            let Some((key, raw)) = field_line(line) else {
                continue;
            };
            if implied_unit(&key).is_empty() || values.contains_key(&key) {
                continue;
            }
            let value = parse_text_value(&key, &raw, &config.pending_sentinel);
            values.insert(key, value);
        }
    }
    TupleSource {
        label,
        values: found_section.then_some(values),
    }
}

fn parse_json_value(field: &str, value: &Value) -> TupleValue {
    match value {
        Value::Null => TupleValue::Pending,
        Value::Number(n) => match n.as_f64() {
            Some(v) => TupleValue::Concrete(Quantity {
                value: v,
                literal: n.to_string(),
                unit: implied_unit(field).to_string(),
            }),
            None => TupleValue::Invalid(n.to_string()),
        },
        Value::String(text) => match parse_quantity(field, text) {
            Some(quantity) => TupleValue::Concrete(quantity),
            None => TupleValue::Invalid(text.clone()),
        },
        Value::Object(map) => {
            if map.get("pending").and_then(Value::as_bool) == Some(true) {
                return TupleValue::Pending;
            }
            let unit = map.get("unit").and_then(Value::as_str);
            match (map.get("value"), unit) {
                (Some(Value::Null), _) => TupleValue::Pending,
                (Some(Value::Number(n)), unit) => match n.as_f64() {
                    Some(v) => TupleValue::Concrete(Quantity {
                        value: v,
                        literal: n.to_string(),
                        unit: unit.unwrap_or(implied_unit(field)).to_string(),
                    }),
                    None => TupleValue::Invalid(n.to_string()),
                },
                (Some(other), _) => TupleValue::Invalid(other.to_string()),
                (None, _) => TupleValue::Invalid(Value::Object(map.clone()).to_string()),
            }
        }
        other => TupleValue::Invalid(other.to_string()),
    }
}

/// Extract the tuple source from schema `properties.concurrency_targets`.
pub fn source_from_schema(label: impl Into<String>, targets: Option<&Value>) -> TupleSource {
    let label = label.into();
    let Some(Value::Object(map)) = targets else {
        return TupleSource::missing(label);
    };
    let values = map
        .iter()
        .filter(|(key, _)| !implied_unit(key).is_empty())
        .map(|(key, value)| (key.clone(), parse_json_value(key, value)))
        .collect();
    TupleSource {
        label,
        values: Some(values),
    }
}

fn same(a: &Quantity, b: &Quantity) -> bool {
    a.value == b.value && a.unit == b.unit
}

/// Check the three sources. `sources[0]` is the preferred reference.
pub fn check_concurrency(sources: &[TupleSource]) -> Verdict {
    let mut missing = Vec::new();
    let mut invalid = Vec::new();
    let mut drift = Vec::new();
    let mut pending = Vec::new();
    let mut remedies = Vec::new();

    for (field, _) in TUPLE_FIELDS {
        let mut reference: Option<(&str, &Quantity)> = None;
        let mut concrete: Vec<(&str, &Quantity)> = Vec::new();
        for source in sources {
            let value = source.values.as_ref().and_then(|values| values.get(field));
            match value {
                None => {
                    missing.push(format!("{}.{field}", source.label));
                    remedies.push(format!("declare `{field}` in {}", source.label));
                }
                Some(TupleValue::Invalid(raw)) => {
                    invalid.push(format!("{}.{field} = `{raw}`", source.label));
                    remedies.push(format!(
                        "write `{field}` in {} as a number or the pending sentinel",
                        source.label
                    ));
                }
                Some(TupleValue::Pending) => pending.push(format!("{}.{field}", source.label)),
                Some(TupleValue::Concrete(quantity)) => {
                    if reference.is_none() {
                        reference = Some((source.label.as_str(), quantity));
                    }
                    concrete.push((source.label.as_str(), quantity));
                }
            }
        }
        if let Some((ref_label, ref_value)) = reference {
            for (label, quantity) in concrete {
                if !same(ref_value, quantity) {
                    drift.push(format!(
                        "{label}.{field} = {quantity} differs from {ref_label} ({ref_value})"
                    ));
                    remedies.push(format!("set `{field}` in {label} to {ref_value}"));
                }
            }
        }
    }

    let mut problems = Vec::new();
    if !missing.is_empty() {
        problems.push(format!("missing: {}", missing.join(", ")));
    }
    if !invalid.is_empty() {
        problems.push(format!("unparseable: {}", invalid.join(", ")));
    }
    problems.extend(drift.iter().cloned());

    if !problems.is_empty() {
        let class = if missing.is_empty() && invalid.is_empty() {
            FailureClass::ConcurrencyDrift
        } else {
            FailureClass::ConcurrencyIncomplete
        };
        return Verdict::fail(CHECK_CONCURRENCY, CAPSULE_SUBJECT, class, problems.join("; "))
            .with_remedy(remedies.join("; "));
    }
    if !pending.is_empty() {
        return Verdict::warn(
            CHECK_CONCURRENCY,
            CAPSULE_SUBJECT,
            FailureClass::ConcurrencyIncomplete,
            format!("tuple not yet concrete: {}", pending.join(", ")),
        )
        .with_remedy("replace the pending sentinel with concrete values in every source");
    }
    Verdict::pass(
        CHECK_CONCURRENCY,
        CAPSULE_SUBJECT,
        "concurrency tuple identical across all sources",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::Gate;
    use serde_json::json;

    fn doc(name: &str, throughput: &str) -> Document {
        Document::parse(
            name,
            format!(
                "feature_id: demo-app\n\n## Concurrency Targets\n- throughput_rps: {throughput}\n- latency_ms: 200 ms\n- `error_budget_pct`: 0.1\n| window_days | 30 | days |\n"
            ),
        )
    }

    fn sources(intent: &str, budget: &str, schema: Value) -> Vec<TupleSource> {
        let config = ConcurrencyConfig::default();
        let intent = doc("intent_card.md", intent);
        let budget = doc("action_budget.md", budget);
        vec![
            source_from_schema("schema", Some(&schema)),
            source_from_document("intent_card", Some(&intent), &config),
            source_from_document("action_budget", Some(&budget), &config),
        ]
    }

    fn schema(throughput: Value) -> Value {
        json!({
            "throughput_rps": throughput,
            "latency_ms": {"value": 200, "unit": "ms"},
            "error_budget_pct": 0.1,
            "window_days": "30 days"
        })
    }

    #[test]
    fn identical_tuple_passes() {
        let verdict = check_concurrency(&sources("100", "100 rps", schema(json!(100))));
        assert_eq!(verdict.gate, Gate::Pass, "{verdict:?}");
    }

    #[test]
    fn changed_source_fails_naming_source_and_field() {
        let verdict = check_concurrency(&sources("100", "150", schema(json!(100))));
        assert_eq!(verdict.gate, Gate::Fail);
        assert_eq!(verdict.class, Some(FailureClass::ConcurrencyDrift));
        assert!(verdict.message.contains("action_budget.throughput_rps"));
        assert!(!verdict.message.contains("intent_card.throughput_rps"));
    }

    #[test]
    fn unit_drift_is_value_drift() {
        let verdict = check_concurrency(&sources("100", "100 req/s", schema(json!(100))));
        assert_eq!(verdict.gate, Gate::Fail);
        assert!(verdict.message.contains("req/s"));
    }

    #[test]
    fn all_sentinels_warn() {
        let verdict = check_concurrency(&sources("<TBD>", "<TBD>", schema(Value::Null)));
        assert_eq!(verdict.gate, Gate::Warn);
        assert_eq!(verdict.class, Some(FailureClass::ConcurrencyIncomplete));
    }

    #[test]
    fn non_numeric_text_is_not_a_placeholder() {
        let verdict = check_concurrency(&sources("TBD", "100", schema(json!(100))));
        assert_eq!(verdict.gate, Gate::Fail);
        assert!(verdict.message.contains("unparseable"));
    }

    #[test]
    fn absent_source_fails() {
        let config = ConcurrencyConfig::default();
        let intent = doc("intent_card.md", "100");
        let verdict = check_concurrency(&[
            source_from_schema("schema", Some(&schema(json!(100)))),
            source_from_document("intent_card", Some(&intent), &config),
            source_from_document("action_budget", None, &config),
        ]);
        assert_eq!(verdict.gate, Gate::Fail);
        assert!(verdict.message.contains("action_budget.window_days"));
    }

    #[test]
    fn pending_schema_uses_next_source_as_reference() {
        let verdict = check_concurrency(&sources("100", "150", schema(json!({"pending": true}))));
        assert_eq!(verdict.gate, Gate::Fail);
        assert!(verdict.message.contains("differs from intent_card"));
    }
}
