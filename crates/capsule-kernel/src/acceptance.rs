//! Acceptance checklist ↔ schema `required` mapping.

use crate::document::Document;
use crate::gate::{CAPSULE_SUBJECT, FailureClass, Verdict};
use std::collections::{BTreeMap, BTreeSet};

pub const CHECK_ACCEPTANCE: &str = "acceptance.mapping";

/// One checklist row naming a schema key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecklistRow {
    pub key: String,
    pub document: String,
    pub line: usize,
}

fn first_backticked(text: &str) -> Option<&str> {
    let start = text.find('`')? + 1;
    let len = text[start..].find('`')?;
    let token = text[start..start + len].trim();
    (!token.is_empty()).then_some(token)
}

fn is_separator_row(cells: &[&str]) -> bool {
    cells
        .iter()
        .all(|cell| !cell.is_empty() && cell.chars().all(|c| matches!(c, '-' | ':' | ' ')))
}

const TABLE_HEADER_CELLS: [&str; 5] = ["key", "schema key", "field", "required key", "schema field"];

fn row_key(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if let Some(rest) = trimmed
        .strip_prefix("- ")
        .or_else(|| trimmed.strip_prefix("* "))
    {
        return first_backticked(rest).map(str::to_string);
    }
    if trimmed.starts_with('|') {
        let cells: Vec<&str> = trimmed
            .trim_matches('|')
            .split('|')
            .map(str::trim)
            .collect();
        if is_separator_row(&cells) {
            return None;
        }
        let first = cells.first()?.trim_matches('`').trim();
        if first.is_empty() || TABLE_HEADER_CELLS.contains(&first.to_ascii_lowercase().as_str()) {
            return None;
        }
        return Some(first.to_string());
    }
    None
}

/// Collect checklist rows from every section whose heading contains `heading`.
pub fn extract_checklist<'a>(
    docs: impl IntoIterator<Item = &'a Document>,
    heading: &str,
) -> Vec<ChecklistRow> {
    let mut rows = Vec::new();
    for doc in docs {
        for section in doc.sections_matching(heading) {
            for (line_no, line) in section.lines() {
                if let Some(key) = row_key(line) {
                    rows.push(ChecklistRow {
                        key,
                        document: doc.name.clone(),
                        line: line_no,
                    });
                }
            }
        }
    }
    rows
}

pub fn check_acceptance(rows: &[ChecklistRow], required: &[String]) -> Verdict {
    if required.is_empty() {
        return Verdict::warn(
            CHECK_ACCEPTANCE,
            CAPSULE_SUBJECT,
            FailureClass::MappingGap,
            format!(
                "schema `required` is empty (bootstrap stage); {} checklist row(s) not mapped",
                rows.len()
            ),
        )
        .with_remedy("list the contract's required keys in the schema `required` array");
    }

    let required_set: BTreeSet<&str> = required.iter().map(String::as_str).collect();
    let mut mapped: BTreeMap<&str, Vec<&ChecklistRow>> = BTreeMap::new();
    for row in rows {
        mapped.entry(row.key.as_str()).or_default().push(row);
    }

    let mut problems = Vec::new();
    let mut remedies = Vec::new();
    for key in required {
        if !mapped.contains_key(key.as_str()) {
            problems.push(format!("required key `{key}` has no checklist row"));
            remedies.push(format!("add a checklist row for `{key}`"));
        }
    }
    for (key, hits) in &mapped {
        let first = hits[0];
        if !required_set.contains(key) {
            problems.push(format!(
                "checklist row `{key}` ({}:{}) is not a schema required key",
                first.document, first.line
            ));
            remedies.push(format!(
                "remove the `{key}` row or add `{key}` to schema `required`"
            ));
        } else if hits.len() > 1 {
            let places = hits
                .iter()
                .map(|row| format!("{}:{}", row.document, row.line))
                .collect::<Vec<_>>()
                .join(", ");
            problems.push(format!("required key `{key}` is mapped more than once ({places})"));
            remedies.push(format!("keep a single checklist row for `{key}`"));
        }
    }

    if problems.is_empty() {
        return Verdict::pass(
            CHECK_ACCEPTANCE,
            CAPSULE_SUBJECT,
            format!("{} required key(s) mapped 1:1", required.len()),
        );
    }
    Verdict::fail(
        CHECK_ACCEPTANCE,
        CAPSULE_SUBJECT,
        FailureClass::MappingGap,
        problems.join("; "),
    )
    .with_remedy(remedies.join("; "))
}
