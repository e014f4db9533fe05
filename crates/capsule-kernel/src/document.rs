//! Capsule documents: a header block followed by markdown sections.
//!
//! ```text
//! feature_id: checkout-flow
//! owner: payments            (optional)
//! doc_type: planning.intent_card
//! schema_ref: urn:capsule:schema:capsule:checkout-flow:planning.intent_card:v1@1.0.0
//! version: 1.0.0
//! updated: 2026-10-17
//!
//! # Heading
//! body...
//! ```
//!
//! The header block is either the leading `key: value` lines (ended by the
//! first blank line) or the body of a leading `---` fence.

use serde::Serialize;

/// Header fields in canonical order.
pub const HEADER_FIELDS: [&str; 6] = [
    "feature_id",
    "owner",
    "doc_type",
    "schema_ref",
    "version",
    "updated",
];

/// Fields that must be present in every non-placeholder document.
pub const REQUIRED_HEADER_FIELDS: [&str; 5] =
    ["feature_id", "doc_type", "schema_ref", "version", "updated"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderEntry {
    pub key: String,
    pub value: String,
    /// 1-based line number in the source text.
    pub line: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeaderBlock {
    pub entries: Vec<HeaderEntry>,
}

impl HeaderBlock {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| entry.value.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.key.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    pub heading: String,
    pub level: usize,
    /// 1-based line number of the heading.
    pub line: usize,
    pub body: String,
}

impl Section {
    /// Body lines paired with their 1-based line numbers.
    pub fn lines(&self) -> impl Iterator<Item = (usize, &str)> {
        self.body
            .lines()
            .enumerate()
            .map(move |(idx, line)| (self.line + 1 + idx, line))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Document {
    /// File name relative to the capsule directory.
    pub name: String,
    pub header: HeaderBlock,
    pub sections: Vec<Section>,
    #[serde(skip)]
    pub raw: String,
}

impl Document {
    pub fn parse(name: impl Into<String>, raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let (header, body_start) = parse_header(&raw);
        let sections = parse_sections(&raw, body_start);
        Self {
            name: name.into(),
            header,
            sections,
            raw,
        }
    }

    pub fn feature_id(&self) -> Option<&str> {
        self.header.get("feature_id")
    }

    pub fn doc_type(&self) -> Option<&str> {
        self.header.get("doc_type")
    }

    pub fn version(&self) -> Option<&str> {
        self.header.get("version")
    }

    /// Sections whose heading contains `needle`, case-insensitively.
    pub fn sections_matching<'a>(&'a self, needle: &str) -> impl Iterator<Item = &'a Section> {
        let needle = needle.to_ascii_lowercase();
        self.sections
            .iter()
            .filter(move |section| section.heading.to_ascii_lowercase().contains(&needle))
    }
}

fn split_entry(line: &str) -> Option<(String, String)> {
    let (key, value) = line.split_once(':')?;
    let key = key.trim();
    if key.is_empty()
        || !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return None;
    }
    Some((key.to_string(), value.trim().to_string()))
}

/// Returns the parsed header and the 0-based index of the first body line.
fn parse_header(raw: &str) -> (HeaderBlock, usize) {
    let lines: Vec<&str> = raw.lines().collect();
    let mut entries = Vec::new();

    if lines.first().map(|line| line.trim()) == Some("---") {
        for (idx, line) in lines.iter().enumerate().skip(1) {
            if line.trim() == "---" {
                return (HeaderBlock { entries }, idx + 1);
            }
            if let Some((key, value)) = split_entry(line) {
                entries.push(HeaderEntry {
                    key,
                    value,
                    line: idx + 1,
                });
            }
        }
        // Unterminated fence: treat the whole file as header.
        return (HeaderBlock { entries }, lines.len());
    }

    for (idx, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            return (HeaderBlock { entries }, idx + 1);
        }
        if line.trim_start().starts_with('#') {
            return (HeaderBlock { entries }, idx);
        }
        match split_entry(line) {
            Some((key, value)) => entries.push(HeaderEntry {
                key,
                value,
                line: idx + 1,
            }),
            None => return (HeaderBlock { entries }, idx),
        }
    }
    (HeaderBlock { entries }, lines.len())
}

fn heading_of(line: &str) -> Option<(usize, &str)> {
    let trimmed = line.trim_start();
    let level = trimmed.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &trimmed[level..];
    if !rest.is_empty() && !rest.starts_with(' ') {
        return None;
    }
    Some((level, rest.trim().trim_end_matches('#').trim()))
}

fn parse_sections(raw: &str, body_start: usize) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut in_fence = false;
    for (idx, line) in raw.lines().enumerate().skip(body_start) {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        }
        if !in_fence && let Some((level, heading)) = heading_of(line) {
            sections.push(Section {
                heading: heading.to_string(),
                level,
                line: idx + 1,
                body: String::new(),
            });
            continue;
        }
        if let Some(current) = sections.last_mut() {
            current.body.push_str(line);
            current.body.push('\n');
        }
    }
    sections
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "feature_id: checkout-flow\n\
doc_type: planning.vision\n\
schema_ref: urn:capsule:schema:capsule:checkout-flow:planning.vision:v1@1.0.0\n\
version: 1.0.0\n\
updated: 2026-10-17\n\
\n\
# Vision\n\
Ship it.\n\
\n\
## Concurrency Targets\n\
- throughput_rps: 100\n";

    #[test]
    fn parses_header_entries_in_order() {
        let doc = Document::parse("vision.md", SAMPLE);
        let keys: Vec<&str> = doc.header.keys().collect();
        assert_eq!(
            keys,
            vec!["feature_id", "doc_type", "schema_ref", "version", "updated"]
        );
        assert_eq!(doc.feature_id(), Some("checkout-flow"));
        assert_eq!(doc.header.entries[4].line, 5);
    }

    #[test]
    fn parses_sections_with_line_numbers() {
        let doc = Document::parse("vision.md", SAMPLE);
        assert_eq!(doc.sections.len(), 2);
        assert_eq!(doc.sections[0].heading, "Vision");
        assert_eq!(doc.sections[1].level, 2);
        let lines: Vec<(usize, &str)> = doc.sections[1].lines().collect();
        assert_eq!(lines, vec![(11, "- throughput_rps: 100")]);
        assert_eq!(doc.sections_matching("concurrency").count(), 1);
    }

    #[test]
    fn accepts_fenced_front_matter() {
        let text = "---\nfeature_id: abc\nversion: 1.0.0\n---\n# Body\ntext\n";
        let doc = Document::parse("a.md", text);
        assert_eq!(doc.header.get("version"), Some("1.0.0"));
        assert_eq!(doc.sections[0].heading, "Body");
    }

    #[test]
    fn headings_inside_code_fences_are_body_text() {
        let text = "feature_id: abc\n\n# One\n```\n# not a heading\n```\n";
        let doc = Document::parse("a.md", text);
        assert_eq!(doc.sections.len(), 1);
        assert!(doc.sections[0].body.contains("# not a heading"));
    }
}
