//! Open-question scan.
//!
//! A list item under an "open question" heading is blocking when it is
//! marked high impact and is not resolved. Validation reports blocking
//! questions as a warning; packaging refuses them.

use crate::document::Document;
use crate::gate::{CAPSULE_SUBJECT, FailureClass, Verdict};
use regex::Regex;
use std::sync::OnceLock;

pub const CHECK_OPEN_QUESTIONS: &str = "open_questions";

fn high_impact_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(\bimpact\s*[:=]\s*high\b|\[high\])").expect("impact regex must compile")
    })
}

fn resolved_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bresolved\b").expect("resolved regex must compile"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenQuestion {
    pub document: String,
    pub line: usize,
    pub text: String,
    pub high_impact: bool,
    pub resolved: bool,
}

fn list_item(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if let Some(rest) = trimmed
        .strip_prefix("- ")
        .or_else(|| trimmed.strip_prefix("* "))
    {
        return Some(rest.trim());
    }
    let digits = trimmed.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        return trimmed[digits..].strip_prefix(". ").map(str::trim);
    }
    None
}

/// Every list item under the open-question headings of `docs`.
pub fn scan_open_questions<'a>(
    docs: impl IntoIterator<Item = &'a Document>,
    heading: &str,
) -> Vec<OpenQuestion> {
    let mut questions = Vec::new();
    for doc in docs {
        for section in doc.sections_matching(heading) {
            for (line_no, line) in section.lines() {
                let Some(item) = list_item(line) else {
                    continue;
                };
                let checked = item.starts_with("[x]") || item.starts_with("[X]");
                questions.push(OpenQuestion {
                    document: doc.name.clone(),
                    line: line_no,
                    text: item.to_string(),
                    high_impact: high_impact_re().is_match(item),
                    resolved: checked || resolved_re().is_match(item),
                });
            }
        }
    }
    questions
}

pub fn check_open_questions(questions: &[OpenQuestion]) -> Verdict {
    let blocking: Vec<&OpenQuestion> = questions
        .iter()
        .filter(|q| q.high_impact && !q.resolved)
        .collect();
    if blocking.is_empty() {
        return Verdict::pass(
            CHECK_OPEN_QUESTIONS,
            CAPSULE_SUBJECT,
            format!("no unresolved high-impact questions ({} scanned)", questions.len()),
        );
    }
    let places = blocking
        .iter()
        .map(|q| format!("{}:{}", q.document, q.line))
        .collect::<Vec<_>>()
        .join(", ");
    Verdict::warn(
        CHECK_OPEN_QUESTIONS,
        CAPSULE_SUBJECT,
        FailureClass::OpenQuestion,
        format!("{} unresolved high-impact question(s) at {places}", blocking.len()),
    )
    .with_remedy(format!("resolve or downgrade the question(s) at {places}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::Gate;

    fn assumptions(items: &str) -> Document {
        Document::parse(
            "assumptions.md",
            format!("feature_id: demo-app\n\n## Open Questions\n{items}\n## Notes\n- impact: high elsewhere\n"),
        )
    }

    #[test]
    fn unresolved_high_impact_warns_with_location() {
        let doc = assumptions("- [ ] Which region? impact: high\n- [ ] Colour? impact: low\n");
        let questions = scan_open_questions([&doc], "open question");
        assert_eq!(questions.len(), 2);
        let verdict = check_open_questions(&questions);
        assert_eq!(verdict.gate, Gate::Warn);
        assert!(verdict.message.contains("assumptions.md:4"));
    }

    #[test]
    fn resolved_questions_do_not_block() {
        let doc = assumptions(
            "- [x] Which region? impact: high\n1. [high] Retention window, resolved in review\n- [high] still unresolved? no: Resolved.\n",
        );
        let questions = scan_open_questions([&doc], "open question");
        assert_eq!(questions.len(), 3);
        assert_eq!(check_open_questions(&questions).gate, Gate::Pass);
    }

    #[test]
    fn unresolved_word_does_not_count_as_resolution() {
        let doc = assumptions("- [high] unresolved vendor choice\n");
        let questions = scan_open_questions([&doc], "open question");
        assert_eq!(check_open_questions(&questions).gate, Gate::Warn);
    }
}
