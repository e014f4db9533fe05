//! Identity and header validation.
//!
//! All header rules are hard: they PASS or FAIL. A field check is emitted
//! only when the field is present, so a missing field is reported exactly
//! once, by `header.presence`.

use crate::config::IdentityConfig;
use crate::document::{Document, HEADER_FIELDS, REQUIRED_HEADER_FIELDS};
use crate::gate::{FailureClass, Verdict};
use crate::semver::SemVer;
use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;

pub const CHECK_PLACEHOLDER: &str = "header.placeholder";
pub const CHECK_PRESENCE: &str = "header.presence";
pub const CHECK_ORDER: &str = "header.order";
pub const CHECK_FEATURE_ID: &str = "header.feature_id";
pub const CHECK_DOC_TYPE: &str = "header.doc_type";
pub const CHECK_VERSION: &str = "header.version";
pub const CHECK_UPDATED: &str = "header.updated";
pub const CHECK_SCHEMA_REF: &str = "header.schema_ref";

const FEATURE_ID_MIN: usize = 3;
const FEATURE_ID_MAX: usize = 50;

fn feature_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z][a-z0-9]*(-[a-z0-9]+)*(-v[0-9]+)?$")
            .expect("feature id regex must compile")
    })
}

fn doc_label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z][a-z0-9_]*(\.[a-z][a-z0-9_]*)*$").expect("doc label regex must compile")
    })
}

/// Validate a feature identifier: pattern plus 3–50 characters.
pub fn validate_feature_id(feature_id: &str) -> Result<(), String> {
    let len = feature_id.chars().count();
    if !(FEATURE_ID_MIN..=FEATURE_ID_MAX).contains(&len) {
        return Err(format!(
            "feature_id `{feature_id}` must be {FEATURE_ID_MIN}-{FEATURE_ID_MAX} characters (got {len})"
        ));
    }
    if !feature_id_re().is_match(feature_id) {
        return Err(format!(
            "feature_id `{feature_id}` must be a lowercase slug with an optional -vN suffix"
        ));
    }
    Ok(())
}

/// Validate a doc_type against the allowed namespace set.
pub fn validate_doc_type(doc_type: &str, allowed: &[String]) -> Result<(), String> {
    let Some(namespace) = allowed.iter().find(|ns| doc_type.starts_with(ns.as_str())) else {
        return Err(format!(
            "doc_type `{doc_type}` is outside the allowed namespaces ({})",
            allowed.join(", ")
        ));
    };
    let label = &doc_type[namespace.len()..];
    if label.is_empty() || !doc_label_re().is_match(label) {
        return Err(format!(
            "doc_type `{doc_type}` needs a lowercase label after `{namespace}`"
        ));
    }
    Ok(())
}

/// `urn:<ns>:schema:capsule:<feature_id>:<doc_type>:v<major>@<version>`
pub fn schema_ref(namespace: &str, feature_id: &str, doc_type: &str, version: &SemVer) -> String {
    format!(
        "urn:{namespace}:schema:capsule:{feature_id}:{doc_type}:v{}@{version}",
        version.major
    )
}

/// Components of a schema_ref URN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaRef {
    pub namespace: String,
    pub feature_id: String,
    pub doc_type: String,
    pub major: u64,
    pub version: SemVer,
}

impl SchemaRef {
    pub fn parse(urn: &str) -> Option<Self> {
        let rest = urn.strip_prefix("urn:")?;
        let (namespace, rest) = rest.split_once(":schema:capsule:")?;
        let (feature_id, rest) = rest.split_once(':')?;
        let (doc_type, rest) = rest.split_once(":v")?;
        let (major, version) = rest.split_once('@')?;
        Some(Self {
            namespace: namespace.to_string(),
            feature_id: feature_id.to_string(),
            doc_type: doc_type.to_string(),
            major: major.parse().ok()?,
            version: version.parse().ok()?,
        })
    }

    pub fn render(&self) -> String {
        format!(
            "urn:{}:schema:capsule:{}:{}:v{}@{}",
            self.namespace, self.feature_id, self.doc_type, self.major, self.version
        )
    }
}

/// Whether this document is an unfilled template skeleton.
pub fn is_placeholder(doc: &Document, identity: &IdentityConfig) -> bool {
    doc.feature_id() == Some(identity.placeholder_feature_id.as_str())
}

pub fn check_header(doc: &Document, identity: &IdentityConfig) -> Vec<Verdict> {
    let subject = doc.name.as_str();
    if is_placeholder(doc, identity) {
        return vec![Verdict::skip(
            CHECK_PLACEHOLDER,
            subject,
            "placeholder feature_id; template skeleton not validated",
        )];
    }

    let header = &doc.header;
    let mut verdicts = Vec::new();

    let missing: Vec<&str> = REQUIRED_HEADER_FIELDS
        .iter()
        .copied()
        .filter(|field| header.get(field).is_none())
        .collect();
    if missing.is_empty() {
        verdicts.push(Verdict::pass(
            CHECK_PRESENCE,
            subject,
            "all header fields present",
        ));
    } else {
        verdicts.push(
            Verdict::fail(
                CHECK_PRESENCE,
                subject,
                FailureClass::MalformedHeader,
                format!("missing header field(s): {}", missing.join(", ")),
            )
            .with_remedy(format!(
                "add `{}` to the header block of {subject}",
                missing
                    .iter()
                    .map(|field| format!("{field}: ..."))
                    .collect::<Vec<_>>()
                    .join("`, `")
            )),
        );
    }

    verdicts.push(check_order(doc));

    if let Some(feature_id) = header.get("feature_id") {
        verdicts.push(match validate_feature_id(feature_id) {
            Ok(()) => Verdict::pass(CHECK_FEATURE_ID, subject, "feature_id is a valid slug"),
            Err(message) => Verdict::fail(
                CHECK_FEATURE_ID,
                subject,
                FailureClass::MalformedHeader,
                message,
            ),
        });
    }

    if let Some(doc_type) = header.get("doc_type") {
        verdicts.push(
            match validate_doc_type(doc_type, &identity.allowed_namespaces) {
                Ok(()) => Verdict::pass(CHECK_DOC_TYPE, subject, "doc_type namespace allowed"),
                Err(message) => Verdict::fail(
                    CHECK_DOC_TYPE,
                    subject,
                    FailureClass::MalformedHeader,
                    message,
                ),
            },
        );
    }

    let version = header.get("version").map(|raw| (raw, raw.parse::<SemVer>()));
    if let Some((raw, parsed)) = &version {
        verdicts.push(match parsed {
            Ok(_) => Verdict::pass(CHECK_VERSION, subject, "version is semantic"),
            Err(_) => Verdict::fail(
                CHECK_VERSION,
                subject,
                FailureClass::MalformedHeader,
                format!("version `{raw}` is not a semantic version"),
            )
            .with_remedy("use MAJOR.MINOR.PATCH, e.g. `version: 1.0.0`"),
        });
    }

    if let Some(updated) = header.get("updated") {
        verdicts.push(match NaiveDate::parse_from_str(updated, "%Y-%m-%d") {
            Ok(_) => Verdict::pass(CHECK_UPDATED, subject, "updated is a calendar date"),
            Err(_) => Verdict::fail(
                CHECK_UPDATED,
                subject,
                FailureClass::MalformedHeader,
                format!("updated `{updated}` is not a valid YYYY-MM-DD date"),
            ),
        });
    }

    if let (Some(actual), Some(feature_id), Some(doc_type), Some((_, Ok(version)))) = (
        header.get("schema_ref"),
        header.get("feature_id"),
        header.get("doc_type"),
        &version,
    ) {
        let expected = schema_ref(&identity.urn_namespace, feature_id, doc_type, version);
        verdicts.push(if actual == expected {
            Verdict::pass(
                CHECK_SCHEMA_REF,
                subject,
                "schema_ref matches header fields",
            )
        } else {
            Verdict::fail(
                CHECK_SCHEMA_REF,
                subject,
                FailureClass::IdentityMismatch,
                format!("schema_ref `{actual}` does not match header fields"),
            )
            .with_remedy(format!("set `schema_ref: {expected}`"))
        });
    }

    verdicts
}

fn check_order(doc: &Document) -> Verdict {
    let subject = doc.name.as_str();
    let mut unknown = Vec::new();
    let mut positions = Vec::new();
    for key in doc.header.keys() {
        match HEADER_FIELDS.iter().position(|field| *field == key) {
            Some(pos) => positions.push((pos, key)),
            None => unknown.push(key),
        }
    }

    if !unknown.is_empty() {
        return Verdict::fail(
            CHECK_ORDER,
            subject,
            FailureClass::MalformedHeader,
            format!("unexpected header field(s): {}", unknown.join(", ")),
        )
        .with_remedy(format!(
            "header fields are limited to {}",
            HEADER_FIELDS.join(", ")
        ));
    }

    for pair in positions.windows(2) {
        if pair[0].0 >= pair[1].0 {
            return Verdict::fail(
                CHECK_ORDER,
                subject,
                FailureClass::MalformedHeader,
                format!(
                    "header field `{}` must come before `{}`",
                    pair[1].1, pair[0].1
                ),
            )
            .with_remedy(format!("order header fields as {}", HEADER_FIELDS.join(", ")));
        }
    }

    Verdict::pass(CHECK_ORDER, subject, "header fields in canonical order")
}
