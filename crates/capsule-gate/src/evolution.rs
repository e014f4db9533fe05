//! Schema evolution: bump the output contract version and carry every
//! dependent reference along with it.

use crate::error::EvolutionError;
use crate::orchestrator::{Orchestrator, RunOptions};
use capsule_kernel::header::SchemaRef;
use capsule_kernel::{BumpKind, Document, GateRun, OutputContractSchema, SemVer, is_placeholder};
use capsule_store::{ProvenanceEvent, ProvenanceRecord, read_text, write_atomic};
use regex::Regex;
use std::path::PathBuf;
use std::sync::OnceLock;

fn urn_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"urn:[A-Za-z0-9._-]+:schema:capsule:[^\s`'"<>()\[\]]+"#)
            .expect("urn regex must compile")
    })
}

#[derive(Debug, Clone)]
pub struct BumpRequest {
    pub feature_id: String,
    pub kind: BumpKind,
    pub note: String,
    /// Re-run the gate after rewriting.
    pub validate: bool,
}

#[derive(Debug, Clone)]
pub struct BumpOutcome {
    pub from: SemVer,
    pub to: SemVer,
    pub schema_path: PathBuf,
    /// Documents whose references were rewritten, by file name.
    pub rewritten: Vec<String>,
    pub run: Option<GateRun>,
}

pub fn bump_schema(
    orchestrator: &Orchestrator,
    request: &BumpRequest,
) -> Result<BumpOutcome, EvolutionError> {
    let note = request.note.trim();
    if note.is_empty() {
        return Err(EvolutionError::NoteRequired);
    }
    let feature_id = request.feature_id.as_str();
    let capsule = orchestrator.load(feature_id)?;
    let schema_text = read_text(&capsule.schema_path)?;
    let schema =
        OutputContractSchema::parse(&schema_text).map_err(|source| EvolutionError::Schema {
            path: capsule.schema_path.clone(),
            source,
        })?;

    let from = schema.version.clone();
    let to = from.bump(request.kind);
    let from_text = from.to_string();

    // Documents at other versions may still cite the prior schema; each URN
    // and the `version:` line are matched individually.
    let identity = &orchestrator.config().identity;
    let mut writes = Vec::new();
    for slot in &capsule.documents {
        let Ok(doc) = &slot.content else {
            continue;
        };
        if is_placeholder(doc, identity) {
            continue;
        }
        if let Some(text) = rewrite_document(doc, feature_id, &from, &to) {
            writes.push((slot.name.clone(), slot.path.clone(), text));
        }
    }

    let bumped = schema
        .with_version(to.clone())
        .to_pretty_string()
        .map_err(|source| EvolutionError::Schema {
            path: capsule.schema_path.clone(),
            source,
        })?;

    let mut rewritten = Vec::with_capacity(writes.len());
    for (name, path, text) in writes {
        write_atomic(&path, text)?;
        rewritten.push(name);
    }
    write_atomic(&capsule.schema_path, bumped)?;

    orchestrator
        .reports(feature_id)
        .append_provenance(&ProvenanceRecord {
            note: Some(note.to_string()),
            from_version: Some(from_text.clone()),
            to_version: Some(to.to_string()),
            ..ProvenanceRecord::new(ProvenanceEvent::BumpSchema, feature_id)
        })?;
    tracing::info!(
        feature_id,
        from = %from,
        to = %to,
        kind = request.kind.as_str(),
        documents = rewritten.len(),
        "schema bumped"
    );

    let run = if request.validate {
        Some(orchestrator.run_capsule(feature_id, &RunOptions::default())?)
    } else {
        None
    };

    Ok(BumpOutcome {
        from,
        to,
        schema_path: capsule.schema_path,
        rewritten,
        run,
    })
}

fn split_ending(line: &str) -> (&str, &str) {
    let body = line.strip_suffix('\n').unwrap_or(line);
    let body = body.strip_suffix('\r').unwrap_or(body);
    (body, &line[body.len()..])
}

fn rewrite_version_line(line: &str, from: &SemVer, to: &SemVer) -> Option<String> {
    let (key, value) = line.split_once(':')?;
    let leading = value.len() - value.trim_start().len();
    (value.trim() == from.to_string()).then(|| format!("{key}:{}{to}", &value[..leading]))
}

fn rewrite_urn(urn: &str, feature_id: &str, from: &SemVer, to: &SemVer) -> Option<String> {
    let core = urn.trim_end_matches(['.', ',', ';', ':']);
    let tail = &urn[core.len()..];
    let mut parsed = SchemaRef::parse(core)?;
    if parsed.feature_id != feature_id || parsed.version != *from {
        return None;
    }
    parsed.major = to.major;
    parsed.version = to.clone();
    Some(format!("{}{tail}", parsed.render()))
}

/// Rewrite matching URNs and the `version:` header line. `None` when nothing
/// changed.
pub fn rewrite_document(
    doc: &Document,
    feature_id: &str,
    from: &SemVer,
    to: &SemVer,
) -> Option<String> {
    let version_line = doc
        .header
        .entries
        .iter()
        .find(|entry| entry.key == "version")
        .map(|entry| entry.line);

    let mut changed = false;
    let mut out = String::with_capacity(doc.raw.len());
    for (idx, line) in doc.raw.split_inclusive('\n').enumerate() {
        let (body, ending) = split_ending(line);
        if Some(idx + 1) == version_line
            && let Some(rewritten) = rewrite_version_line(body, from, to)
        {
            out.push_str(&rewritten);
            out.push_str(ending);
            changed = true;
            continue;
        }
        let replaced = urn_re().replace_all(body, |caps: &regex::Captures<'_>| {
            let urn = &caps[0];
            match rewrite_urn(urn, feature_id, from, to) {
                Some(new_urn) => {
                    changed = true;
                    new_urn
                }
                None => urn.to_string(),
            }
        });
        out.push_str(&replaced);
        out.push_str(ending);
    }
    changed.then_some(out)
}
