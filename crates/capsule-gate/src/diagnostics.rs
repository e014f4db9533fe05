//! Human-facing diagnostics: the STOP/NEED block for failing runs, the
//! one-line gate summary, and the markdown run summary.

use capsule_kernel::{Gate, GateRun, Verdict};
use serde::Serialize;
use std::fmt;
use std::fmt::Write as _;

/// Failing rules and the minimal corrective input for each.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopNeed {
    pub target: String,
    pub failing: Vec<Verdict>,
}

impl StopNeed {
    pub fn new(target: impl Into<String>, failing: Vec<Verdict>) -> Self {
        Self {
            target: target.into(),
            failing,
        }
    }

    /// `Some` when the run failed.
    pub fn from_run(run: &GateRun) -> Option<Self> {
        (run.gate == Gate::Fail)
            .then(|| Self::new(run.target.clone(), run.failures().cloned().collect()))
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "STOP {}: {} failing rule(s)",
            self.target,
            self.failing.len()
        );
        for verdict in &self.failing {
            let _ = writeln!(
                out,
                "  - {} [{}] {}",
                verdict.check, verdict.subject, verdict.message
            );
        }
        out.push_str("NEED");
        for verdict in &self.failing {
            let need = match &verdict.remedy {
                Some(remedy) => remedy.clone(),
                None => format!("make `{}` pass", verdict.check),
            };
            let _ = write!(out, "\n  - {}: {need}", verdict.subject);
        }
        out
    }
}

impl fmt::Display for StopNeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// One line: gate, target, counts, and for WARN each warned rule.
pub fn summary_line(run: &GateRun) -> String {
    let mut line = format!(
        "{} {}: {} rule(s), {} fail, {} warn, {} skip",
        run.gate,
        run.target,
        run.verdicts.len(),
        run.count(Gate::Fail),
        run.count(Gate::Warn),
        run.count(Gate::Skip),
    );
    if run.gate == Gate::Warn {
        let warned = run
            .warnings()
            .map(|v| format!("{} [{}]", v.check, v.subject))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = write!(line, "; warned: {warned}");
    }
    line
}

/// The markdown written to `reports/run_summary.md`.
pub fn render_run_summary(run: &GateRun) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Gate run: {}\n", run.target);
    let _ = writeln!(out, "- run id: `{}`", run.run_id);
    let _ = writeln!(out, "- started: {}", run.started_at.to_rfc3339());
    let _ = writeln!(out, "- gate: **{}**", run.gate);
    let _ = writeln!(out, "- implementable mode: {}", run.implementable);
    let _ = writeln!(
        out,
        "- verdicts: {} pass, {} warn, {} fail, {} skip",
        run.count(Gate::Pass),
        run.count(Gate::Warn),
        run.count(Gate::Fail),
        run.count(Gate::Skip),
    );
    if let Some(step) = run.provenance.step {
        let _ = writeln!(out, "- step: {step}");
    }
    for decision in &run.provenance.decisions {
        let _ = writeln!(out, "- decision: {decision}");
    }
    for link in &run.provenance.links {
        let _ = writeln!(out, "- link: {link}");
    }
    for note in &run.provenance.overrides {
        let _ = writeln!(out, "- override: {note}");
    }

    let notable: Vec<&Verdict> = run
        .verdicts
        .iter()
        .filter(|v| matches!(v.gate, Gate::Fail | Gate::Warn))
        .collect();
    if !notable.is_empty() {
        out.push_str("\n## Findings\n\n| gate | rule | subject | message |\n|---|---|---|---|\n");
        for verdict in notable {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} |",
                verdict.gate,
                verdict.check,
                verdict.subject,
                verdict.message.replace('|', "\\|")
            );
        }
    }

    if let Some(stop) = StopNeed::from_run(run) {
        let _ = write!(out, "\n```text\n{}\n```\n", stop.render());
    }
    out
}
