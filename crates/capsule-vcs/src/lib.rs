//! Revision probe for bundle naming.
//!
//! This crate is intentionally thin: it shells out to `git`, then `jj`, for
//! the short id of the working revision and keeps no other repository state.
//! A repository with neither yields [`NO_REVISION`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Revision label used when no backend can answer.
pub const NO_REVISION: &str = "norev";

/// Hex digits kept from a revision id.
pub const SHORT_LEN: usize = 12;

/// Errors from interacting with a version-control backend.
#[derive(Debug, thiserror::Error)]
pub enum RevisionError {
    #[error("{program} executable is not available in PATH")]
    NotInstalled { program: &'static str },

    #[error("{program} command failed: {program} {args} ({message})")]
    CommandFailed {
        program: &'static str,
        args: String,
        message: String,
    },

    #[error("unable to parse {program} output: {message}")]
    Parse {
        program: &'static str,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Git,
    Jj,
    None,
}

impl Backend {
    fn program(self) -> Option<&'static str> {
        match self {
            Backend::Git => Some("git"),
            Backend::Jj => Some("jj"),
            Backend::None => None,
        }
    }

    fn args(self) -> &'static [&'static str] {
        match self {
            Backend::Git => &["rev-parse", "--short=12", "HEAD"],
            Backend::Jj => &[
                "log",
                "-r",
                "@",
                "--no-graph",
                "-T",
                "commit_id.short(12) ++ \"\\n\"",
            ],
            Backend::None => &[],
        }
    }
}

/// A resolved revision and the backend that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub id: String,
    pub backend: Backend,
}

impl Revision {
    pub fn none() -> Self {
        Self {
            id: NO_REVISION.to_string(),
            backend: Backend::None,
        }
    }
}

/// Thin client asking `git` and then `jj` for the current revision.
#[derive(Debug, Clone)]
pub struct RevisionProbe {
    repo_root: PathBuf,
    backends: Vec<Backend>,
}

impl RevisionProbe {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            backends: vec![Backend::Git, Backend::Jj],
        }
    }

    /// Restrict or reorder the backends tried.
    pub fn with_backends(mut self, backends: Vec<Backend>) -> Self {
        self.backends = backends;
        self
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Ask one backend for the current revision.
    pub fn query(&self, backend: Backend) -> Result<Revision, RevisionError> {
        let Some(program) = backend.program() else {
            return Ok(Revision::none());
        };
        let stdout = run(program, &self.repo_root, backend.args())?;
        let id = first_nonempty_line(&stdout)
            .map(sanitize_revision)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| RevisionError::Parse {
                program,
                message: "empty revision output".to_string(),
            })?;
        Ok(Revision { id, backend })
    }

    /// First backend that answers, else [`NO_REVISION`]. Never fails.
    pub fn current(&self) -> Revision {
        for backend in &self.backends {
            match self.query(*backend) {
                Ok(revision) => {
                    tracing::debug!(backend = ?revision.backend, id = %revision.id, "revision resolved");
                    return revision;
                }
                Err(err) => tracing::debug!(error = %err, "revision backend unavailable"),
            }
        }
        Revision::none()
    }
}

/// Keep only characters safe in a directory name, truncated to [`SHORT_LEN`].
pub fn sanitize_revision(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(SHORT_LEN)
        .collect::<String>()
        .to_ascii_lowercase()
}

fn run(program: &'static str, cwd: &Path, args: &[&str]) -> Result<String, RevisionError> {
    let output = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .output()
        .map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                RevisionError::NotInstalled { program }
            } else {
                RevisionError::CommandFailed {
                    program,
                    args: args.join(" "),
                    message: err.to_string(),
                }
            }
        })?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            "unknown error".to_string()
        } else {
            stderr
        };
        Err(RevisionError::CommandFailed {
            program,
            args: args.join(" "),
            message,
        })
    }
}

fn first_nonempty_line(input: &str) -> Option<&str> {
    input.lines().map(str::trim).find(|line| !line.is_empty())
}
