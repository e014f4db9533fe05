//! Watch mode: poll a capsule directory and re-run the gate when its
//! contents settle on a new fingerprint.
//!
//! The loop never runs validation concurrently with itself. Ticks that land
//! while a run is in flight are counted and dropped.

use crate::error::GateError;
use capsule_kernel::GateRun;
use capsule_store::capsule_fingerprint;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchStats {
    pub runs: u64,
    pub skipped_ticks: u64,
}

/// Fingerprint bookkeeping. A change must be observed on two consecutive
/// ticks before it triggers a run.
#[derive(Debug, Default)]
struct Debounce {
    validated: Option<String>,
    candidate: Option<String>,
}

impl Debounce {
    /// Returns true when `fingerprint` should be validated now.
    fn observe(&mut self, fingerprint: String) -> bool {
        if self.validated.as_deref() == Some(fingerprint.as_str()) {
            self.candidate = None;
            return false;
        }
        let settled = self.validated.is_none()
            || self.candidate.as_deref() == Some(fingerprint.as_str());
        if settled {
            self.validated = Some(fingerprint);
            self.candidate = None;
        } else {
            self.candidate = Some(fingerprint);
        }
        settled
    }
}

/// Run until `shutdown` flips to true (or its sender is dropped).
///
/// `validate` runs on the blocking pool; `report` sees every outcome,
/// including fingerprint errors, on the watcher task.
pub async fn run_watch<V, R>(
    dir: PathBuf,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    validate: V,
    mut report: R,
) -> WatchStats
where
    V: Fn() -> Result<GateRun, GateError> + Send + Sync + 'static,
    R: FnMut(Result<GateRun, GateError>) + Send,
{
    let validate = Arc::new(validate);
    let mut ticker = tokio::time::interval(interval.max(MIN_INTERVAL));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut debounce = Debounce::default();
    let mut in_flight: Option<JoinHandle<Result<GateRun, GateError>>> = None;
    let mut stats = WatchStats::default();
    let subject = dir.display().to_string();

    tracing::info!(dir = %subject, interval_ms = interval.as_millis() as u64, "watch started");

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            joined = async {
                match in_flight.as_mut() {
                    Some(handle) => handle.await,
                    None => std::future::pending().await,
                }
            } => {
                in_flight = None;
                stats.runs += 1;
                let outcome = joined.unwrap_or_else(|_| {
                    Err(GateError::WorkerPanicked { subject: subject.clone() })
                });
                report(outcome);
            }
            _ = ticker.tick() => {
                if in_flight.is_some() {
                    stats.skipped_ticks += 1;
                    tracing::warn!(dir = %subject, "validation still running, tick skipped");
                    continue;
                }
                let fingerprint = match capsule_fingerprint(&dir) {
                    Ok(fingerprint) => fingerprint,
                    Err(err) => {
                        report(Err(err.into()));
                        continue;
                    }
                };
                if debounce.observe(fingerprint) {
                    tracing::debug!(dir = %subject, "capsule changed, validating");
                    let validate = Arc::clone(&validate);
                    in_flight = Some(tokio::task::spawn_blocking(move || validate()));
                }
            }
        }
    }

    if let Some(handle) = in_flight.take() {
        // Let the last run finish so its reports are not torn.
        if let Ok(outcome) = handle.await {
            stats.runs += 1;
            report(outcome);
        }
    }
    tracing::info!(
        dir = %subject,
        runs = stats.runs,
        skipped_ticks = stats.skipped_ticks,
        "watch stopped"
    );
    stats
}
