//! Run scheduling, the accepted-result cap and early termination
//!
//! The coordinator is the only owner of the run counters. Workers run as
//! spawned tasks and hand their outcomes back through the bounded stream, so
//! nothing but this loop ever mutates [`RunState`] or writes the sink.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use super::sink::ResultSink;
use super::worker::ValidationWorker;
use crate::models::{Candidate, Classification, RunSummary, ValidationOutcome};

/// What to do with an outcome after counting it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Append the candidate to the output
    Persist,
    Discard,
}

/// Counters for one run
#[derive(Debug, Clone)]
pub struct RunState {
    total: usize,
    valid: usize,
    failed: usize,
    errored: usize,
    skipped: usize,
    max_valid: usize,
}

impl RunState {
    pub fn new(total: usize, max_valid: usize) -> Self {
        Self {
            total,
            valid: 0,
            failed: 0,
            errored: 0,
            skipped: 0,
            max_valid,
        }
    }

    /// Count one outcome
    ///
    /// A valid outcome arriving after the cap is counted as skipped and
    /// never persisted.
    pub fn record(&mut self, outcome: &ValidationOutcome) -> Disposition {
        match outcome.classification {
            Classification::Valid if self.valid < self.max_valid => {
                self.valid += 1;
                Disposition::Persist
            }
            Classification::Valid | Classification::Skipped => {
                self.skipped += 1;
                Disposition::Discard
            }
            Classification::Invalid => {
                self.failed += 1;
                Disposition::Discard
            }
            Classification::Errored => {
                self.failed += 1;
                self.errored += 1;
                Disposition::Discard
            }
        }
    }

    /// Reclassify the last persisted outcome as errored (the write failed)
    pub fn revoke_valid(&mut self) {
        self.valid = self.valid.saturating_sub(1);
        self.failed += 1;
        self.errored += 1;
    }

    pub fn cap_reached(&self) -> bool {
        self.valid >= self.max_valid
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            total: self.total,
            valid: self.valid,
            failed: self.failed,
            errored: self.errored,
            skipped: self.skipped,
        }
    }
}

/// Dispatches candidates onto a bounded pool of validation tasks
pub struct ValidationCoordinator {
    worker: Arc<ValidationWorker>,
    concurrency: usize,
    max_valid: usize,
}

impl ValidationCoordinator {
    pub fn new(worker: Arc<ValidationWorker>, concurrency: usize, max_valid: usize) -> Self {
        Self {
            worker,
            concurrency: concurrency.max(1),
            max_valid,
        }
    }

    /// Validate every candidate, persisting at most `max_valid` of them
    ///
    /// Cancelling `shutdown` stops dispatch; the run then only waits for
    /// in-flight tasks to tear down their process and file.
    #[instrument(skip_all, fields(candidates = candidates.len(), max_valid = self.max_valid))]
    pub async fn run(
        &self,
        candidates: Vec<Candidate>,
        sink: &mut ResultSink,
        shutdown: &CancellationToken,
    ) -> RunSummary {
        let mut state = RunState::new(candidates.len(), self.max_valid);
        info!("Total configs: {}", candidates.len());

        // Cancelled by the cap, or transitively by `shutdown`.
        let cancel = shutdown.child_token();
        if state.cap_reached() {
            cancel.cancel();
        }

        let worker = self.worker.clone();
        let token = cancel.clone();
        let mut outcomes = stream::iter(candidates)
            .map(move |candidate| {
                let worker = worker.clone();
                let cancel = token.clone();
                async move {
                    if cancel.is_cancelled() {
                        return ValidationOutcome::skipped(candidate, "run is terminating");
                    }

                    let fallback = candidate.clone();
                    let task = tokio::spawn(async move { worker.validate(candidate, &cancel).await });
                    match task.await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            error!("Validation task for {} failed: {}", fallback, e);
                            ValidationOutcome::errored(fallback, None, format!("task failed: {}", e))
                        }
                    }
                }
            })
            .buffer_unordered(self.concurrency);

        let mut interrupted = false;
        loop {
            tokio::select! {
                _ = shutdown.cancelled(), if !interrupted => {
                    interrupted = true;
                    info!("Interrupt received. Stopping dispatch and releasing in-flight resources.");
                }
                next = outcomes.next() => {
                    let Some(outcome) = next else { break };
                    self.settle(&mut state, sink, &outcome).await;

                    if state.cap_reached() && !cancel.is_cancelled() {
                        info!(
                            "Reached the limit of {} valid configs. Stopping further processing.",
                            self.max_valid
                        );
                        cancel.cancel();
                    }
                }
            }
        }

        let summary = state.summary();
        info!("Total valid configs: {}", summary.valid);
        info!("Total failed configs: {}", summary.failed);
        info!("Wrote {} configs to {}", sink.written(), sink.path().display());
        summary
    }

    async fn settle(&self, state: &mut RunState, sink: &mut ResultSink, outcome: &ValidationOutcome) {
        let disposition = state.record(outcome);

        if disposition == Disposition::Persist {
            if let Err(e) = sink.append(outcome.candidate.as_str()).await {
                error!(
                    "Failed to write {} to {}: {}",
                    outcome.candidate,
                    sink.path().display(),
                    e
                );
                state.revoke_valid();
                return;
            }
        }

        match outcome.classification {
            Classification::Valid if disposition == Disposition::Persist => {
                info!(port = ?outcome.port, "{} OK", state.valid);
            }
            classification if classification.is_failure() => {
                warn!(
                    port = ?outcome.port,
                    reason = outcome.reason.as_deref().unwrap_or(""),
                    "{} Fail",
                    state.failed
                );
            }
            _ => {}
        }
    }
}
