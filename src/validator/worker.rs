//! Per-candidate validation pipeline

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};
use url::Url;

use super::materializer::{ConfigMaterializer, MaterializedConfig};
use super::port::PortAllocator;
use super::probe::{ConnectivityProbe, Readiness, Warmup};
use super::process::{ProcessSupervisor, SupervisedProcess};
use crate::config::{Config, WarmupMode};
use crate::error::{CheckError, Result};
use crate::models::{Candidate, ValidationOutcome};

/// Worker settings shared by every candidate of a run
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Directory the `<port>.json` files are written to
    pub work_dir: PathBuf,
    pub probe_url: Url,
    pub probe_timeout: Duration,
    pub warmup: Warmup,
}

impl WorkerConfig {
    pub fn from_config(config: &Config) -> Self {
        let warmup = match config.warmup.mode {
            WarmupMode::Fixed => Warmup::Fixed(config.warmup.interval),
            WarmupMode::Poll => Warmup::Poll {
                limit: config.warmup.interval,
                interval: config.warmup.poll_interval,
            },
        };

        Self {
            work_dir: config.run.work_dir.clone(),
            probe_url: config.probe.url.clone(),
            probe_timeout: config.probe.timeout,
            warmup,
        }
    }
}

/// What the probe stage concluded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Reachable,
    Unreachable,
    Cancelled,
}

/// Validates one candidate at a time; shared by all in-flight tasks
pub struct ValidationWorker {
    ports: PortAllocator,
    materializer: Arc<dyn ConfigMaterializer>,
    supervisor: Arc<dyn ProcessSupervisor>,
    probe: Arc<dyn ConnectivityProbe>,
    config: WorkerConfig,
}

impl ValidationWorker {
    pub fn new(
        ports: PortAllocator,
        materializer: Arc<dyn ConfigMaterializer>,
        supervisor: Arc<dyn ProcessSupervisor>,
        probe: Arc<dyn ConnectivityProbe>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            ports,
            materializer,
            supervisor,
            probe,
            config,
        }
    }

    /// Run the full pipeline for one candidate
    ///
    /// Never fails: every error is folded into an `Errored` outcome. Whatever
    /// was acquired (port, file, process) is released before returning.
    pub async fn validate(
        &self,
        candidate: Candidate,
        cancel: &CancellationToken,
    ) -> ValidationOutcome {
        if cancel.is_cancelled() {
            debug!(candidate = candidate.index, "run terminating, skipping");
            return ValidationOutcome::skipped(candidate, "run is terminating");
        }

        let lease = match self.ports.acquire() {
            Ok(lease) => lease,
            Err(e) => {
                warn!("Candidate {}: {}", candidate, e);
                return ValidationOutcome::errored(candidate, None, e.to_string());
            }
        };
        let port = lease.port();

        let result = self.run_stages(&candidate, port, cancel).await;
        // The process is gone by now, so the port can go back to the pool.
        drop(lease);

        match result {
            Ok(Verdict::Reachable) => ValidationOutcome::valid(candidate, port),
            Ok(Verdict::Unreachable) => {
                ValidationOutcome::invalid(candidate, port, "probe failed")
            }
            Ok(Verdict::Cancelled) => {
                ValidationOutcome::skipped(candidate, "cancelled while in flight")
            }
            Err(e) => {
                if e.is_contention() {
                    warn!("Candidate {} on port {}: {}", candidate, port, e);
                } else if e.is_configuration() {
                    error!("Setup problem while checking {}: {}", candidate, e);
                } else {
                    error!("Error processing candidate {} on port {}: {}", candidate, port, e);
                }
                ValidationOutcome::errored(candidate, Some(port), e.to_string())
            }
        }
    }

    #[instrument(skip_all, fields(candidate = candidate.index, port = port))]
    async fn run_stages(
        &self,
        candidate: &Candidate,
        port: u16,
        cancel: &CancellationToken,
    ) -> Result<Verdict> {
        let content = self.materializer.generate(port, candidate.as_str()).await?;
        let config = MaterializedConfig::create(&self.config.work_dir, port, &content).await?;

        if cancel.is_cancelled() {
            config.remove().await?;
            return Ok(Verdict::Cancelled);
        }

        let mut process = match self.supervisor.start(config.path()).await {
            Ok(process) => process,
            Err(e) => {
                if let Err(remove_err) = config.remove().await {
                    warn!("Failed to remove config for port {}: {}", port, remove_err);
                }
                return Err(e);
            }
        };

        debug!(pid = ?process.id(), "proxy started");

        // A panic here must still reach the stop below.
        let verdict = AssertUnwindSafe(self.probe_through(process.as_mut(), port, cancel))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(CheckError::Panicked(panic_message(payload))));

        if let Err(e) = process.stop().await {
            warn!("Failed to stop proxy on port {}: {}", port, e);
        }
        if let Err(e) = config.remove().await {
            warn!("Failed to remove config for port {}: {}", port, e);
        }

        verdict
    }

    async fn probe_through(
        &self,
        process: &mut dyn SupervisedProcess,
        port: u16,
        cancel: &CancellationToken,
    ) -> Result<Verdict> {
        if self.config.warmup.wait(port, process, cancel).await? == Readiness::Cancelled {
            return Ok(Verdict::Cancelled);
        }

        tokio::select! {
            _ = cancel.cancelled() => Ok(Verdict::Cancelled),
            reachable = self.probe.test(&self.config.probe_url, port, self.config.probe_timeout) => {
                Ok(if reachable? { Verdict::Reachable } else { Verdict::Unreachable })
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Classification;
    use crate::validator::testing::{Harness, MockProbe};

    #[tokio::test]
    async fn test_valid_candidate_releases_everything() {
        let harness = Harness::new(MockProbe::always(true));
        let worker = harness.worker();

        let outcome = worker
            .validate(Candidate::new(0, "vmess://ok"), &CancellationToken::new())
            .await;

        assert_eq!(outcome.classification, Classification::Valid);
        assert_eq!(harness.supervisor.started(), 1);
        assert_eq!(harness.supervisor.stopped(), 1);
        assert!(harness.supervisor.all_configs_existed_at_start());
        assert_eq!(harness.leftover_configs(), 0);
        assert_eq!(harness.ports.leased_count(), 0);
    }

    #[tokio::test]
    async fn test_probe_failure_is_invalid() {
        let harness = Harness::new(MockProbe::always(false));
        let outcome = harness
            .worker()
            .validate(Candidate::new(0, "vmess://dead"), &CancellationToken::new())
            .await;

        assert_eq!(outcome.classification, Classification::Invalid);
        assert_eq!(harness.supervisor.stopped(), 1);
        assert_eq!(harness.leftover_configs(), 0);
    }

    #[tokio::test]
    async fn test_probe_error_is_errored_and_still_released() {
        let harness = Harness::new(MockProbe::failing());
        let outcome = harness
            .worker()
            .validate(Candidate::new(0, "vmess://x"), &CancellationToken::new())
            .await;

        assert_eq!(outcome.classification, Classification::Errored);
        assert_eq!(harness.supervisor.started(), 1);
        assert_eq!(harness.supervisor.stopped(), 1);
        assert_eq!(harness.leftover_configs(), 0);
    }

    #[tokio::test]
    async fn test_panic_during_probe_still_stops_and_removes() {
        let harness = Harness::new(MockProbe::panicking());
        let outcome = harness
            .worker()
            .validate(Candidate::new(0, "vmess://x"), &CancellationToken::new())
            .await;

        assert_eq!(outcome.classification, Classification::Errored);
        assert!(outcome.reason.unwrap().contains("probe blew up"));
        assert_eq!(harness.supervisor.started(), 1);
        assert_eq!(harness.supervisor.stopped(), 1);
        assert_eq!(harness.leftover_configs(), 0);
        assert_eq!(harness.ports.leased_count(), 0);
    }

    #[tokio::test]
    async fn test_materializer_error_never_starts_process() {
        let harness = Harness::new(MockProbe::always(true)).failing_on(&["broken"]);
        let outcome = harness
            .worker()
            .validate(Candidate::new(1, "broken"), &CancellationToken::new())
            .await;

        assert_eq!(outcome.classification, Classification::Errored);
        assert_eq!(harness.supervisor.started(), 0);
        assert_eq!(harness.probe.calls(), 0);
        assert_eq!(harness.leftover_configs(), 0);
    }

    #[tokio::test]
    async fn test_supervisor_error_removes_config() {
        let harness = Harness::new(MockProbe::always(true)).refusing_start();
        let outcome = harness
            .worker()
            .validate(Candidate::new(0, "vmess://x"), &CancellationToken::new())
            .await;

        assert_eq!(outcome.classification, Classification::Errored);
        assert!(outcome.reason.unwrap().contains("not found"));
        assert_eq!(harness.leftover_configs(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_does_nothing() {
        let harness = Harness::new(MockProbe::always(true));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = harness
            .worker()
            .validate(Candidate::new(0, "vmess://x"), &cancel)
            .await;

        assert_eq!(outcome.classification, Classification::Skipped);
        assert_eq!(harness.materializer.calls(), 0);
        assert_eq!(harness.supervisor.started(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_mid_probe_still_tears_down() {
        let harness = Harness::new(MockProbe::hanging());
        let worker = harness.worker();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        let supervisor = harness.supervisor.clone();
        tokio::spawn(async move {
            supervisor.wait_started(1).await;
            trigger.cancel();
        });

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            worker.validate(Candidate::new(0, "vmess://slow"), &cancel),
        )
        .await
        .expect("worker ignored cancellation");

        assert_eq!(outcome.classification, Classification::Skipped);
        assert_eq!(harness.supervisor.stopped(), 1);
        assert_eq!(harness.leftover_configs(), 0);
    }

    #[tokio::test]
    async fn test_file_collision_is_errored_and_keeps_foreign_file() {
        let harness = Harness::new(MockProbe::always(true)).with_single_port();
        let port = harness.ports_range_start();
        let foreign = MaterializedConfig::path_for(harness.work_dir(), port);
        std::fs::write(&foreign, "other run").unwrap();

        let outcome = harness
            .worker()
            .validate(Candidate::new(0, "vmess://x"), &CancellationToken::new())
            .await;

        assert_eq!(outcome.classification, Classification::Errored);
        assert_eq!(harness.supervisor.started(), 0);
        assert_eq!(std::fs::read_to_string(&foreign).unwrap(), "other run");
    }
}
