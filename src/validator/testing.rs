//! Deterministic collaborators for pipeline tests

use std::collections::HashSet;
use std::net::{Ipv4Addr, TcpListener};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::Notify;
use url::Url;

use super::materializer::ConfigMaterializer;
use super::port::PortAllocator;
use super::probe::{ConnectivityProbe, Warmup};
use super::process::{ProcessSupervisor, SupervisedProcess};
use super::worker::{ValidationWorker, WorkerConfig};
use crate::error::{CheckError, Result};
use crate::models::Candidate;

pub fn candidates(n: usize) -> Vec<Candidate> {
    (0..n)
        .map(|i| Candidate::new(i, format!("vmess://candidate-{}", i)))
        .collect()
}

#[derive(Default)]
pub struct MockMaterializer {
    fail_on: HashSet<String>,
    calls: AtomicUsize,
}

impl MockMaterializer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigMaterializer for MockMaterializer {
    async fn generate(&self, port: u16, candidate: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on.contains(candidate) {
            return Err(CheckError::Materialize(format!(
                "unparseable candidate: {}",
                candidate
            )));
        }
        Ok(format!("{{\"inbounds\":[{{\"port\":{}}}]}}", port))
    }
}

#[derive(Default)]
pub struct MockSupervisor {
    refuse: bool,
    started: AtomicUsize,
    stopped: Arc<AtomicUsize>,
    config_existed: Mutex<Vec<bool>>,
    started_signal: Notify,
}

impl MockSupervisor {
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn all_configs_existed_at_start(&self) -> bool {
        self.config_existed.lock().iter().all(|&existed| existed)
    }

    /// Resolve once at least `n` processes have been started
    pub async fn wait_started(&self, n: usize) {
        loop {
            let notified = self.started_signal.notified();
            if self.started() >= n {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl ProcessSupervisor for MockSupervisor {
    async fn start(&self, config_path: &Path) -> Result<Box<dyn SupervisedProcess>> {
        if self.refuse {
            return Err(CheckError::BinaryNotFound {
                path: PathBuf::from("/usr/bin/v2ray"),
            });
        }

        self.config_existed.lock().push(config_path.exists());
        self.started.fetch_add(1, Ordering::SeqCst);
        self.started_signal.notify_waiters();

        Ok(Box::new(FakeProcess {
            exit: None,
            stopped: false,
            stop_counter: Some(self.stopped.clone()),
        }))
    }
}

pub struct FakeProcess {
    exit: Option<String>,
    stopped: bool,
    stop_counter: Option<Arc<AtomicUsize>>,
}

impl FakeProcess {
    pub fn running() -> Self {
        Self {
            exit: None,
            stopped: false,
            stop_counter: None,
        }
    }

    pub fn exited_with(status: &str) -> Self {
        Self {
            exit: Some(status.to_string()),
            stopped: false,
            stop_counter: None,
        }
    }
}

#[async_trait]
impl SupervisedProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        if self.stopped {
            None
        } else {
            Some(4242)
        }
    }

    fn exited(&mut self) -> Option<String> {
        if self.stopped {
            return Some("signal: 15 (SIGTERM)".to_string());
        }
        self.exit.clone()
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.stopped {
            self.stopped = true;
            if let Some(counter) = &self.stop_counter {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum ProbeMode {
    Always(bool),
    Failing,
    Hanging,
    Panicking,
}

pub struct MockProbe {
    mode: ProbeMode,
    calls: AtomicUsize,
}

impl MockProbe {
    pub fn always(reachable: bool) -> Self {
        Self::with_mode(ProbeMode::Always(reachable))
    }

    /// Returns an error instead of a verdict
    pub fn failing() -> Self {
        Self::with_mode(ProbeMode::Failing)
    }

    /// Never finishes on its own
    pub fn hanging() -> Self {
        Self::with_mode(ProbeMode::Hanging)
    }

    pub fn panicking() -> Self {
        Self::with_mode(ProbeMode::Panicking)
    }

    fn with_mode(mode: ProbeMode) -> Self {
        Self {
            mode,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectivityProbe for MockProbe {
    async fn test(&self, _url: &Url, _port: u16, _timeout: Duration) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            ProbeMode::Always(reachable) => Ok(reachable),
            ProbeMode::Failing => Err(CheckError::Probe("invalid proxy url".into())),
            ProbeMode::Hanging => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(false)
            }
            ProbeMode::Panicking => panic!("probe blew up"),
        }
    }
}

/// Wires mocks to a real port allocator and a scratch work directory
pub struct Harness {
    dir: TempDir,
    single_port: Option<u16>,
    pub ports: PortAllocator,
    pub materializer: Arc<MockMaterializer>,
    pub supervisor: Arc<MockSupervisor>,
    pub probe: Arc<MockProbe>,
}

impl Harness {
    pub fn new(probe: MockProbe) -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
            single_port: None,
            ports: PortAllocator::with_range(42000, 48999, 512),
            materializer: Arc::new(MockMaterializer::default()),
            supervisor: Arc::new(MockSupervisor::default()),
            probe: Arc::new(probe),
        }
    }

    pub fn failing_on(mut self, lines: &[&str]) -> Self {
        self.materializer = Arc::new(MockMaterializer {
            fail_on: lines.iter().map(|s| s.to_string()).collect(),
            calls: AtomicUsize::new(0),
        });
        self
    }

    pub fn refusing_start(mut self) -> Self {
        self.supervisor = Arc::new(MockSupervisor {
            refuse: true,
            ..MockSupervisor::default()
        });
        self
    }

    /// Restrict allocation to one port that is free right now
    pub fn with_single_port(mut self) -> Self {
        let port = {
            let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).expect("bind");
            listener.local_addr().expect("local addr").port()
        };
        self.ports = PortAllocator::with_range(port, port, 4);
        self.single_port = Some(port);
        self
    }

    pub fn ports_range_start(&self) -> u16 {
        self.single_port.expect("with_single_port not used")
    }

    pub fn work_dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn worker(&self) -> ValidationWorker {
        ValidationWorker::new(
            self.ports.clone(),
            self.materializer.clone(),
            self.supervisor.clone(),
            self.probe.clone(),
            WorkerConfig {
                work_dir: self.dir.path().to_path_buf(),
                probe_url: Url::parse("https://example.com/generate_204").expect("url"),
                probe_timeout: Duration::from_secs(1),
                warmup: Warmup::Fixed(Duration::ZERO),
            },
        )
    }

    /// Materialized configs still on disk
    pub fn leftover_configs(&self) -> usize {
        std::fs::read_dir(self.dir.path())
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Output file inside the scratch directory
    pub fn output_path(&self) -> PathBuf {
        self.dir.path().join("valid.sub")
    }
}
