//! External proxy process lifecycle
//!
//! The supervisor only starts and stops the engine; what the engine does with
//! its configuration is its own business.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::config::ProcessConfig;
use crate::error::{CheckError, Result};

/// Starts proxy processes bound to a configuration file
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Launch the proxy against `config_path`
    async fn start(&self, config_path: &Path) -> Result<Box<dyn SupervisedProcess>>;
}

/// A running proxy process owned by one worker
#[async_trait]
pub trait SupervisedProcess: Send {
    /// OS process id, if still known
    fn id(&self) -> Option<u32>;

    /// Returns a description of the exit if the process has already stopped
    fn exited(&mut self) -> Option<String>;

    /// Terminate the process and wait until it has fully exited
    async fn stop(&mut self) -> Result<()>;
}

/// Default engine location for an operating system
pub fn default_binary_for(os: &str) -> Result<PathBuf> {
    match os {
        "macos" => Ok(PathBuf::from("/opt/homebrew/bin/v2ray")),
        "linux" => Ok(PathBuf::from("/usr/bin/v2ray")),
        other => Err(CheckError::UnsupportedPlatform(other.to_string())),
    }
}

/// Supervisor for the v2ray engine
pub struct V2raySupervisor {
    binary: Option<PathBuf>,
    stop_grace: Duration,
}

impl V2raySupervisor {
    pub fn new(config: &ProcessConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            stop_grace: config.stop_grace,
        }
    }

    /// Resolve the binary: explicit override first, then the platform default
    pub fn binary(&self) -> Result<PathBuf> {
        match &self.binary {
            Some(path) => Ok(path.clone()),
            None => default_binary_for(std::env::consts::OS),
        }
    }
}

#[async_trait]
impl ProcessSupervisor for V2raySupervisor {
    #[instrument(skip(self), fields(config = %config_path.display()))]
    async fn start(&self, config_path: &Path) -> Result<Box<dyn SupervisedProcess>> {
        let binary = self.binary()?;

        if !tokio::fs::try_exists(&binary).await.unwrap_or(false) {
            return Err(CheckError::BinaryNotFound { path: binary });
        }
        if !tokio::fs::try_exists(config_path).await.unwrap_or(false) {
            return Err(CheckError::ConfigNotFound {
                path: config_path.to_path_buf(),
            });
        }

        let child = Command::new(&binary)
            .arg("run")
            .arg("-c")
            .arg(config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CheckError::Spawn(format!("{}: {}", binary.display(), e)))?;

        debug!(pid = ?child.id(), "proxy started");

        Ok(Box::new(ProxyProcess {
            child,
            stop_grace: self.stop_grace,
        }))
    }
}

/// A spawned engine process
pub struct ProxyProcess {
    child: Child,
    stop_grace: Duration,
}

#[async_trait]
impl SupervisedProcess for ProxyProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn exited(&mut self) -> Option<String> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.to_string()),
            Ok(None) => None,
            Err(e) => Some(format!("wait failed: {}", e)),
        }
    }

    async fn stop(&mut self) -> Result<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }

        request_termination(&self.child);

        match timeout(self.stop_grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!("proxy stopped: {}", status);
                Ok(())
            }
            Ok(Err(e)) => Err(CheckError::Io(e)),
            Err(_) => {
                warn!(
                    pid = ?self.child.id(),
                    "proxy ignored SIGTERM for {:?}, killing",
                    self.stop_grace
                );
                // kill() sends SIGKILL and reaps the child
                self.child.kill().await?;
                Ok(())
            }
        }
    }
}

#[cfg(unix)]
fn request_termination(child: &Child) {
    if let Some(pid) = child.id() {
        // SAFETY: plain syscall on a pid we spawned and have not reaped yet.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc != 0 {
            debug!(pid, "SIGTERM failed: {}", std::io::Error::last_os_error());
        }
    }
}

#[cfg(not(unix))]
fn request_termination(_child: &Child) {
    // No graceful signal; the grace timeout falls through to kill().
}
