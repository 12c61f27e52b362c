//! Rendering candidates into proxy configuration files

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::config::ConverterConfig;
use crate::error::{CheckError, Result};

/// Turns a candidate into proxy-engine configuration bound to a local port
#[async_trait]
pub trait ConfigMaterializer: Send + Sync {
    /// Render `candidate` with its local inbound listening on `port`
    ///
    /// Returns an error if the candidate cannot be parsed.
    async fn generate(&self, port: u16, candidate: &str) -> Result<String>;
}

/// Materializer backed by an external converter program
///
/// The program is invoked as `<program> [args...] <port> <candidate>` and must
/// print a JSON document on stdout.
pub struct CommandMaterializer {
    program: String,
    args: Vec<String>,
}

impl CommandMaterializer {
    pub fn new(config: &ConverterConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
        }
    }
}

#[async_trait]
impl ConfigMaterializer for CommandMaterializer {
    #[instrument(skip(self, candidate), fields(program = %self.program))]
    async fn generate(&self, port: u16, candidate: &str) -> Result<String> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(port.to_string())
            .arg(candidate)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CheckError::Materialize(format!("{}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CheckError::Materialize(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.lines().next().unwrap_or("no output")
            )));
        }

        let content = String::from_utf8(output.stdout)
            .map_err(|_| CheckError::Materialize("converter output is not UTF-8".into()))?;

        serde_json::from_str::<serde_json::Value>(&content)
            .map_err(|e| CheckError::Materialize(format!("converter output is not JSON: {}", e)))?;

        debug!(bytes = content.len(), "config rendered");
        Ok(content)
    }
}

/// A rendered configuration on disk
///
/// Removed by [`MaterializedConfig::remove`]; if that never runs the file is
/// removed when the value is dropped.
#[derive(Debug)]
pub struct MaterializedConfig {
    path: PathBuf,
    removed: bool,
}

impl MaterializedConfig {
    /// File name used for a given port
    pub fn path_for(dir: &Path, port: u16) -> PathBuf {
        dir.join(format!("{}.json", port))
    }

    /// Write `content` to `<dir>/<port>.json`, refusing to overwrite
    pub async fn create(dir: &Path, port: u16, content: &str) -> Result<Self> {
        let path = Self::path_for(dir, port);

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| match e.kind() {
                IoErrorKind::AlreadyExists => CheckError::ConfigFileExists { path: path.clone() },
                _ => CheckError::Io(e),
            })?;

        // From here on the file exists and is ours to delete.
        let config = Self {
            path,
            removed: false,
        };

        file.write_all(content.as_bytes()).await?;
        file.flush().await?;

        Ok(config)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file
    pub async fn remove(mut self) -> Result<()> {
        self.removed = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(CheckError::Io(e)),
        }
    }
}

impl Drop for MaterializedConfig {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != IoErrorKind::NotFound {
                warn!("Failed to remove {}: {}", self.path.display(), e);
            }
        }
    }
}
