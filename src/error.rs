use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for the proxycheck pipeline
#[derive(Error, Debug)]
pub enum CheckError {
    // Configuration errors
    #[error("Unsupported operating system: {0}")]
    UnsupportedPlatform(String),

    #[error("Proxy executable not found at {}", .path.display())]
    BinaryNotFound { path: PathBuf },

    #[error("Proxy configuration file not found at {}", .path.display())]
    ConfigNotFound { path: PathBuf },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Resource contention
    #[error("No free port in {min}-{max} after {attempts} attempts")]
    NoFreePort { min: u16, max: u16, attempts: u32 },

    #[error("File '{}' already exists", .path.display())]
    ConfigFileExists { path: PathBuf },

    #[error("Proxy on port {port} not ready after {waited_ms}ms")]
    ProcessNotReady { port: u16, waited_ms: u64 },

    #[error("Proxy process exited early: {0}")]
    ProcessExited(String),

    // Collaborator errors
    #[error("Config materialization failed: {0}")]
    Materialize(String),

    #[error("Failed to spawn proxy: {0}")]
    Spawn(String),

    #[error("Probe error: {0}")]
    Probe(String),

    #[error("Validation stage panicked: {0}")]
    Panicked(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for proxycheck operations
pub type Result<T> = std::result::Result<T, CheckError>;

/// Coarse classification of a [`CheckError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Platform, binary or config problems
    Configuration,
    /// Lost a race for a port or a file name
    Contention,
    /// Anything else
    Unexpected,
}

impl CheckError {
    /// Get the classification for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            CheckError::UnsupportedPlatform(_)
            | CheckError::BinaryNotFound { .. }
            | CheckError::ConfigNotFound { .. }
            | CheckError::InvalidConfig(_) => ErrorKind::Configuration,

            CheckError::NoFreePort { .. }
            | CheckError::ConfigFileExists { .. }
            | CheckError::ProcessNotReady { .. }
            | CheckError::ProcessExited(_) => ErrorKind::Contention,

            CheckError::Materialize(_)
            | CheckError::Spawn(_)
            | CheckError::Probe(_)
            | CheckError::Panicked(_)
            | CheckError::Io(_) => ErrorKind::Unexpected,
        }
    }

    /// Check if this is a configuration error
    pub fn is_configuration(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }

    /// Check if this is a resource contention error
    pub fn is_contention(&self) -> bool {
        self.kind() == ErrorKind::Contention
    }
}

// Convert from reqwest builder errors
impl From<reqwest::Error> for CheckError {
    fn from(err: reqwest::Error) -> Self {
        CheckError::Probe(err.to_string())
    }
}
