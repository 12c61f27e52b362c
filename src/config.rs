use crate::error::{CheckError, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Run-level settings (files, cap, pool size)
    pub run: RunConfig,
    /// Port allocation
    pub ports: PortConfig,
    /// Connectivity probe
    pub probe: ProbeConfig,
    /// Warm-up between process start and probe
    pub warmup: WarmupConfig,
    /// External proxy process
    pub process: ProcessConfig,
    /// External config converter
    pub converter: ConverterConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Candidate list, one per line (default: ./configs)
    pub configs_file: PathBuf,
    /// Append-only output of valid candidates (default: ./sajx.sub)
    pub valid_configs_file: PathBuf,
    /// Stop after this many valid candidates (default: 10000)
    pub max_valid: usize,
    /// Number of candidates validated at once (default: 10)
    pub concurrency: usize,
    /// Directory materialized config files are written to (default: .)
    pub work_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PortConfig {
    pub min: u16,
    pub max: u16,
    /// Random draws before giving up
    pub max_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Target fetched through the proxy
    pub url: Url,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmupMode {
    /// Poll the proxy port until it accepts connections
    Poll,
    /// Sleep for the whole warm-up interval
    Fixed,
}

impl WarmupMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "poll" | "ready" | "readiness" => Some(Self::Poll),
            "fixed" | "sleep" => Some(Self::Fixed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Poll => "poll",
            Self::Fixed => "fixed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct WarmupConfig {
    pub mode: WarmupMode,
    /// Upper bound on the warm-up
    pub interval: Duration,
    /// Delay between readiness attempts
    pub poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Overrides the platform default binary location
    pub binary: Option<PathBuf>,
    /// How long to wait after SIGTERM before killing
    pub stop_grace: Duration,
}

#[derive(Debug, Clone)]
pub struct ConverterConfig {
    pub program: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
    /// Optional log file, appended to alongside stdout
    pub file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let port_min: u16 = parse_env("PROXYCHECK_PORT_MIN", "1024")?;
        let port_max: u16 = parse_env("PROXYCHECK_PORT_MAX", "65535")?;
        if port_min > port_max {
            return Err(CheckError::InvalidConfig(
                "PROXYCHECK_PORT_MIN must not exceed PROXYCHECK_PORT_MAX".into(),
            ));
        }

        let probe_url = Url::parse(&get_env_or(
            "PROXYCHECK_PROBE_URL",
            "https://google.com/generate_204",
        ))
        .map_err(|e| {
            CheckError::InvalidConfig(format!("PROXYCHECK_PROBE_URL must be a valid URL: {}", e))
        })?;

        let warmup_mode = get_env_or("PROXYCHECK_WARMUP_MODE", "poll");
        let warmup_mode = WarmupMode::from_str(&warmup_mode).ok_or_else(|| {
            CheckError::InvalidConfig(format!(
                "PROXYCHECK_WARMUP_MODE must be poll or fixed, got {}",
                warmup_mode
            ))
        })?;

        let binary = get_env_or("PROXYCHECK_PROXY_BINARY", "");
        let log_file = get_env_or("LOG_FILE", "config_check.log");

        Ok(Config {
            run: RunConfig {
                configs_file: get_env_or("PROXYCHECK_CONFIGS_FILE", "./configs").into(),
                valid_configs_file: get_env_or("PROXYCHECK_VALID_CONFIGS_FILE", "./sajx.sub")
                    .into(),
                max_valid: parse_env("PROXYCHECK_MAX_VALID", "10000")?,
                concurrency: parse_env::<usize>("PROXYCHECK_CONCURRENCY", "10")?.max(1),
                work_dir: get_env_or("PROXYCHECK_WORK_DIR", ".").into(),
            },
            ports: PortConfig {
                min: port_min,
                max: port_max,
                max_attempts: parse_env::<u32>("PROXYCHECK_PORT_ATTEMPTS", "512")?.max(1),
            },
            probe: ProbeConfig {
                url: probe_url,
                timeout: Duration::from_secs(parse_env("PROXYCHECK_PROBE_TIMEOUT", "5")?),
            },
            warmup: WarmupConfig {
                mode: warmup_mode,
                interval: Duration::from_secs(parse_env("PROXYCHECK_WARMUP_SECS", "5")?),
                poll_interval: Duration::from_millis(
                    parse_env::<u64>("PROXYCHECK_WARMUP_POLL_MS", "200")?.max(1),
                ),
            },
            process: ProcessConfig {
                binary: if binary.trim().is_empty() {
                    None
                } else {
                    Some(PathBuf::from(binary.trim()))
                },
                stop_grace: Duration::from_secs(parse_env("PROXYCHECK_STOP_GRACE_SECS", "5")?),
            },
            converter: ConverterConfig {
                program: get_env_or("PROXYCHECK_CONVERTER", "v2ray2json"),
                args: get_env_or("PROXYCHECK_CONVERTER_ARGS", "")
                    .split_whitespace()
                    .map(|s| s.to_string())
                    .collect(),
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
                file: if log_file.trim().is_empty() {
                    None
                } else {
                    Some(PathBuf::from(log_file.trim()))
                },
            },
        })
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable, falling back to `default` when unset
fn parse_env<T: FromStr>(key: &str, default: &str) -> Result<T> {
    get_env_or(key, default)
        .trim()
        .parse()
        .map_err(|_| CheckError::InvalidConfig(format!("{} must be a valid number", key)))
}
