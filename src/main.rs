//! Proxycheck - Entry Point
//!
//! Validates every configuration in the input file and appends the working
//! ones to the output file. Ctrl+C stops dispatch and releases in-flight work.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer, Registry};

use proxycheck::config::{Config, LogConfig};
use proxycheck::models::Candidate;
use proxycheck::validator::{
    CommandMaterializer, HttpsProbe, PortAllocator, ResultSink, V2raySupervisor,
    ValidationCoordinator, ValidationWorker, WorkerConfig,
};

/// Check and validate V2Ray configurations.
#[derive(Parser, Debug)]
#[command(name = "proxycheck")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the configurations file
    #[arg(long = "configs-file", alias = "configs_file")]
    configs_file: Option<PathBuf>,

    /// Path to the output file for valid configurations
    #[arg(long = "valid-configs-file", alias = "valid_configs_file")]
    valid_configs_file: Option<PathBuf>,

    /// Maximum number of valid configurations before stopping
    #[arg(long = "max-valid-configs", alias = "max_valid_configs")]
    max_valid_configs: Option<usize>,

    /// Number of configurations checked at once
    #[arg(long)]
    concurrency: Option<usize>,
}

impl Cli {
    /// Command line values win over the environment
    fn apply(self, config: &mut Config) {
        if let Some(path) = self.configs_file {
            config.run.configs_file = path;
        }
        if let Some(path) = self.valid_configs_file {
            config.run.valid_configs_file = path;
        }
        if let Some(max) = self.max_valid_configs {
            config.run.max_valid = max;
        }
        if let Some(concurrency) = self.concurrency {
            config.run.concurrency = concurrency.max(1);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::from_env()?;
    cli.apply(&mut config);

    init_tracing(&config.log)?;
    info!("Starting proxycheck");

    let candidates = Candidate::load(&config.run.configs_file)
        .await
        .with_context(|| {
            format!(
                "Error processing config file '{}'",
                config.run.configs_file.display()
            )
        })?;

    let mut sink = ResultSink::open(&config.run.valid_configs_file)
        .await
        .with_context(|| {
            format!(
                "Cannot open output file '{}'",
                config.run.valid_configs_file.display()
            )
        })?;

    let worker = ValidationWorker::new(
        PortAllocator::new(&config.ports),
        Arc::new(CommandMaterializer::new(&config.converter)),
        Arc::new(V2raySupervisor::new(&config.process)),
        Arc::new(HttpsProbe::new()),
        WorkerConfig::from_config(&config),
    );
    let coordinator = ValidationCoordinator::new(
        Arc::new(worker),
        config.run.concurrency,
        config.run.max_valid,
    );
    info!(
        "Checking with {} workers, warm-up {} ({:?}), probe {}",
        config.run.concurrency,
        config.warmup.mode.as_str(),
        config.warmup.interval,
        config.probe.url
    );

    // Interrupt handling
    let shutdown = CancellationToken::new();
    let signal_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("SIGINT received. Stopping all workers.");
            shutdown.cancel();
        })
    };

    let summary = coordinator.run(candidates, &mut sink, &shutdown).await;
    signal_task.abort();

    info!(
        summary = %serde_json::to_string(&summary)?,
        "Validation finished"
    );
    println!("{}", summary);

    Ok(())
}

/// Stdout in the configured format, plus an optional plain-text log file
fn init_tracing(log: &LogConfig) -> anyhow::Result<()> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    match log.format.to_lowercase().as_str() {
        "json" => layers.push(tracing_subscriber::fmt::layer().json().boxed()),
        _ => layers.push(tracing_subscriber::fmt::layer().boxed()),
    }

    if let Some(path) = &log.file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Cannot open log file '{}'", path.display()))?;
        layers.push(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("proxycheck={}", log.level).into()),
        )
        .init();

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
