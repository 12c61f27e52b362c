//! Connectivity checks through a local proxy port

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use super::process::SupervisedProcess;
use crate::error::{CheckError, Result};

/// Performs one request through a local proxy port
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Fetch `url` through the proxy listening on `port`
    ///
    /// Ordinary network failures (timeout, refused, non-2xx) are `Ok(false)`.
    /// `Err` is reserved for inputs the probe cannot even attempt.
    async fn test(&self, url: &Url, port: u16, timeout: Duration) -> Result<bool>;
}

/// HTTPS probe through the proxy's HTTP inbound
#[derive(Debug, Default, Clone)]
pub struct HttpsProbe;

impl HttpsProbe {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ConnectivityProbe for HttpsProbe {
    async fn test(&self, url: &Url, port: u16, request_timeout: Duration) -> Result<bool> {
        let proxy = reqwest::Proxy::all(format!("http://127.0.0.1:{}", port))?;
        let client = reqwest::Client::builder()
            .proxy(proxy)
            .danger_accept_invalid_certs(true)
            .timeout(request_timeout)
            .build()?;

        match client.get(url.clone()).send().await {
            Ok(response) => match response.error_for_status() {
                Ok(_) => Ok(true),
                Err(e) => {
                    debug!(port, "probe got error status: {}", e);
                    Ok(false)
                }
            },
            Err(e) => {
                debug!(port, "probe request failed: {}", e);
                Ok(false)
            }
        }
    }
}

/// How the worker waits between process start and probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Warmup {
    /// Sleep for the full duration
    Fixed(Duration),
    /// Connect to the port every `interval` until it answers, up to `limit`
    Poll { limit: Duration, interval: Duration },
}

/// Outcome of a warm-up that was not an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Cancelled,
}

impl Warmup {
    /// Wait for the proxy on `port` to be usable
    ///
    /// Returns early on cancellation. In poll mode a process that exits or a
    /// port that never opens is an error.
    pub async fn wait(
        &self,
        port: u16,
        process: &mut dyn SupervisedProcess,
        cancel: &CancellationToken,
    ) -> Result<Readiness> {
        match *self {
            Warmup::Fixed(delay) => {
                tokio::select! {
                    _ = cancel.cancelled() => Ok(Readiness::Cancelled),
                    _ = sleep(delay) => Ok(Readiness::Ready),
                }
            }
            Warmup::Poll { limit, interval } => {
                let started = Instant::now();
                loop {
                    if cancel.is_cancelled() {
                        return Ok(Readiness::Cancelled);
                    }
                    if let Some(status) = process.exited() {
                        return Err(CheckError::ProcessExited(status));
                    }
                    if port_accepts(port, interval).await {
                        debug!(port, waited = ?started.elapsed(), "proxy ready");
                        return Ok(Readiness::Ready);
                    }
                    if started.elapsed() >= limit {
                        return Err(CheckError::ProcessNotReady {
                            port,
                            waited_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(Readiness::Cancelled),
                        _ = sleep(interval) => {}
                    }
                }
            }
        }
    }
}

async fn port_accepts(port: u16, connect_timeout: Duration) -> bool {
    matches!(
        timeout(
            connect_timeout,
            TcpStream::connect((Ipv4Addr::LOCALHOST, port))
        )
        .await,
        Ok(Ok(_))
    )
}
