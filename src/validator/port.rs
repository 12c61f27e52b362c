//! Local port allocation
//!
//! Ports are drawn at random from a configured range and checked with a
//! bind-and-release probe. A run-scoped registry keeps two leases of the same
//! run from ever sharing a port; other processes on the host can still take
//! a port between the check and the proxy binding it.

use std::net::{Ipv4Addr, TcpListener};
use std::sync::Arc;

use dashmap::DashSet;
use rand::Rng;
use tracing::{debug, trace};

use crate::config::PortConfig;
use crate::error::{CheckError, Result};

/// Hands out free local TCP ports
#[derive(Debug, Clone)]
pub struct PortAllocator {
    min: u16,
    max: u16,
    max_attempts: u32,
    leased: Arc<DashSet<u16>>,
}

impl PortAllocator {
    pub fn new(config: &PortConfig) -> Self {
        Self::with_range(config.min, config.max, config.max_attempts)
    }

    pub fn with_range(min: u16, max: u16, max_attempts: u32) -> Self {
        // Port 0 would ask the OS for an ephemeral port and always look free.
        let min = min.max(1);
        Self {
            min,
            max: max.max(min),
            max_attempts: max_attempts.max(1),
            leased: Arc::new(DashSet::new()),
        }
    }

    /// Find a port that is free right now and not leased by this run
    pub fn acquire(&self) -> Result<PortLease> {
        let mut rng = rand::thread_rng();

        for attempt in 1..=self.max_attempts {
            let port = rng.gen_range(self.min..=self.max);

            if !self.leased.insert(port) {
                trace!(port, attempt, "port already leased in this run");
                continue;
            }

            if is_port_free(port) {
                debug!(port, attempt, "port acquired");
                return Ok(PortLease {
                    port,
                    leased: self.leased.clone(),
                });
            }

            self.leased.remove(&port);
            trace!(port, attempt, "port busy");
        }

        Err(CheckError::NoFreePort {
            min: self.min,
            max: self.max,
            attempts: self.max_attempts,
        })
    }

    /// Number of ports currently leased
    pub fn leased_count(&self) -> usize {
        self.leased.len()
    }
}

/// A port reserved for one worker until dropped
#[derive(Debug)]
pub struct PortLease {
    port: u16,
    leased: Arc<DashSet<u16>>,
}

impl PortLease {
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.leased.remove(&self.port);
    }
}

/// Check whether a port can be bound on all interfaces
pub fn is_port_free(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).is_ok()
}
