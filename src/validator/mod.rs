//! Proxy configuration validation pipeline
//!
//! This module provides:
//! - Port allocation with a run-scoped lease registry
//! - Materialization of candidates into engine config files
//! - Supervision of the external proxy process
//! - Readiness waiting and the HTTPS connectivity probe
//! - The per-candidate worker and the capped, cancellable coordinator

pub mod coordinator;
pub mod materializer;
pub mod port;
pub mod probe;
pub mod process;
pub mod sink;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use coordinator::{RunState, ValidationCoordinator};
pub use materializer::{CommandMaterializer, ConfigMaterializer, MaterializedConfig};
pub use port::{PortAllocator, PortLease};
pub use probe::{ConnectivityProbe, HttpsProbe, Warmup};
pub use process::{ProcessSupervisor, SupervisedProcess, V2raySupervisor};
pub use sink::ResultSink;
pub use worker::{ValidationWorker, WorkerConfig};
