//! Proxycheck - Proxy Configuration Validator
//!
//! Validates large batches of proxy configurations by running each one
//! through a local proxy engine and probing an HTTPS endpoint through it.
//!
//! ## Features
//!
//! - Bounded concurrent validation with a cap on accepted results
//! - Per-candidate port, config file and process, always released
//! - Readiness polling instead of a blind warm-up delay
//! - Prompt, cooperative cancellation on interrupt or cap
//! - Append-only output of working configurations

pub mod config;
pub mod error;
pub mod models;
pub mod validator;

pub use config::Config;
pub use error::{CheckError, Result};
