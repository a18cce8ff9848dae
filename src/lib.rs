//! kco - Kubernetes cluster lifecycle orchestrator.
//!
//! Provisions, scales, upgrades and tears down Kubernetes clusters running on
//! tenant VMs. Each operation is driven through a persisted lifecycle state
//! machine, with bounded retries, one wall-clock deadline per operation and
//! bootstrap media cleanup on failure.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod logging;
pub mod membership;
pub mod metrics;
pub mod model;
pub mod remote;
pub mod retry;
pub mod state;
pub mod store;
pub mod version;
pub mod worker;

pub use error::{KcoError, Result};
