//! Trend oracle node.
//!
//! Configuration from the environment, the [`CycleScheduler`] with its
//! run-lock, Prometheus metrics and the optional status server. The binary
//! in `main.rs` is a thin CLI over this library.

pub mod bootstrap;
pub mod config;
pub mod metrics;
pub mod routes;
pub mod scheduler;

pub use config::{ConfigError, NodeConfig};
pub use scheduler::{Collaborators, CycleReport, CycleScheduler, SchedulerConfig};
