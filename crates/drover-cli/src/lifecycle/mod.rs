//! Lifecycle management for `droverd`.
//!
//! - [`types`] defines the command model and output wrapper.
//! - [`error`] captures the error surface exposed to the CLI.
//! - [`spawning`] resolves and spawns the daemon binary.
//! - [`monitoring`] reads health snapshots and polls for readiness.
//! - [`shutdown`] signals the daemon and waits for it to go away.
//! - [`socket`] probes whether the endpoint is listening.
//! - [`launch`] runs the start sequence shared with auto-start.
//! - [`controller`] implements the start/stop/status flows.

mod controller;
mod error;
mod launch;
mod monitoring;
mod shutdown;
mod socket;
mod spawning;
mod types;

pub use controller::SystemLifecycle;
pub use error::LifecycleError;
pub(crate) use launch::start_daemon;
pub(crate) use monitoring::{DaemonStatus, HealthSnapshot};
pub use types::{LifecycleCommand, LifecycleContext, LifecycleOutput};
