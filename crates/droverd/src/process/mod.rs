//! Daemon process management: singleton guard, daemonisation, signal
//! handling and the launch sequence tying them to the runtime.

use std::time::Duration;

pub(crate) mod daemonizer;
mod errors;
pub(crate) mod files;
mod guard;
pub(crate) mod launch;
pub(crate) mod shutdown;

pub use errors::LaunchError;
pub use launch::{LaunchMode, run_daemon};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
/// Upper bound on stopping every managed process during shutdown.
pub(crate) const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const FOREGROUND_ENV_VAR: &str = "DROVER_FOREGROUND";
