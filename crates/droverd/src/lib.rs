//! The drover supervisor daemon.
//!
//! `droverd` keeps a registry of managed OS processes and drives their
//! lifecycle: launching one or many instances of an application, restarting
//! them with backoff when they exit, handing traffic over to a replacement
//! during reloads, restarting on filesystem changes or cron ticks, and
//! persisting the set of applications so it can be resurrected after the
//! daemon itself restarts.
//!
//! Clients talk to the daemon over a Unix or TCP socket configured through
//! [`drover_config`]. Each connection carries one JSONL request naming an RPC
//! method; `subscribe` turns the connection into a stream of bus events.
//!
//! The process layer owns the singleton lock, pid file and health snapshot,
//! daemonises when asked to, and translates termination signals into an
//! orderly shutdown that stops every managed process before exiting.

mod bootstrap;
mod dispatch;
mod health;
pub mod launcher;
mod process;
pub mod supervisor;
mod telemetry;
mod transport;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Daemon, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use process::{LaunchError, LaunchMode, run_daemon};
pub use supervisor::{ReloadMode, Supervisor, SupervisorError, SupervisorSettings};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
