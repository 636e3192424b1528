//! Shared configuration for the drover daemon and its client.
//!
//! Values are layered by `ortho_config`: built-in defaults, then an optional
//! TOML file (`--config-path` or `DROVER_CONFIG_PATH`), then `DROVER_*`
//! environment variables, then command-line flags. Both binaries load the
//! same structure so they agree on the socket endpoint and the state layout.

mod defaults;
mod logging;
mod runtime;
mod socket;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use defaults::{
    DEFAULT_BULK_CONCURRENCY, DEFAULT_BUS_CAPACITY, DEFAULT_CONCURRENT_ACTIONS,
    DEFAULT_GRACEFUL_TIMEOUT_MS, DEFAULT_LOG_FILTER, DEFAULT_RELOAD_LOCK_TIMEOUT_MS,
    DEFAULT_TCP_PORT, default_bulk_concurrency, default_bus_capacity,
    default_concurrent_actions, default_graceful_timeout_ms, default_log_filter,
    default_log_filter_string, default_log_format, default_reload_lock_timeout_ms,
    default_socket_endpoint, default_state_dir,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use runtime::{RuntimePaths, RuntimePathsError, StatePaths};
pub use socket::{SocketEndpoint, SocketParseError, SocketPreparationError};

/// Resolved configuration shared by `droverd` and `drover`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "DROVER")]
pub struct Config {
    /// Endpoint the daemon listens on and the client connects to.
    #[ortho_config(default = default_socket_endpoint())]
    #[serde(default = "default_socket_endpoint")]
    pub daemon_socket: SocketEndpoint,
    /// `tracing` filter expression applied to daemon telemetry.
    #[ortho_config(default = default_log_filter_string())]
    #[serde(default = "default_log_filter_string")]
    pub log_filter: String,
    /// Telemetry output format.
    #[ortho_config(default = default_log_format())]
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
    /// Directory holding per-process logs, pid files and the dump snapshot.
    #[ortho_config(default = default_state_dir())]
    #[serde(default = "default_state_dir")]
    pub state_dir: Utf8PathBuf,
    /// Window for acquiring the process-wide reload lock.
    #[ortho_config(default = default_reload_lock_timeout_ms())]
    #[serde(default = "default_reload_lock_timeout_ms")]
    pub reload_lock_timeout_ms: u64,
    /// Fan-out limit for name-scoped operations.
    #[ortho_config(default = default_concurrent_actions())]
    #[serde(default = "default_concurrent_actions")]
    pub concurrent_actions: usize,
    /// Fan-out limit for bulk delete and shutdown.
    #[ortho_config(default = default_bulk_concurrency())]
    #[serde(default = "default_bulk_concurrency")]
    pub bulk_concurrency: usize,
    /// Grace period granted to an outgoing instance during soft reload.
    #[ortho_config(default = default_graceful_timeout_ms())]
    #[serde(default = "default_graceful_timeout_ms")]
    pub graceful_timeout_ms: u64,
    /// Per-subscriber backlog of the event bus.
    #[ortho_config(default = default_bus_capacity())]
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
    /// Replays the dump snapshot once the daemon is ready.
    #[ortho_config(default = false)]
    #[serde(default)]
    pub resurrect_on_start: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon_socket: default_socket_endpoint(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            state_dir: default_state_dir(),
            reload_lock_timeout_ms: DEFAULT_RELOAD_LOCK_TIMEOUT_MS,
            concurrent_actions: DEFAULT_CONCURRENT_ACTIONS,
            bulk_concurrency: DEFAULT_BULK_CONCURRENCY,
            graceful_timeout_ms: DEFAULT_GRACEFUL_TIMEOUT_MS,
            bus_capacity: DEFAULT_BUS_CAPACITY,
            resurrect_on_start: false,
        }
    }
}

impl Config {
    /// Endpoint used for daemon RPC.
    #[must_use]
    pub fn daemon_socket(&self) -> &SocketEndpoint {
        &self.daemon_socket
    }

    /// Telemetry filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Telemetry output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Root of the per-process state tree.
    #[must_use]
    pub fn state_dir(&self) -> &Utf8PathBuf {
        &self.state_dir
    }

    /// Reload lock acquisition window.
    #[must_use]
    pub fn reload_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.reload_lock_timeout_ms)
    }

    /// Soft reload grace period.
    #[must_use]
    pub fn graceful_timeout(&self) -> Duration {
        Duration::from_millis(self.graceful_timeout_ms)
    }

    /// Fan-out limit for name-scoped operations, never below one.
    #[must_use]
    pub fn concurrent_actions(&self) -> usize {
        self.concurrent_actions.max(1)
    }

    /// Fan-out limit for bulk operations, never below one.
    #[must_use]
    pub fn bulk_concurrency(&self) -> usize {
        self.bulk_concurrency.max(1)
    }

    /// Event bus backlog, never below one.
    #[must_use]
    pub fn bus_capacity(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Whether the daemon replays its dump at startup.
    #[must_use]
    pub fn resurrect_on_start(&self) -> bool {
        self.resurrect_on_start
    }
}
