use camino::Utf8PathBuf;
use std::env;

#[cfg(unix)]
use libc::geteuid;

#[cfg(unix)]
use dirs::runtime_dir;

use crate::socket::SocketEndpoint;

/// Default TCP port used when Unix domain sockets are not available.
pub const DEFAULT_TCP_PORT: u16 = 9787;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default window for acquiring the reload lock.
pub const DEFAULT_RELOAD_LOCK_TIMEOUT_MS: u64 = 30_000;

/// Default fan-out for name-scoped operations.
pub const DEFAULT_CONCURRENT_ACTIONS: usize = 2;

/// Default fan-out for bulk delete.
pub const DEFAULT_BULK_CONCURRENCY: usize = 10;

/// Default soft reload grace period.
pub const DEFAULT_GRACEFUL_TIMEOUT_MS: u64 = 8_000;

/// Default per-subscriber event backlog.
pub const DEFAULT_BUS_CAPACITY: usize = 1_024;

/// Default log filter expression used by the binaries.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
#[must_use]
pub fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}

/// Default reload lock window in milliseconds.
#[must_use]
pub const fn default_reload_lock_timeout_ms() -> u64 {
    DEFAULT_RELOAD_LOCK_TIMEOUT_MS
}

/// Default name-scoped fan-out.
#[must_use]
pub const fn default_concurrent_actions() -> usize {
    DEFAULT_CONCURRENT_ACTIONS
}

/// Default bulk fan-out.
#[must_use]
pub const fn default_bulk_concurrency() -> usize {
    DEFAULT_BULK_CONCURRENCY
}

/// Default soft reload grace period in milliseconds.
#[must_use]
pub const fn default_graceful_timeout_ms() -> u64 {
    DEFAULT_GRACEFUL_TIMEOUT_MS
}

/// Default event bus backlog.
#[must_use]
pub const fn default_bus_capacity() -> usize {
    DEFAULT_BUS_CAPACITY
}

/// State directory under the user's home, `.drover`.
#[must_use]
pub fn default_state_dir() -> Utf8PathBuf {
    let home = home_base_directory().unwrap_or_else(fallback_base_directory);
    home.join(".drover")
}

/// Computes the default socket endpoint for the daemon.
#[must_use]
pub fn default_socket_endpoint() -> SocketEndpoint {
    default_socket_endpoint_inner()
}

#[cfg(unix)]
fn default_socket_endpoint_inner() -> SocketEndpoint {
    let (mut base, apply_namespace) = match runtime_base_directory() {
        Some(dir) => (dir, false),
        None => (fallback_base_directory(), true),
    };

    base.push("drover");
    if apply_namespace {
        base.push(user_namespace());
    }

    SocketEndpoint::unix(base.join("droverd.sock"))
}

#[cfg(unix)]
fn runtime_base_directory() -> Option<Utf8PathBuf> {
    runtime_dir().and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
}

#[cfg(unix)]
fn home_base_directory() -> Option<Utf8PathBuf> {
    dirs::home_dir().and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
}

#[cfg(not(unix))]
fn home_base_directory() -> Option<Utf8PathBuf> {
    None
}

fn fallback_base_directory() -> Utf8PathBuf {
    let candidate = env::temp_dir();
    Utf8PathBuf::from_path_buf(candidate).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}

#[cfg(unix)]
fn user_namespace() -> String {
    let uid = unsafe { geteuid() };
    format!("uid-{uid}")
}

#[cfg(not(unix))]
fn default_socket_endpoint_inner() -> SocketEndpoint {
    SocketEndpoint::tcp("127.0.0.1", DEFAULT_TCP_PORT)
}
