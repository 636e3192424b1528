//! Error types for daemon lifecycle operations.

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::time::SystemTime;

use drover_config::{RuntimePathsError, SocketPreparationError};
use thiserror::Error;

/// Errors raised while executing lifecycle commands.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Something already listens on the configured socket.
    #[error(
        "daemon socket {endpoint} is already in use; stop the existing daemon or change --daemon-socket"
    )]
    SocketInUse {
        /// Endpoint as configured.
        endpoint: String,
    },
    /// Probing the socket failed for a reason other than absence.
    #[error("failed to probe daemon socket {endpoint}: {source}")]
    SocketProbe {
        /// Endpoint as configured.
        endpoint: String,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },
    /// The daemon binary could not be spawned.
    #[error("failed to spawn droverd binary '{binary:?}': {source}")]
    LaunchDaemon {
        /// Binary that was executed.
        binary: OsString,
        /// Underlying spawn error.
        #[source]
        source: io::Error,
    },
    /// The spawned process failed before reporting ready.
    #[error("daemon exited before reporting ready (status: {exit_status:?})")]
    StartupFailed {
        /// Exit code, when the process was not killed by a signal.
        exit_status: Option<i32>,
    },
    /// The daemon began stopping before it became ready.
    #[error("daemon reported 'stopping' before reaching ready; check health snapshot at {path:?}")]
    StartupAborted {
        /// Health snapshot location.
        path: PathBuf,
    },
    /// No ready snapshot appeared in time.
    #[error("timed out waiting for ready snapshot in {timeout_ms} ms at {health_path:?}")]
    StartupTimeout {
        /// Health snapshot location.
        health_path: PathBuf,
        /// Time waited.
        timeout_ms: u64,
    },
    /// Polling the spawned process failed.
    #[error("failed to monitor daemon launch: {source}")]
    MonitorChild {
        /// Underlying wait error.
        #[source]
        source: io::Error,
    },
    /// The health snapshot could not be read.
    #[error("failed to read health snapshot {path:?}: {source}")]
    ReadHealth {
        /// Health snapshot location.
        path: PathBuf,
        /// Underlying filesystem error.
        #[source]
        source: io::Error,
    },
    /// The health snapshot was not valid JSON.
    #[error("failed to parse health snapshot {path:?}: {source}")]
    ParseHealth {
        /// Health snapshot location.
        path: PathBuf,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
    /// The pid file could not be read.
    #[error("failed to read pid file {path:?}: {source}")]
    ReadPid {
        /// Pid file location.
        path: PathBuf,
        /// Underlying filesystem error.
        #[source]
        source: io::Error,
    },
    /// The pid file did not hold an integer.
    #[error("failed to parse pid file {path:?}: {source}")]
    ParsePid {
        /// Pid file location.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: std::num::ParseIntError,
    },
    /// The socket answers but there is no pid to signal.
    #[error(
        "daemon socket {endpoint} is reachable but pid file {path:?} is missing; inspect the runtime directory before retrying"
    )]
    MissingPidWithSocket {
        /// Pid file location.
        path: PathBuf,
        /// Endpoint as configured.
        endpoint: String,
    },
    /// Writing lifecycle output failed.
    #[error("failed to write lifecycle output: {0}")]
    Io(#[source] io::Error),
    /// Delivering SIGTERM failed.
    #[error("failed to signal daemon pid {pid}: {source}")]
    SignalFailed {
        /// Target pid.
        pid: u32,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The daemon did not exit in time.
    #[error("daemon shutdown did not complete within {timeout_ms} ms; check {pid_path:?}")]
    ShutdownTimeout {
        /// Pid file location.
        pid_path: PathBuf,
        /// Time waited.
        timeout_ms: u64,
    },
    /// The system clock is before the Unix epoch.
    #[error("system clock reports {time:?}, before the Unix epoch")]
    InvalidSystemClock {
        /// Offending clock reading.
        time: SystemTime,
    },
    /// Signalling is unavailable on this platform.
    #[cfg(not(unix))]
    #[error("platform does not support daemon lifecycle signalling")]
    UnsupportedPlatform,
    /// Runtime paths could not be derived.
    #[error(transparent)]
    Paths(#[from] RuntimePathsError),
    /// The socket's parent directory could not be prepared.
    #[error("failed to prepare daemon socket: {source}")]
    Socket {
        /// Underlying preparation error.
        #[from]
        source: SocketPreparationError,
    },
}
