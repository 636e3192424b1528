//! Lifecycle command types and output abstractions.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io::Write;

use drover_config::Config;

use super::LifecycleError;
use crate::cli::DaemonAction;

/// Supported lifecycle commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleCommand {
    /// Launch the daemon and wait for readiness.
    Start,
    /// Signal the daemon and wait for it to exit.
    Stop,
    /// Report the daemon's health snapshot.
    Status,
}

impl fmt::Display for LifecycleCommand {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => formatter.write_str("start"),
            Self::Stop => formatter.write_str("stop"),
            Self::Status => formatter.write_str("status"),
        }
    }
}

impl From<DaemonAction> for LifecycleCommand {
    fn from(action: DaemonAction) -> Self {
        match action {
            DaemonAction::Start => Self::Start,
            DaemonAction::Stop => Self::Stop,
            DaemonAction::Status => Self::Status,
        }
    }
}

/// Configuration context shared by lifecycle handlers.
#[derive(Debug, Clone, Copy)]
pub struct LifecycleContext<'a> {
    /// Resolved client configuration.
    pub config: &'a Config,
    /// Program name plus configuration flags, forwarded to `droverd`.
    pub config_arguments: &'a [OsString],
    /// Explicit daemon binary, overriding `DROVER_DAEMON_BIN`.
    pub daemon_binary: Option<&'a OsStr>,
}

/// Output handle over stdout and stderr writers.
pub struct LifecycleOutput<W: Write, E: Write> {
    /// Destination for primary output.
    pub stdout: W,
    /// Destination for diagnostics.
    pub stderr: E,
}

impl<W: Write, E: Write> LifecycleOutput<W, E> {
    /// Wraps the given writers.
    pub const fn new(stdout: W, stderr: E) -> Self {
        Self { stdout, stderr }
    }

    /// Writes one line to stdout and flushes it.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Io`] when the writer fails.
    pub fn stdout_line(&mut self, args: fmt::Arguments<'_>) -> Result<(), LifecycleError> {
        self.stdout.write_fmt(args).map_err(LifecycleError::Io)?;
        self.stdout.write_all(b"\n").map_err(LifecycleError::Io)?;
        self.stdout.flush().map_err(LifecycleError::Io)
    }

    /// Writes one line to stderr and flushes it.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Io`] when the writer fails.
    pub fn stderr_line(&mut self, args: fmt::Arguments<'_>) -> Result<(), LifecycleError> {
        self.stderr.write_fmt(args).map_err(LifecycleError::Io)?;
        self.stderr.write_all(b"\n").map_err(LifecycleError::Io)?;
        self.stderr.flush().map_err(LifecycleError::Io)
    }
}
