//! Error taxonomy surfaced by supervisor operations.
//!
//! Every variant maps onto a wire [`ErrorCategory`] so RPC callers receive a
//! plain message-bearing object rather than a crash.

use std::io;
use std::path::PathBuf;

use drover_daemon_types::{DescriptorError, ErrorCategory, RpcError};
use thiserror::Error;

use crate::launcher::SpawnError;

/// Errors returned by supervisor operations.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The descriptor failed validation.
    #[error("invalid descriptor: {source}")]
    InvalidDescriptor {
        /// Underlying validation failure.
        #[source]
        source: DescriptorError,
    },
    /// A cron expression did not parse.
    #[error("invalid cron expression '{expression}': {source}")]
    InvalidCron {
        /// Rejected expression.
        expression: String,
        /// Underlying parser error.
        #[source]
        source: cron::error::Error,
    },
    /// A signal name did not resolve.
    #[error("unknown signal '{signal}'")]
    InvalidSignal {
        /// Rejected signal name.
        signal: String,
    },
    /// Any other rejected input.
    #[error("{message}")]
    Configuration {
        /// Description of the problem.
        message: String,
    },
    /// No record matched the identifier or name.
    #[error("{target} not found")]
    NotFound {
        /// Description of what was looked up.
        target: String,
    },
    /// The OS refused to create the process.
    #[error("failed to launch '{name}': {source}")]
    Spawn {
        /// Application name.
        name: String,
        /// Underlying launcher error.
        #[source]
        source: SpawnError,
    },
    /// A bounded wait expired without the expected transition.
    #[error("{operation} for process {id} timed out after {waited_ms}ms")]
    Timeout {
        /// Operation that was waiting.
        operation: &'static str,
        /// Process identifier.
        id: u32,
        /// Time spent waiting.
        waited_ms: u64,
    },
    /// The restart limit was reached.
    #[error("process {id} reached its restart limit of {max_restarts}")]
    Instability {
        /// Process identifier.
        id: u32,
        /// Configured limit.
        max_restarts: u32,
    },
    /// A reload replacement died before becoming ready.
    #[error("reload of process {id} aborted: {reason}")]
    ReloadAborted {
        /// Process identifier.
        id: u32,
        /// What went wrong.
        reason: String,
    },
    /// Another reload or restart held the lock for the whole window.
    #[error("another reload is in progress (waited {waited_ms}ms); retry or force")]
    ReloadLocked {
        /// Time spent waiting for the lock.
        waited_ms: u64,
    },
    /// The daemon is shutting down.
    #[error("daemon is shutting down")]
    ShuttingDown,
    /// The process is already running.
    #[error("process {id} is already online")]
    AlreadyOnline {
        /// Process identifier.
        id: u32,
    },
    /// The request needs a live child but none is running.
    #[error("process {id} is not running")]
    NotRunning {
        /// Process identifier.
        id: u32,
    },
    /// The child has no IPC channel to deliver to.
    #[error("process {id} has no IPC channel")]
    NoChannel {
        /// Process identifier.
        id: u32,
    },
    /// A filesystem operation failed.
    #[error("{context} '{path}': {source}")]
    Io {
        /// What was being done.
        context: &'static str,
        /// File involved.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A filesystem watch could not be installed.
    #[error("failed to watch '{path}': {source}")]
    Watch {
        /// Path that could not be watched.
        path: PathBuf,
        /// Underlying watcher error.
        #[source]
        source: notify::Error,
    },
    /// The dump file could not be encoded or decoded.
    #[error("malformed dump file '{path}': {source}")]
    Dump {
        /// Dump file path.
        path: PathBuf,
        /// Underlying serialisation error.
        #[source]
        source: serde_json::Error,
    },
}

impl SupervisorError {
    /// Builds a not-found error for a numeric identifier.
    pub fn unknown_id(id: u32) -> Self {
        Self::NotFound {
            target: format!("process {id}"),
        }
    }

    /// Builds a not-found error for an application name.
    pub fn unknown_name(name: &str) -> Self {
        Self::NotFound {
            target: format!("application '{name}'"),
        }
    }

    /// Builds a configuration error from a message.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Builds an IO error with context.
    pub fn io(context: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            context,
            path: path.into(),
            source,
        }
    }

    /// Wire category for this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidDescriptor { .. }
            | Self::InvalidCron { .. }
            | Self::InvalidSignal { .. }
            | Self::Configuration { .. }
            | Self::Watch { .. } => ErrorCategory::Configuration,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Spawn { .. } | Self::ReloadAborted { .. } => ErrorCategory::Spawn,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Instability { .. } => ErrorCategory::Instability,
            Self::ReloadLocked { .. }
            | Self::ShuttingDown
            | Self::AlreadyOnline { .. }
            | Self::NotRunning { .. }
            | Self::NoChannel { .. } => ErrorCategory::Conflict,
            Self::Io { .. } | Self::Dump { .. } => ErrorCategory::Internal,
        }
    }

    /// Converts the error into its wire representation.
    #[must_use]
    pub fn to_rpc(&self) -> RpcError {
        RpcError::new(self.category(), self.to_string())
    }
}

impl From<DescriptorError> for SupervisorError {
    fn from(source: DescriptorError) -> Self {
        Self::InvalidDescriptor { source }
    }
}
