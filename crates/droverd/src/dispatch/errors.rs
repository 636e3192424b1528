//! Error types for request dispatch failures.

use std::io;

use thiserror::Error;

use drover_daemon_types::{ErrorCategory, RpcError};

use crate::supervisor::SupervisorError;

/// Errors surfaced during request parsing and dispatch.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Request line could not be parsed as a request envelope.
    #[error("malformed JSONL: {message}")]
    Malformed {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    /// Method name is not one the daemon answers.
    #[error("unknown method: {method}")]
    UnknownMethod { method: String },

    /// Parameters did not match the method's schema.
    #[error("invalid params for {method}: {source}")]
    InvalidParams {
        method: String,
        #[source]
        source: serde_json::Error,
    },

    /// Request exceeds the maximum allowed size.
    #[error("request too large: exceeds {max_size} byte limit")]
    RequestTooLarge { max_size: usize },

    /// IO error during read or write.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Response serialization failed.
    #[error("failed to serialize response: {0}")]
    SerializeResponse(#[from] serde_json::Error),

    /// The supervisor rejected the operation.
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

impl DispatchError {
    /// Creates a malformed request error from a serde error.
    pub fn from_json_error(source: serde_json::Error) -> Self {
        Self::Malformed {
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Creates a malformed request error with a custom message.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an unknown method error.
    pub fn unknown_method(method: impl Into<String>) -> Self {
        Self::UnknownMethod {
            method: method.into(),
        }
    }

    /// Wire representation of the failure.
    ///
    /// Supervisor errors keep their own category. Request-shape problems are
    /// protocol errors, except bad parameters, which are configuration errors
    /// like any other invalid input.
    pub fn to_rpc(&self) -> RpcError {
        let category = match self {
            Self::Supervisor(error) => return error.to_rpc(),
            Self::Malformed { .. } | Self::UnknownMethod { .. } | Self::RequestTooLarge { .. } => {
                ErrorCategory::Protocol
            }
            Self::InvalidParams { .. } => ErrorCategory::Configuration,
            Self::Io(_) | Self::SerializeResponse(_) => ErrorCategory::Internal,
        };
        RpcError::new(category, self.to_string())
    }
}
