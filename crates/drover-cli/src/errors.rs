//! Error types for the client runtime.

use std::io;
use std::sync::Arc;

use drover_daemon_types::RpcError;
use thiserror::Error;

use crate::lifecycle::LifecycleError;

/// Failures raised by [`crate::DaemonClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// Resolving a TCP endpoint failed.
    #[error("failed to resolve daemon address {endpoint}: {source}")]
    Resolve {
        /// Endpoint as configured.
        endpoint: String,
        /// Underlying resolver error.
        #[source]
        source: io::Error,
    },
    /// Connecting to the daemon socket failed.
    #[error("failed to connect to daemon at {endpoint}: {source}")]
    Connect {
        /// Endpoint as configured.
        endpoint: String,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },
    /// The platform cannot reach Unix socket endpoints.
    #[cfg(not(unix))]
    #[error("platform does not support Unix sockets: {0}")]
    UnsupportedUnixTransport(String),
    /// Encoding the request failed.
    #[error("failed to serialise request: {0}")]
    SerialiseRequest(#[source] serde_json::Error),
    /// Writing the request failed.
    #[error("failed to send request to daemon: {0}")]
    SendRequest(#[source] io::Error),
    /// Reading the reply failed.
    #[error("failed to read response from daemon: {0}")]
    ReadResponse(#[source] io::Error),
    /// The reply was not a daemon message.
    #[error("failed to parse daemon message: {0}")]
    ParseMessage(#[source] serde_json::Error),
    /// The daemon closed the connection without replying.
    #[error("daemon closed the connection without replying")]
    MissingReply,
    /// The daemon sent an event where a reply was expected.
    #[error("daemon sent an event where a reply was expected")]
    UnexpectedEvent,
    /// The daemon sent a reply on an event stream.
    #[error("daemon sent a reply on an event stream")]
    UnexpectedReply,
    /// The daemon answered with an error.
    #[error("{} error: {}", .0.category, .0.message)]
    Rpc(RpcError),
    /// Launching the daemon on demand failed.
    #[error("failed to start the daemon: {0}")]
    AutoStart(#[source] Box<LifecycleError>),
}

impl ClientError {
    /// Returns the daemon's error when the call reached it and was refused.
    #[must_use]
    pub const fn rpc(&self) -> Option<&RpcError> {
        match self {
            Self::Rpc(error) => Some(error),
            _ => None,
        }
    }
}

/// Failures surfaced by the `drover` command line.
#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error("unknown method '{0}'")]
    UnknownMethod(String),
    #[error("parameters for '{method}' are not valid JSON: {source}")]
    ParseParams {
        method: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write output: {0}")]
    Output(#[source] io::Error),
    #[error("failed to render daemon data: {0}")]
    Render(#[source] serde_json::Error),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("daemon lifecycle command failed: {0}")]
    Lifecycle(#[from] LifecycleError),
}

/// Determines whether a connection failure means nothing is listening.
///
/// Connection refused, a missing socket file and an unassignable address all
/// mean the daemon is not running; any other failure is reported as-is.
pub(crate) fn is_daemon_not_running(error: &ClientError) -> bool {
    match error {
        ClientError::Connect { source, .. } => is_absent_listener(source),
        _ => false,
    }
}

pub(crate) fn is_absent_listener(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound | io::ErrorKind::AddrNotAvailable
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_daemon_types::ErrorCategory;
    use rstest::rstest;

    fn connect_error(kind: io::ErrorKind) -> ClientError {
        ClientError::Connect {
            endpoint: String::from("unix:///tmp/droverd.sock"),
            source: io::Error::new(kind, "probe"),
        }
    }

    #[rstest]
    #[case(io::ErrorKind::ConnectionRefused, true)]
    #[case(io::ErrorKind::NotFound, true)]
    #[case(io::ErrorKind::AddrNotAvailable, true)]
    #[case(io::ErrorKind::PermissionDenied, false)]
    #[case(io::ErrorKind::TimedOut, false)]
    #[case(io::ErrorKind::ConnectionReset, false)]
    fn only_absent_listeners_count_as_not_running(
        #[case] kind: io::ErrorKind,
        #[case] expected: bool,
    ) {
        assert_eq!(is_daemon_not_running(&connect_error(kind)), expected);
    }

    #[test]
    fn rpc_errors_render_their_category() {
        let error = ClientError::Rpc(RpcError::new(ErrorCategory::NotFound, "no process 4"));
        assert_eq!(error.to_string(), "not_found error: no process 4");
        assert_eq!(error.rpc().map(|rpc| rpc.category), Some(ErrorCategory::NotFound));
    }

    #[test]
    fn read_failures_do_not_trigger_auto_start() {
        let error = ClientError::ReadResponse(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert!(!is_daemon_not_running(&error));
    }
}
