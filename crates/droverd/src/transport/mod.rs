//! Socket listener for daemon transport endpoints.
//!
//! The transport module binds to the configured endpoint and accepts
//! connections on the tokio runtime, handing each one to a
//! [`ConnectionHandler`] in its own task.

mod errors;
mod handler;
mod listener;

pub(crate) use self::errors::ListenerError;
pub(crate) use self::handler::{
    ConnectionHandler, ConnectionStream, MAX_REQUEST_BYTES, read_request_line,
};
pub(crate) use self::listener::{ListenerHandle, SocketListener};

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
