//! JSONL request dispatch for the daemon socket.
//!
//! Clients send a single JSONL request per connection:
//!
//! ```json
//! {"method":"restartProcessId","params":{"id":3}}
//! ```
//!
//! The daemon answers with exactly one line, either a result or an error:
//!
//! ```json
//! {"kind":"result","data":{"pm_id":3,"status":"online"}}
//! {"kind":"error","error":{"category":"not_found","message":"unknown process id 3"}}
//! ```
//!
//! `subscribe` is the exception: the connection stays open and every
//! matching bus event is written as `{"kind":"event","event":{...}}` until
//! the client hangs up.

mod errors;
mod handler;
mod request;
mod response;
mod router;

pub(crate) use self::handler::DispatchConnectionHandler;

/// Tracing target for dispatch operations.
pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");
