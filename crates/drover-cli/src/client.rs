//! Blocking RPC client for `droverd`.
//!
//! Every call opens a fresh connection, writes one JSONL request and reads one
//! reply. When nothing listens on the socket the client launches the daemon,
//! waits for its `ready` snapshot and replays the call once.

use std::ffi::OsString;
use std::io::{BufRead, BufReader, Write};
use std::time::Duration;

use drover_config::Config;
use drover_daemon_types::{BusEvent, DaemonMessage, RpcMethod, RpcRequest, SubscribeParams};
use serde_json::{Value, json};

use crate::errors::{ClientError, is_daemon_not_running};
use crate::lifecycle::{LifecycleContext, start_daemon};
use crate::transport::{Connection, connect};

/// How long a liveness ping waits for the daemon to answer.
pub const PING_TIMEOUT: Duration = Duration::from_millis(500);

/// Client handle bound to one daemon endpoint.
#[derive(Debug, Clone)]
pub struct DaemonClient {
    config: Config,
    config_arguments: Vec<OsString>,
    daemon_binary: Option<OsString>,
    auto_start: bool,
}

impl DaemonClient {
    /// Creates a client for the endpoint in `config`, with auto-start on.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            config_arguments: vec![OsString::from("drover")],
            daemon_binary: None,
            auto_start: true,
        }
    }

    /// Sets the program name and configuration flags forwarded to a daemon
    /// this client launches.
    #[must_use]
    pub fn with_config_arguments(mut self, arguments: Vec<OsString>) -> Self {
        self.config_arguments = arguments;
        self
    }

    /// Launches this binary instead of `DROVER_DAEMON_BIN` or `droverd`.
    #[must_use]
    pub fn with_daemon_binary(mut self, binary: impl Into<OsString>) -> Self {
        self.daemon_binary = Some(binary.into());
        self
    }

    /// Fails calls instead of launching a missing daemon.
    #[must_use]
    pub const fn without_auto_start(mut self) -> Self {
        self.auto_start = false;
        self
    }

    /// Configuration the client was built with.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Sends one request and returns the daemon's result payload.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Rpc`] when the daemon refuses the call, and a
    /// transport or decode variant when the exchange itself fails.
    pub fn call(&self, method: RpcMethod, params: Value) -> Result<Value, ClientError> {
        let request = RpcRequest::new(method, params);
        let connection = self.connect_or_launch()?;
        let mut reader = send(connection, &request)?;
        match read_message(&mut reader)? {
            Some(DaemonMessage::Result { data }) => Ok(data),
            Some(DaemonMessage::Error { error }) => Err(ClientError::Rpc(error)),
            Some(DaemonMessage::Event { .. }) => Err(ClientError::UnexpectedEvent),
            None => Err(ClientError::MissingReply),
        }
    }

    /// Returns whether a daemon answers `ping` within `timeout`.
    ///
    /// Never launches the daemon.
    #[must_use]
    pub fn ping(&self, timeout: Duration) -> bool {
        let Ok(connection) = connect(self.config.daemon_socket()) else {
            return false;
        };
        if connection.set_read_timeout(Some(timeout)).is_err() {
            return false;
        }
        let request = RpcRequest::new(RpcMethod::Ping, Value::Null);
        let Ok(mut reader) = send(connection, &request) else {
            return false;
        };
        matches!(
            read_message(&mut reader),
            Ok(Some(DaemonMessage::Result { data })) if data == json!({ "pong": true })
        )
    }

    /// Opens an event stream filtered by topic prefix.
    ///
    /// An empty `topics` list follows every topic.
    ///
    /// # Errors
    ///
    /// Returns a transport variant when the subscription cannot be sent.
    pub fn subscribe(&self, topics: &[String]) -> Result<EventStream, ClientError> {
        let params = serde_json::to_value(SubscribeParams {
            topics: topics.to_vec(),
        })
        .map_err(ClientError::SerialiseRequest)?;
        let request = RpcRequest::new(RpcMethod::Subscribe, params);
        let connection = self.connect_or_launch()?;
        let reader = send(connection, &request)?;
        Ok(EventStream {
            reader,
            finished: false,
        })
    }

    fn connect_or_launch(&self) -> Result<Connection, ClientError> {
        let endpoint = self.config.daemon_socket();
        match connect(endpoint) {
            Ok(connection) => Ok(connection),
            Err(error) if self.auto_start && is_daemon_not_running(&error) => {
                self.launch()?;
                connect(endpoint)
            }
            Err(error) => Err(error),
        }
    }

    fn launch(&self) -> Result<(), ClientError> {
        // Another client may have launched it in the meantime.
        if self.ping(PING_TIMEOUT) {
            return Ok(());
        }
        let context = LifecycleContext {
            config: &self.config,
            config_arguments: &self.config_arguments,
            daemon_binary: self.daemon_binary.as_deref(),
        };
        start_daemon(context)
            .map(|_| ())
            .map_err(|error| ClientError::AutoStart(Box::new(error)))
    }
}

fn send(
    mut connection: Connection,
    request: &RpcRequest,
) -> Result<BufReader<Connection>, ClientError> {
    let mut line = serde_json::to_vec(request).map_err(ClientError::SerialiseRequest)?;
    line.push(b'\n');
    connection
        .write_all(&line)
        .and_then(|()| connection.flush())
        .map_err(ClientError::SendRequest)?;
    Ok(BufReader::new(connection))
}

/// Reads the next non-blank line as a daemon message; EOF is `Ok(None)`.
fn read_message<R: BufRead>(reader: &mut R) -> Result<Option<DaemonMessage>, ClientError> {
    let mut line = String::new();
    loop {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .map_err(ClientError::ReadResponse)?;
        if read == 0 {
            return Ok(None);
        }
        if line.trim().is_empty() {
            continue;
        }
        return serde_json::from_str(line.trim_end())
            .map(Some)
            .map_err(ClientError::ParseMessage);
    }
}

/// Bus events streamed from a `subscribe` connection.
///
/// Ends when the daemon closes the connection. A daemon error ends the
/// stream after being yielded once.
#[derive(Debug)]
pub struct EventStream {
    reader: BufReader<Connection>,
    finished: bool,
}

impl Iterator for EventStream {
    type Item = Result<BusEvent, ClientError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let item = match read_message(&mut self.reader) {
            Ok(Some(DaemonMessage::Event { event })) => return Some(Ok(event)),
            Ok(None) => {
                self.finished = true;
                return None;
            }
            Ok(Some(DaemonMessage::Error { error })) => Err(ClientError::Rpc(error)),
            Ok(Some(DaemonMessage::Result { .. })) => Err(ClientError::UnexpectedReply),
            Err(error) => Err(error),
        };
        self.finished = true;
        Some(item)
    }
}
