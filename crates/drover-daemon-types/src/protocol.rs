//! Request and response envelopes carried over the daemon socket.
//!
//! Each connection carries one JSONL request. The daemon answers with a
//! single [`DaemonMessage::Result`] or [`DaemonMessage::Error`], except for
//! `subscribe`, which streams [`DaemonMessage::Event`] lines until the client
//! disconnects.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

use crate::event::BusEvent;

/// A request as received on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Method name, e.g. `restartProcessId`.
    pub method: String,
    /// Method payload; `null` when the method takes none.
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    /// Builds a request for a known method.
    #[must_use]
    pub fn new(method: RpcMethod, params: Value) -> Self {
        Self {
            method: method.to_string(),
            params,
        }
    }
}

/// Methods the daemon answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "camelCase")]
pub enum RpcMethod {
    /// Views of every record with sampled resource usage.
    GetMonitorData,
    /// Host CPU and memory figures plus daemon uptime.
    GetSystemData,
    /// Launches every instance of a descriptor.
    Prepare,
    /// Starts a stopped or errored record.
    StartProcessId,
    /// Stops a record.
    StopProcessId,
    /// Stops then starts a record.
    RestartProcessId,
    /// Hard reload handoff.
    ReloadProcessId,
    /// Soft reload handoff.
    SoftReloadProcessId,
    /// Stops and removes a record.
    DeleteProcessId,
    /// Launches one more instance from a record's descriptor.
    DuplicateProcessId,
    /// Zeroes restart counters.
    ResetMetaProcessId,
    /// Sends an OS signal to a record.
    SendSignalToProcessId,
    /// Sends an OS signal to every record of a name.
    SendSignalToProcessName,
    /// Writes a line to a record's stdin.
    SendLineToStdin,
    /// Sends topic-tagged data over a record's IPC channel.
    SendDataToProcessId,
    /// Sends a free-form message to one record or every record of a name.
    MsgProcess,
    /// Flips a record's filesystem watch.
    ToggleWatch,
    /// Enables a record's filesystem watch.
    StartWatch,
    /// Disables a record's filesystem watch.
    StopWatch,
    /// Reopens every log sink.
    ReloadLogs,
    /// Publishes an operator notification for a record.
    NotifyByProcessId,
    /// Daemon version string.
    GetVersion,
    /// Daemon summary.
    GetReport,
    /// Liveness probe.
    Ping,
    /// Shuts the daemon down.
    KillMe,
    /// Includes a record in resource sampling.
    Monitor,
    /// Excludes a record from resource sampling.
    Unmonitor,
    /// Identifiers sharing a name.
    GetProcessIdsByName,
    /// Identifiers sharing a namespace.
    GetProcessIdsByNamespace,
    /// Persists descriptors to the dump file.
    Dump,
    /// Replays the dump file.
    Resurrect,
    /// Stops every record of a name.
    StopProcessName,
    /// Restarts every record of a name.
    RestartProcessName,
    /// Deletes every record of a name.
    DeleteProcessName,
    /// Deletes every record.
    DeleteAll,
    /// Streams bus events.
    Subscribe,
}

/// Parameters naming one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdParams {
    /// Record identifier.
    pub id: u32,
}

/// Parameters for `restartProcessId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartParams {
    /// Record identifier.
    pub id: u32,
    /// Environment overrides merged into the stored descriptor.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Parameters for `sendSignalToProcessId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalParams {
    /// Record identifier.
    pub id: u32,
    /// Signal name such as `SIGUSR2`.
    pub signal: String,
}

/// Parameters for `sendSignalToProcessName`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameSignalParams {
    /// Application name.
    pub name: String,
    /// Signal name such as `SIGUSR2`.
    pub signal: String,
}

/// Parameters for `sendLineToStdin`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineParams {
    /// Record identifier.
    pub id: u32,
    /// Line to write; a newline is appended.
    pub line: String,
}

/// Parameters for `sendDataToProcessId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataParams {
    /// Record identifier.
    pub id: u32,
    /// Application-defined topic.
    pub topic: String,
    /// Arbitrary payload.
    #[serde(default)]
    pub data: Value,
}

/// Parameters for `msgProcess`; exactly one of `id` or `name` is expected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageParams {
    /// Target identifier.
    #[serde(default)]
    pub id: Option<u32>,
    /// Target application name.
    #[serde(default)]
    pub name: Option<String>,
    /// Message payload.
    #[serde(default)]
    pub msg: Value,
}

/// Parameters for `notifyByProcessId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyParams {
    /// Record identifier.
    pub id: u32,
    /// Notification text.
    pub message: String,
}

/// Parameters naming an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameParams {
    /// Application name.
    pub name: String,
}

/// Parameters naming a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceParams {
    /// Namespace name.
    pub namespace: String,
}

/// Parameters for `subscribe`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeParams {
    /// Topic prefixes to receive; all topics when empty.
    #[serde(default)]
    pub topics: Vec<String>,
}

/// Coarse classification of a failed request.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCategory {
    /// Invalid descriptor or parameters; never retried.
    Configuration,
    /// Unknown identifier or name.
    NotFound,
    /// The OS refused to create the process.
    Spawn,
    /// A bounded wait expired.
    Timeout,
    /// The restart limit was reached.
    Instability,
    /// The request conflicts with current state, e.g. a held reload lock.
    Conflict,
    /// Malformed request or unknown method.
    Protocol,
    /// Anything else.
    Internal,
}

/// A message-bearing error returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    /// Error classification.
    pub category: ErrorCategory,
    /// Human-readable description.
    pub message: String,
}

impl RpcError {
    /// Builds an error from a category and message.
    #[must_use]
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

/// A line written by the daemon in reply to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DaemonMessage {
    /// Successful outcome.
    Result {
        /// Method-specific payload.
        data: Value,
    },
    /// Failed outcome.
    Error {
        /// Error description.
        error: RpcError,
    },
    /// One bus event on a subscription stream.
    Event {
        /// The event.
        event: BusEvent,
    },
}
