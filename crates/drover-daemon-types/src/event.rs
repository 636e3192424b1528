use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

/// Identifies the process an event concerns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRef {
    /// Numeric identifier.
    pub pm_id: u32,
    /// Application name.
    pub name: String,
    /// Application namespace.
    pub namespace: String,
    /// Whether the event concerns the outgoing instance of a reload.
    #[serde(default)]
    pub shadow: bool,
}

/// Lifecycle transitions published on `process:event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LifecycleEvent {
    /// A launch was requested.
    Start,
    /// The process is online.
    Online,
    /// The process sent its ready message.
    Ready,
    /// The process exited.
    Exit,
    /// The process was stopped.
    Stop,
    /// The record was deleted.
    Delete,
    /// The process was restarted.
    Restart,
    /// A reload handoff completed.
    Reload,
    /// The restart limit was reached.
    RestartOverlimit,
    /// Spawning or supervising the process failed.
    Error,
    /// A cron job fired.
    CronFired,
    /// The child reported its runtime version.
    RuntimeVersion,
}

/// Captured output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LogStream {
    /// Standard output.
    Out,
    /// Standard error.
    Err,
}

/// Event payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventBody {
    /// A lifecycle transition.
    Lifecycle {
        /// Transition kind.
        event: LifecycleEvent,
        /// Optional detail such as an exit code or error message.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<Value>,
    },
    /// A message a child sent over its IPC channel.
    Message {
        /// Channel the message was routed to.
        kind: String,
        /// Message payload.
        payload: Value,
    },
    /// One line of captured output.
    Log {
        /// Stream the line came from.
        stream: LogStream,
        /// Line without its trailing newline.
        line: String,
    },
    /// An operator notification raised through `notifyByProcessId`.
    Notification {
        /// Notification text.
        message: String,
    },
}

/// One entry on the daemon's publish/subscribe bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEvent {
    /// Channel name used for subscription filtering.
    pub topic: String,
    /// Milliseconds since the Unix epoch.
    pub at: u64,
    /// Concerned process, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessRef>,
    /// Event payload.
    pub body: EventBody,
}

impl BusEvent {
    /// Topic for lifecycle transitions.
    pub const PROCESS_EVENT: &'static str = "process:event";
    /// Topic for opaque child messages.
    pub const PROCESS_MSG: &'static str = "process:msg";
    /// Topic for operator notifications.
    pub const PROCESS_NOTIFY: &'static str = "process:notify";
    /// Topic for captured stdout.
    pub const LOG_OUT: &'static str = "log:out";
    /// Topic for captured stderr.
    pub const LOG_ERR: &'static str = "log:err";

    /// Builds a lifecycle event.
    #[must_use]
    pub fn lifecycle(
        at: u64,
        process: ProcessRef,
        event: LifecycleEvent,
        detail: Option<Value>,
    ) -> Self {
        Self {
            topic: Self::PROCESS_EVENT.to_owned(),
            at,
            process: Some(process),
            body: EventBody::Lifecycle { event, detail },
        }
    }

    /// Builds a child message event; opaque messages use `process:msg`.
    #[must_use]
    pub fn message(at: u64, process: ProcessRef, kind: Option<String>, payload: Value) -> Self {
        let topic = kind.clone().unwrap_or_else(|| Self::PROCESS_MSG.to_owned());
        Self {
            topic,
            at,
            process: Some(process),
            body: EventBody::Message {
                kind: kind.unwrap_or_else(|| Self::PROCESS_MSG.to_owned()),
                payload,
            },
        }
    }

    /// Builds a log line event.
    #[must_use]
    pub fn log(at: u64, process: ProcessRef, stream: LogStream, line: String) -> Self {
        let topic = match stream {
            LogStream::Out => Self::LOG_OUT,
            LogStream::Err => Self::LOG_ERR,
        };
        Self {
            topic: topic.to_owned(),
            at,
            process: Some(process),
            body: EventBody::Log { stream, line },
        }
    }

    /// Builds an operator notification event.
    #[must_use]
    pub fn notification(at: u64, process: ProcessRef, message: String) -> Self {
        Self {
            topic: Self::PROCESS_NOTIFY.to_owned(),
            at,
            process: Some(process),
            body: EventBody::Notification { message },
        }
    }

    /// Whether the event matches any of the topic prefixes; an empty filter
    /// matches everything.
    #[must_use]
    pub fn matches(&self, prefixes: &[String]) -> bool {
        prefixes.is_empty()
            || prefixes
                .iter()
                .any(|prefix| self.topic.starts_with(prefix.trim_end_matches('*')))
    }

    /// The lifecycle transition carried, if any.
    #[must_use]
    pub const fn lifecycle_event(&self) -> Option<LifecycleEvent> {
        match &self.body {
            EventBody::Lifecycle { event, .. } => Some(*event),
            _ => None,
        }
    }
}
