//! Messages exchanged with children over the IPC channel.
//!
//! Children write one JSON value per line. A `{"kind": ..., "payload": ...}`
//! object is routed by its kind; a bare control token (`ready`, `cron-fired`,
//! `runtime-version:<v>`) or the JSON string of one is recognised as such;
//! anything else becomes an opaque message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

const READY: &str = "ready";
const CRON_FIRED: &str = "cron-fired";
const RUNTIME_VERSION: &str = "runtime-version";

/// A message received from a child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildMessage {
    /// The child finished initialising and accepts work.
    Ready,
    /// The child's own scheduler fired.
    CronFired,
    /// The child reported the runtime version it runs under.
    RuntimeVersion {
        /// Reported version string.
        version: String,
    },
    /// An application message routed to the bus channel named by `kind`.
    Custom {
        /// Bus channel name.
        kind: String,
        /// Arbitrary payload.
        payload: Value,
    },
    /// A line that matched nothing else.
    Opaque {
        /// The raw line.
        raw: String,
    },
}

impl ChildMessage {
    /// Classifies one line read from a child's channel.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Object(mut object)) => {
                let kind = object
                    .get("kind")
                    .and_then(Value::as_str)
                    .map(str::to_owned);
                let payload = object.remove("payload").unwrap_or(Value::Null);
                match kind {
                    Some(kind) => Self::from_kind(kind, payload),
                    None => Self::opaque(trimmed),
                }
            }
            Ok(Value::String(token)) => Self::from_token(&token).unwrap_or(Self::Opaque { raw: token }),
            Ok(_) => Self::opaque(trimmed),
            Err(_) => Self::from_token(trimmed).unwrap_or_else(|| Self::opaque(trimmed)),
        }
    }

    fn from_kind(kind: String, payload: Value) -> Self {
        match kind.as_str() {
            READY => Self::Ready,
            CRON_FIRED => Self::CronFired,
            RUNTIME_VERSION => Self::RuntimeVersion {
                version: version_from_payload(&payload),
            },
            _ => Self::Custom { kind, payload },
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            READY => Some(Self::Ready),
            CRON_FIRED => Some(Self::CronFired),
            _ => token
                .strip_prefix(RUNTIME_VERSION)
                .and_then(|rest| rest.strip_prefix(':'))
                .map(|version| Self::RuntimeVersion {
                    version: version.trim().to_owned(),
                }),
        }
    }

    fn opaque(raw: &str) -> Self {
        Self::Opaque {
            raw: raw.to_owned(),
        }
    }
}

fn version_from_payload(payload: &Value) -> String {
    match payload {
        Value::String(version) => version.clone(),
        Value::Object(object) => object
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        _ => String::new(),
    }
}

/// A message the daemon sends to a child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParentMessage {
    /// Finish in-flight work and exit; sent to the outgoing instance of a
    /// soft reload.
    Shutdown,
    /// Topic-tagged data from `sendDataToProcessId`.
    Data {
        /// Application-defined topic.
        topic: String,
        /// Arbitrary payload.
        data: Value,
    },
    /// Free-form message from `msgProcess`.
    Message {
        /// Arbitrary payload.
        payload: Value,
    },
}
