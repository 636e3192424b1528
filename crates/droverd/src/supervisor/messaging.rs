//! Talking to running children: signals, stdin lines, channel data, operator
//! notifications, plus watch toggles and log reopening.

use drover_daemon_types::{BusEvent, ParentMessage, ProcessId, ProcessView};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::registry::ProcessRecord;
use super::{SUPERVISOR_TARGET, Supervisor, SupervisorError};
use crate::launcher::parse_signal;
use crate::launcher::hooks::LiveChild;

impl Supervisor {
    /// Delivers an OS signal to a record's child.
    pub fn send_signal(&self, id: u32, signal: &str) -> Result<(), SupervisorError> {
        let parsed = parse_signal(signal).ok_or_else(|| SupervisorError::InvalidSignal {
            signal: signal.to_owned(),
        })?;
        let registry = self.registry();
        let child = live_child(registry.primary(id)?)?;
        child
            .signaller
            .signal(parsed)
            .map_err(|_| SupervisorError::NotRunning { id })?;
        info!(target: SUPERVISOR_TARGET, id, %signal, "signal delivered");
        Ok(())
    }

    /// Delivers an OS signal to every running record of `name` and returns
    /// the identifiers reached.
    pub fn send_signal_to_name(&self, name: &str, signal: &str) -> Result<Vec<u32>, SupervisorError> {
        if parse_signal(signal).is_none() {
            return Err(SupervisorError::InvalidSignal {
                signal: signal.to_owned(),
            });
        }
        let ids = self.ids_by_name(name);
        if ids.is_empty() {
            return Err(SupervisorError::unknown_name(name));
        }
        Ok(ids
            .into_iter()
            .filter(|id| match self.send_signal(*id, signal) {
                Ok(()) => true,
                Err(error) => {
                    debug!(target: SUPERVISOR_TARGET, id, %error, "signal skipped");
                    false
                }
            })
            .collect())
    }

    /// Writes `line` plus a newline to a record's stdin.
    pub fn send_line_to_stdin(&self, id: u32, line: &str) -> Result<(), SupervisorError> {
        let registry = self.registry();
        let child = live_child(registry.primary(id)?)?;
        let stdin = child
            .stdin
            .as_ref()
            .ok_or(SupervisorError::NotRunning { id })?;
        stdin
            .send(line.to_owned())
            .map_err(|_| SupervisorError::NotRunning { id })
    }

    /// Sends topic-tagged data over a record's IPC channel.
    pub fn send_data(&self, id: u32, topic: String, data: Value) -> Result<(), SupervisorError> {
        self.send_to_channel(id, ParentMessage::Data { topic, data })
    }

    /// Sends a free-form message to one record, or to every record of
    /// `name`. Returns how many children received it.
    pub fn msg_process(
        &self,
        id: Option<u32>,
        name: Option<&str>,
        payload: &Value,
    ) -> Result<usize, SupervisorError> {
        let ids = match (id, name) {
            (Some(single), _) => vec![single],
            (None, Some(name)) => {
                let ids = self.ids_by_name(name);
                if ids.is_empty() {
                    return Err(SupervisorError::unknown_name(name));
                }
                ids
            }
            (None, None) => {
                return Err(SupervisorError::configuration(
                    "msgProcess needs an id or a name",
                ));
            }
        };
        let strict = id.is_some();
        let mut delivered = 0;
        for target in ids {
            let message = ParentMessage::Message {
                payload: payload.clone(),
            };
            match self.send_to_channel(target, message) {
                Ok(()) => delivered += 1,
                Err(error) if strict => return Err(error),
                Err(error) => debug!(target: SUPERVISOR_TARGET, id = target, %error, "message skipped"),
            }
        }
        Ok(delivered)
    }

    fn send_to_channel(&self, id: u32, message: ParentMessage) -> Result<(), SupervisorError> {
        let registry = self.registry();
        let child = live_child(registry.primary(id)?)?;
        let channel = child
            .channel
            .as_ref()
            .ok_or(SupervisorError::NoChannel { id })?;
        channel
            .send(message)
            .map_err(|_| SupervisorError::NotRunning { id })
    }

    /// Publishes an operator notification about a record.
    pub fn notify(&self, id: u32, message: String) -> Result<(), SupervisorError> {
        let process = self.registry().primary(id)?.process_ref();
        self.bus
            .publish(BusEvent::notification(self.clock.now_ms(), process, message));
        Ok(())
    }

    /// Flips a record's filesystem watch.
    pub fn toggle_watch(&self, id: u32) -> Result<ProcessView, SupervisorError> {
        if self.registry().primary(id)?.watching {
            self.stop_watch(id)
        } else {
            self.start_watch(id)
        }
    }

    /// Enables a record's filesystem watch.
    pub fn start_watch(&self, id: u32) -> Result<ProcessView, SupervisorError> {
        let descriptor = self.registry().primary(id)?.descriptor.clone();
        self.watchers.enable(id, &descriptor)?;
        self.set_watching(id, true)
    }

    /// Disables a record's filesystem watch.
    pub fn stop_watch(&self, id: u32) -> Result<ProcessView, SupervisorError> {
        self.watchers.disable(id);
        self.set_watching(id, false)
    }

    fn set_watching(&self, id: u32, watching: bool) -> Result<ProcessView, SupervisorError> {
        let mut registry = self.registry();
        let record = registry.primary_mut(id)?;
        record.watching = watching;
        info!(target: SUPERVISOR_TARGET, id, watching, "watch toggled");
        Ok(record.view())
    }

    /// Reopens every log sink so rotated files are recreated. Returns how
    /// many records were reopened.
    pub fn reload_logs(&self) -> usize {
        let registry = self.registry();
        let mut reopened = 0;
        for record in registry.records() {
            let Some(logs) = &record.logs else {
                continue;
            };
            match logs.reopen() {
                Ok(()) => reopened += 1,
                Err(error) => warn!(
                    target: SUPERVISOR_TARGET,
                    id = record.id(),
                    %error,
                    "failed to reopen logs"
                ),
            }
        }
        info!(target: SUPERVISOR_TARGET, reopened, "logs reopened");
        reopened
    }
}

fn live_child(record: &ProcessRecord) -> Result<&LiveChild, SupervisorError> {
    match (&record.key, &record.child) {
        (ProcessId::Primary(_), Some(child)) if record.status.is_running() => Ok(child),
        _ => Err(SupervisorError::NotRunning { id: record.id() }),
    }
}
