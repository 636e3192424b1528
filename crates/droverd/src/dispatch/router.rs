//! Method routing for request dispatch.
//!
//! Every RPC method maps onto one supervisor operation. Parameters are
//! deserialized into the typed structs from `drover_daemon_types`; results
//! are serialized back into JSON for the response line.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;

use drover_daemon_types::{
    AppDescriptor, DataParams, IdParams, LineParams, MessageParams, NameParams,
    NameSignalParams, NamespaceParams, NotifyParams, RestartParams, RpcMethod, SignalParams,
    SubscribeParams,
};

use crate::supervisor::{ReloadMode, Supervisor};

use super::DISPATCH_TARGET;
use super::errors::DispatchError;
use super::request::params;

/// What the connection handler should do after routing.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Routed {
    /// Write the payload and close.
    Reply(Value),
    /// Write the payload, close, then begin daemon shutdown.
    Shutdown(Value),
    /// Keep the connection open and stream events matching these prefixes.
    Subscribe(Vec<String>),
}

/// Routes requests to supervisor operations.
#[derive(Debug, Clone)]
pub(crate) struct MethodRouter {
    supervisor: Arc<Supervisor>,
    socket: String,
}

impl MethodRouter {
    /// `socket` is the endpoint reported by `getReport`.
    pub(crate) fn new(supervisor: Arc<Supervisor>, socket: String) -> Self {
        Self { supervisor, socket }
    }

    /// Routes one request.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::InvalidParams` if the parameters do not match
    /// the method, or `DispatchError::Supervisor` if the operation fails.
    pub(crate) async fn route(
        &self,
        method: RpcMethod,
        raw: Value,
    ) -> Result<Routed, DispatchError> {
        debug!(target: DISPATCH_TARGET, %method, "routing request");
        let supervisor = &self.supervisor;
        let data = match method {
            RpcMethod::Subscribe => {
                let SubscribeParams { topics } = params(method, raw)?;
                return Ok(Routed::Subscribe(topics));
            }
            RpcMethod::KillMe => return Ok(Routed::Shutdown(json!({ "success": true }))),
            RpcMethod::Ping => json!({ "pong": true }),
            RpcMethod::GetVersion => json!(env!("CARGO_PKG_VERSION")),
            RpcMethod::GetReport => encode(&supervisor.report(&self.socket))?,
            RpcMethod::GetMonitorData => encode(&supervisor.get_monitor_data())?,
            RpcMethod::GetSystemData => encode(&supervisor.get_system_data())?,
            RpcMethod::Prepare => {
                let descriptor: AppDescriptor = params(method, raw)?;
                encode(&supervisor.prepare(descriptor).await?)?
            }
            RpcMethod::StartProcessId => {
                let IdParams { id } = params(method, raw)?;
                encode(&supervisor.start_process(id).await?)?
            }
            RpcMethod::StopProcessId => {
                let IdParams { id } = params(method, raw)?;
                encode(&supervisor.stop_process(id).await?)?
            }
            RpcMethod::RestartProcessId => {
                let RestartParams { id, env } = params(method, raw)?;
                encode(&supervisor.restart_process(id, env).await?)?
            }
            RpcMethod::ReloadProcessId => {
                let IdParams { id } = params(method, raw)?;
                encode(&supervisor.reload(id, ReloadMode::Hard).await?)?
            }
            RpcMethod::SoftReloadProcessId => {
                let IdParams { id } = params(method, raw)?;
                encode(&supervisor.reload(id, ReloadMode::Soft).await?)?
            }
            RpcMethod::DeleteProcessId => {
                let IdParams { id } = params(method, raw)?;
                encode(&supervisor.delete_process(id).await?)?
            }
            RpcMethod::DuplicateProcessId => {
                let IdParams { id } = params(method, raw)?;
                encode(&supervisor.duplicate_process(id).await?)?
            }
            RpcMethod::ResetMetaProcessId => {
                let IdParams { id } = params(method, raw)?;
                encode(&supervisor.reset_meta(id).await?)?
            }
            RpcMethod::SendSignalToProcessId => {
                let SignalParams { id, signal } = params(method, raw)?;
                supervisor.send_signal(id, &signal)?;
                success()
            }
            RpcMethod::SendSignalToProcessName => {
                let NameSignalParams { name, signal } = params(method, raw)?;
                encode(&supervisor.send_signal_to_name(&name, &signal)?)?
            }
            RpcMethod::SendLineToStdin => {
                let LineParams { id, line } = params(method, raw)?;
                supervisor.send_line_to_stdin(id, &line)?;
                success()
            }
            RpcMethod::SendDataToProcessId => {
                let DataParams { id, topic, data } = params(method, raw)?;
                supervisor.send_data(id, topic, data)?;
                success()
            }
            RpcMethod::MsgProcess => {
                let MessageParams { id, name, msg } = params(method, raw)?;
                let delivered = supervisor.msg_process(id, name.as_deref(), &msg)?;
                json!({ "delivered": delivered })
            }
            RpcMethod::NotifyByProcessId => {
                let NotifyParams { id, message } = params(method, raw)?;
                supervisor.notify(id, message)?;
                success()
            }
            RpcMethod::ToggleWatch => {
                let IdParams { id } = params(method, raw)?;
                encode(&supervisor.toggle_watch(id)?)?
            }
            RpcMethod::StartWatch => {
                let IdParams { id } = params(method, raw)?;
                encode(&supervisor.start_watch(id)?)?
            }
            RpcMethod::StopWatch => {
                let IdParams { id } = params(method, raw)?;
                encode(&supervisor.stop_watch(id)?)?
            }
            RpcMethod::ReloadLogs => json!({ "reopened": supervisor.reload_logs() }),
            RpcMethod::Monitor => {
                let IdParams { id } = params(method, raw)?;
                encode(&supervisor.monitor(id)?)?
            }
            RpcMethod::Unmonitor => {
                let IdParams { id } = params(method, raw)?;
                encode(&supervisor.unmonitor(id)?)?
            }
            RpcMethod::GetProcessIdsByName => {
                let NameParams { name } = params(method, raw)?;
                encode(&supervisor.ids_by_name(&name))?
            }
            RpcMethod::GetProcessIdsByNamespace => {
                let NamespaceParams { namespace } = params(method, raw)?;
                encode(&supervisor.ids_by_namespace(&namespace))?
            }
            RpcMethod::Dump => json!({ "count": supervisor.dump()? }),
            RpcMethod::Resurrect => encode(&supervisor.resurrect().await?)?,
            RpcMethod::StopProcessName => {
                let NameParams { name } = params(method, raw)?;
                encode(&supervisor.stop_process_name(&name).await?)?
            }
            RpcMethod::RestartProcessName => {
                let NameParams { name } = params(method, raw)?;
                encode(&supervisor.restart_process_name(&name).await?)?
            }
            RpcMethod::DeleteProcessName => {
                let NameParams { name } = params(method, raw)?;
                encode(&supervisor.delete_process_name(&name).await?)?
            }
            RpcMethod::DeleteAll => encode(&supervisor.delete_all().await?)?,
        };
        Ok(Routed::Reply(data))
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Value, DispatchError> {
    Ok(serde_json::to_value(value)?)
}

fn success() -> Value {
    json!({ "success": true })
}

#[cfg(test)]
mod tests;
