//! Types shared between `droverd` and its clients.
//!
//! Everything that crosses the daemon socket or the child IPC channel lives
//! here: application descriptors, the status enum, tagged process
//! identifiers, the RPC envelopes, bus events and read-only process views.

mod descriptor;
mod event;
mod id;
mod message;
mod protocol;
mod status;
mod view;

pub use descriptor::{AppDescriptor, DescriptorError, ExecMode, WatchConfig};
pub use event::{BusEvent, EventBody, LifecycleEvent, LogStream, ProcessRef};
pub use id::ProcessId;
pub use message::{ChildMessage, ParentMessage};
pub use protocol::{
    DaemonMessage, DataParams, ErrorCategory, IdParams, LineParams, MessageParams,
    NameParams, NameSignalParams, NamespaceParams, NotifyParams, RestartParams, RpcError,
    RpcMethod, RpcRequest, SignalParams, SubscribeParams,
};
pub use status::ProcessStatus;
pub use view::{DaemonReport, Monit, ProcessMeta, ProcessView, SystemData};
