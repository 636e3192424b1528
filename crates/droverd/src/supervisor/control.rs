//! Events consumed by the supervisor's control loop.

use std::sync::Weak;

use drover_daemon_types::ChildMessage;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{SUPERVISOR_TARGET, Supervisor};
use crate::launcher::ExitOutcome;

/// Something a child did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ChildEvent {
    /// A line arrived on the IPC channel.
    Message(ChildMessage),
    /// `listen_timeout` elapsed without a ready message.
    ReadyTimeout,
    /// The child exited.
    Exited(ExitOutcome),
}

/// Inputs to the control loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ControlEvent {
    /// Notice from the hooks of the launch identified by `launch`.
    Child { launch: u64, event: ChildEvent },
    /// A watched path of `name` changed.
    WatchTriggered { name: String },
    /// The cron job of process `id` fired.
    CronFired { id: u32 },
}

/// Applies control events in arrival order until the supervisor is dropped.
pub(crate) async fn run_control_loop(
    supervisor: Weak<Supervisor>,
    mut events: UnboundedReceiver<ControlEvent>,
    closed: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = closed.cancelled() => break,
            event = events.recv() => event,
        };
        let Some(event) = event else {
            break;
        };
        let Some(supervisor) = supervisor.upgrade() else {
            break;
        };
        supervisor.apply(event);
    }
    debug!(target: SUPERVISOR_TARGET, "control loop finished");
}
