use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle status of a managed process.
///
/// `Launching -> Online -> {Stopping -> Stopped, Errored}`; `Stopped` returns
/// to `Launching` on restart and `WaitingRestart` labels a pending delayed
/// restart.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProcessStatus {
    /// Spawned, not yet reported online.
    Launching,
    /// Running and online.
    Online,
    /// An explicit stop is in progress.
    Stopping,
    /// Not running.
    Stopped,
    /// Halted after reaching the restart limit or failing to spawn.
    Errored,
    /// Exited; an automatic restart is scheduled.
    WaitingRestart,
}

impl ProcessStatus {
    /// Whether an OS process is expected to be alive.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Launching | Self::Online | Self::Stopping)
    }

    /// Whether a stop request has anything to do.
    #[must_use]
    pub const fn is_stoppable(self) -> bool {
        matches!(self, Self::Launching | Self::Online | Self::WaitingRestart)
    }
}
