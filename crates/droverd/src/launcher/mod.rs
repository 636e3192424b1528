//! Launch strategies behind one [`Launcher`] interface.
//!
//! A launcher turns a [`LaunchRequest`] into a running child and hands back a
//! uniform [`SpawnedChild`]: the pid, its piped standard streams, an optional
//! JSONL IPC channel, a future resolving on exit and a [`Signaller`]. What
//! happens to those pieces afterwards is shared by both strategies and lives
//! in [`hooks`].
//!
//! The independent strategy spawns one ordinary subprocess per instance. The
//! worker-group strategy additionally hands every sibling the same listening
//! socket so the kernel balances accepted connections between them.

mod channel;
mod command;
mod env;
mod errors;
pub(crate) mod hooks;
mod independent;
mod signal;
mod worker_group;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use drover_daemon_types::{AppDescriptor, ExecMode};
use futures::future::BoxFuture;
use nix::sys::signal::Signal;
use tokio::io::{AsyncRead, AsyncWrite};

pub(crate) use self::env::build_environment;
pub use self::errors::SpawnError;
pub use self::independent::IndependentLauncher;
pub(crate) use self::signal::{PidSignaller, parse_signal};
pub use self::worker_group::WorkerGroupLauncher;

pub(crate) const LAUNCHER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::launcher");

/// Descriptor on which the IPC channel is installed in the child.
pub const CHANNEL_FD: i32 = 3;
/// Descriptor on which worker-group children find the shared socket.
pub const LISTEN_FD: i32 = 4;

/// Boxed readable half handed to the hook tasks.
pub type ChildReader = Box<dyn AsyncRead + Send + Unpin>;
/// Boxed writable half handed to the hook tasks.
pub type ChildWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Everything a launcher needs to start one instance.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    /// Identifier of the record being launched.
    pub id: u32,
    /// Per-instance ordinal.
    pub instance: u32,
    /// Resolved descriptor.
    pub descriptor: AppDescriptor,
    /// Variables layered over the daemon's environment.
    pub env: BTreeMap<String, String>,
}

/// How a child terminated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitOutcome {
    /// Exit code when the child exited normally.
    pub code: Option<i32>,
    /// Terminating signal number.
    pub signal: Option<i32>,
}

impl ExitOutcome {
    /// A normal exit with `code`.
    #[must_use]
    pub const fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    /// Termination by `signal`.
    #[must_use]
    pub const fn signalled(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }
}

impl From<std::process::ExitStatus> for ExitOutcome {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            Self {
                code: status.code(),
                signal: status.signal(),
            }
        }
        #[cfg(not(unix))]
        {
            Self {
                code: status.code(),
                signal: None,
            }
        }
    }
}

/// Delivers signals to a running child.
pub trait Signaller: Send + Sync + fmt::Debug {
    /// Sends `signal` to the child only.
    fn signal(&self, signal: Signal) -> std::io::Result<()>;

    /// Sends `signal` to the child's whole process group.
    fn signal_tree(&self, signal: Signal) -> std::io::Result<()>;
}

/// Bidirectional JSONL channel to a child.
pub struct ChildChannel {
    /// Lines written by the child.
    pub reader: ChildReader,
    /// Lines destined for the child.
    pub writer: ChildWriter,
}

/// A freshly started child and the handles used to supervise it.
pub struct SpawnedChild {
    /// OS process id.
    pub pid: u32,
    /// Captured standard output.
    pub stdout: Option<ChildReader>,
    /// Captured standard error.
    pub stderr: Option<ChildReader>,
    /// Writable standard input.
    pub stdin: Option<ChildWriter>,
    /// IPC channel, when the child was given one.
    pub channel: Option<ChildChannel>,
    /// Resolves once the child has exited and been reaped.
    pub exit: BoxFuture<'static, ExitOutcome>,
    /// Signal delivery handle.
    pub signaller: Arc<dyn Signaller>,
}

impl fmt::Debug for SpawnedChild {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SpawnedChild")
            .field("pid", &self.pid)
            .field("channel", &self.channel.is_some())
            .finish_non_exhaustive()
    }
}

/// Strategy that creates OS processes.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Starts one instance.
    async fn launch(&self, request: &LaunchRequest) -> Result<SpawnedChild, SpawnError>;

    /// Drops resources held for an application once its last record is gone.
    fn release(&self, _name: &str) {}
}

/// The launcher used for each exec mode.
#[derive(Clone)]
pub struct Launchers {
    independent: Arc<dyn Launcher>,
    worker_group: Arc<dyn Launcher>,
}

impl Launchers {
    /// Builds the production launchers.
    #[must_use]
    pub fn system() -> Self {
        Self {
            independent: Arc::new(IndependentLauncher::new()),
            worker_group: Arc::new(WorkerGroupLauncher::new()),
        }
    }

    /// Uses one launcher for every mode.
    #[must_use]
    pub fn uniform(launcher: Arc<dyn Launcher>) -> Self {
        Self {
            independent: Arc::clone(&launcher),
            worker_group: launcher,
        }
    }

    pub(crate) fn for_mode(&self, mode: ExecMode) -> &Arc<dyn Launcher> {
        match mode {
            ExecMode::Independent => &self.independent,
            ExecMode::WorkerGroup => &self.worker_group,
        }
    }
}

impl fmt::Debug for Launchers {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("Launchers").finish_non_exhaustive()
    }
}
