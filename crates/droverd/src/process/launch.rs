//! Supervises daemon launch sequencing and runtime orchestration.

use std::env;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use drover_config::{Config, RuntimePaths};

use crate::bootstrap::{ConfigLoader, StaticConfigLoader, SystemConfigLoader, bootstrap_with};
use crate::dispatch::DispatchConnectionHandler;
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::launcher::Launchers;
use crate::transport::SocketListener;

use super::daemonizer::{Daemonizer, SystemDaemonizer};
use super::errors::LaunchError;
use super::guard::{HealthState, ProcessGuard};
use super::shutdown::{ShutdownSignal, SystemShutdownSignal};
use super::{FOREGROUND_ENV_VAR, PROCESS_TARGET, SHUTDOWN_TIMEOUT};

/// Launch mode for the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Fork into the background and detach from the controlling terminal.
    Background,
    /// Remain attached to the terminal; primarily used for debugging and tests.
    Foreground,
}

impl LaunchMode {
    fn detect() -> Self {
        if env::var_os(FOREGROUND_ENV_VAR).is_some() {
            Self::Foreground
        } else {
            Self::Background
        }
    }
}

/// Process-level collaborators needed to control daemon lifecycle.
pub(crate) struct ProcessControl<D, S> {
    pub(crate) mode: LaunchMode,
    pub(crate) daemonizer: D,
    pub(crate) shutdown: S,
}

/// Service dependencies required to construct the daemon runtime.
pub(crate) struct ServiceDeps<L> {
    pub(crate) loader: L,
    pub(crate) reporter: Arc<dyn HealthReporter>,
    pub(crate) launchers: Launchers,
}

/// Collaborators required to launch the daemon runtime.
pub(crate) struct LaunchPlan<L, D, S> {
    pub(crate) process: ProcessControl<D, S>,
    pub(crate) services: ServiceDeps<L>,
}

/// Runs the daemon using the production collaborators.
pub fn run_daemon() -> Result<(), LaunchError> {
    let plan = LaunchPlan {
        process: ProcessControl {
            mode: LaunchMode::detect(),
            daemonizer: SystemDaemonizer,
            shutdown: SystemShutdownSignal,
        },
        services: ServiceDeps {
            loader: SystemConfigLoader,
            reporter: Arc::new(StructuredHealthReporter::new()),
            launchers: Launchers::system(),
        },
    };
    run_daemon_with(plan)
}

/// Runs the daemon with injected collaborators.
///
/// The singleton guard is taken and the process daemonised before the tokio
/// runtime exists; forking a running runtime would strand its worker threads.
pub(crate) fn run_daemon_with<L, D, S>(plan: LaunchPlan<L, D, S>) -> Result<(), LaunchError>
where
    L: ConfigLoader,
    D: Daemonizer,
    S: ShutdownSignal,
{
    let LaunchPlan { process, services } = plan;
    let ProcessControl {
        mode,
        daemonizer,
        shutdown,
    } = process;

    info!(
        target: PROCESS_TARGET,
        ?mode,
        "starting daemon runtime"
    );
    let config = services.loader.load()?;
    config.daemon_socket().prepare_filesystem()?;
    let runtime_paths = RuntimePaths::from_config(&config)?;
    let mut guard = ProcessGuard::acquire(runtime_paths)?;
    if matches!(mode, LaunchMode::Background) {
        daemonizer.daemonize(guard.paths())?;
    }
    guard.write_pid(std::process::id())?;
    guard.write_health(HealthState::Starting)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("droverd-worker")
        .build()
        .map_err(|source| LaunchError::Runtime { source })?;
    let result = runtime.block_on(serve(config, services, &guard, &shutdown));
    runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
    if result.is_ok() {
        info!(
            target: PROCESS_TARGET,
            "shutdown sequence completed"
        );
    }
    result
}

async fn serve<L, S>(
    config: Config,
    services: ServiceDeps<L>,
    guard: &ProcessGuard,
    shutdown: &S,
) -> Result<(), LaunchError>
where
    L: ConfigLoader,
    S: ShutdownSignal,
{
    let ServiceDeps {
        loader: _,
        reporter,
        launchers,
    } = services;
    let listener = SocketListener::bind(config.daemon_socket())?;
    let socket = config.daemon_socket().to_string();
    let daemon = bootstrap_with(&StaticConfigLoader::new(config), reporter)?;
    let supervisor = daemon.start_supervisor(launchers);

    let trigger = CancellationToken::new();
    let handler = Arc::new(DispatchConnectionHandler::new(
        Arc::clone(&supervisor),
        trigger.clone(),
        socket,
    ));
    let listener_handle = listener.start(handler)?;
    guard.write_health(HealthState::Ready)?;
    shutdown.listen(trigger.clone())?;
    trigger.cancelled().await;

    guard.write_health(HealthState::Stopping)?;
    let reporter = daemon.reporter();
    reporter.shutdown_started();
    listener_handle.shutdown();
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, supervisor.shutdown()).await {
        Ok(stopped) => reporter.shutdown_completed(stopped),
        Err(_) => warn!(
            target: PROCESS_TARGET,
            timeout_ms = SHUTDOWN_TIMEOUT.as_millis(),
            "managed processes did not stop in time"
        ),
    }
    listener_handle.join().await?;
    Ok(())
}
