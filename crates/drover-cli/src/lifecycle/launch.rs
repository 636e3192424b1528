//! Start sequence shared by `drover daemon start` and client auto-start.

use std::io::Write;
use std::time::{Duration, SystemTime};

use drover_config::RuntimePaths;

use super::error::LifecycleError;
use super::monitoring::{HealthSnapshot, wait_for_ready};
use super::spawning::spawn_daemon;
use super::types::{LifecycleContext, LifecycleOutput};

pub(super) const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

pub(super) fn prepare_runtime(
    context: LifecycleContext<'_>,
) -> Result<RuntimePaths, LifecycleError> {
    let config = context.config;
    config.daemon_socket().prepare_filesystem()?;
    RuntimePaths::from_config(config).map_err(LifecycleError::from)
}

/// Spawns `droverd` and blocks until it reports ready.
pub(crate) fn start_daemon(
    context: LifecycleContext<'_>,
) -> Result<(HealthSnapshot, RuntimePaths), LifecycleError> {
    let paths = prepare_runtime(context)?;
    let started_at = SystemTime::now();
    let mut child = spawn_daemon(context.config_arguments, context.daemon_binary)?;
    let snapshot = wait_for_ready(&paths, &mut child, started_at, STARTUP_TIMEOUT)?;
    Ok((snapshot, paths))
}

pub(super) fn write_startup_banner<W: Write, E: Write>(
    output: &mut LifecycleOutput<W, E>,
    context: LifecycleContext<'_>,
    snapshot: &HealthSnapshot,
    paths: &RuntimePaths,
) -> Result<(), LifecycleError> {
    output.stdout_line(format_args!(
        "daemon ready (pid {}) on {}",
        snapshot.pid,
        context.config.daemon_socket()
    ))?;
    output.stderr_line(format_args!(
        "runtime artefacts stored under {}",
        paths.runtime_dir().display()
    ))
}
