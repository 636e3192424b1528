//! Start, stop and status flows for `drover daemon`.

use std::io::Write;
use std::process::ExitCode;

use drover_config::RuntimePaths;

use super::error::LifecycleError;
use super::launch::{prepare_runtime, start_daemon, write_startup_banner};
use super::monitoring::{read_health, read_pid};
use super::shutdown::{signal_daemon, wait_for_shutdown};
use super::socket::{ensure_socket_available, socket_is_reachable};
use super::types::{LifecycleCommand, LifecycleContext, LifecycleOutput};

const NOT_RUNNING: &str = "daemon is not running; use 'drover daemon start' to launch it.";

/// Production lifecycle controller.
#[derive(Debug, Default)]
pub struct SystemLifecycle;

impl SystemLifecycle {
    /// Runs one lifecycle command.
    ///
    /// # Errors
    ///
    /// Returns a [`LifecycleError`] when the daemon cannot be started,
    /// signalled or inspected, or when output cannot be written.
    pub fn handle<W: Write, E: Write>(
        &mut self,
        command: LifecycleCommand,
        context: LifecycleContext<'_>,
        output: &mut LifecycleOutput<W, E>,
    ) -> Result<ExitCode, LifecycleError> {
        match command {
            LifecycleCommand::Start => Self::start(context, output),
            LifecycleCommand::Stop => Self::stop(context, output),
            LifecycleCommand::Status => Self::status(context, output),
        }
    }

    fn start<W: Write, E: Write>(
        context: LifecycleContext<'_>,
        output: &mut LifecycleOutput<W, E>,
    ) -> Result<ExitCode, LifecycleError> {
        ensure_socket_available(context.config.daemon_socket())?;
        let (snapshot, paths) = start_daemon(context)?;
        write_startup_banner(output, context, &snapshot, &paths)?;
        Ok(ExitCode::SUCCESS)
    }

    fn stop<W: Write, E: Write>(
        context: LifecycleContext<'_>,
        output: &mut LifecycleOutput<W, E>,
    ) -> Result<ExitCode, LifecycleError> {
        let paths = prepare_runtime(context)?;
        let Some(pid) = read_pid(paths.pid_path())? else {
            if socket_is_reachable(context.config.daemon_socket())? {
                return Err(LifecycleError::MissingPidWithSocket {
                    path: paths.pid_path().to_path_buf(),
                    endpoint: context.config.daemon_socket().to_string(),
                });
            }
            output.stdout_line(format_args!(
                "daemon is not running (pid file missing at {})",
                paths.pid_path().display()
            ))?;
            return Ok(ExitCode::SUCCESS);
        };
        signal_daemon(pid)?;
        wait_for_shutdown(&paths, context.config.daemon_socket())?;
        output.stdout_line(format_args!("daemon pid {pid} stopped cleanly"))?;
        output.stderr_line(format_args!(
            "removed runtime artefacts from {}",
            paths.runtime_dir().display()
        ))?;
        Ok(ExitCode::SUCCESS)
    }

    fn status<W: Write, E: Write>(
        context: LifecycleContext<'_>,
        output: &mut LifecycleOutput<W, E>,
    ) -> Result<ExitCode, LifecycleError> {
        let Ok(paths) = RuntimePaths::from_config(context.config) else {
            output.stdout_line(format_args!("{NOT_RUNNING}"))?;
            return Ok(ExitCode::SUCCESS);
        };
        if let Some(snapshot) = read_health(paths.health_path())? {
            output.stdout_line(format_args!(
                "daemon status: {} (pid {}) via {}",
                snapshot.status,
                snapshot.pid,
                context.config.daemon_socket()
            ))?;
            return Ok(ExitCode::SUCCESS);
        }
        let reachable = socket_is_reachable(context.config.daemon_socket())?;
        match read_pid(paths.pid_path())? {
            Some(pid) => output.stdout_line(format_args!(
                "daemon recorded pid {pid} but health snapshot is missing; check {}",
                paths.health_path().display()
            ))?,
            None if reachable => output.stdout_line(format_args!(
                "daemon socket {} is listening but runtime files are missing; consider 'drover daemon stop' or removing {}",
                context.config.daemon_socket(),
                paths.runtime_dir().display()
            ))?,
            None => output.stdout_line(format_args!("{NOT_RUNNING}"))?,
        }
        Ok(ExitCode::SUCCESS)
    }
}
