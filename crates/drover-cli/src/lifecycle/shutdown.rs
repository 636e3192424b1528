//! Daemon shutdown helpers.

use std::io;
use std::thread;
use std::time::{Duration, Instant};

use drover_config::{RuntimePaths, SocketEndpoint};

use super::error::LifecycleError;
use super::socket::socket_is_reachable;

#[cfg(unix)]
use libc::{SIGTERM, kill};

// Outlasts the daemon's own deadline for stopping its managed processes.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(40);
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Waits until the pid file is gone and the socket no longer answers.
pub(super) fn wait_for_shutdown(
    paths: &RuntimePaths,
    endpoint: &SocketEndpoint,
) -> Result<(), LifecycleError> {
    wait_for_shutdown_within(paths, endpoint, SHUTDOWN_TIMEOUT)
}

fn wait_for_shutdown_within(
    paths: &RuntimePaths,
    endpoint: &SocketEndpoint,
    timeout: Duration,
) -> Result<(), LifecycleError> {
    let deadline = Instant::now() + timeout;
    loop {
        let pid_exists = paths.pid_path().exists();
        if !pid_exists && !socket_is_reachable(endpoint)? {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(LifecycleError::ShutdownTimeout {
                pid_path: paths.pid_path().to_path_buf(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            });
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Sends SIGTERM to the daemon.
pub(super) fn signal_daemon(pid: u32) -> Result<(), LifecycleError> {
    #[cfg(unix)]
    {
        let target = libc::pid_t::try_from(pid).map_err(|_| LifecycleError::SignalFailed {
            pid,
            source: io::Error::from(io::ErrorKind::InvalidInput),
        })?;
        // SAFETY: kill(2) does not touch memory; an invalid pid only yields
        // an error code.
        let result = unsafe { kill(target, SIGTERM) };
        if result == 0 {
            Ok(())
        } else {
            Err(LifecycleError::SignalFailed {
                pid,
                source: io::Error::last_os_error(),
            })
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        Err(LifecycleError::UnsupportedPlatform)
    }
}
