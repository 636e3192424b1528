//! Singleton guard over the daemon's runtime artefacts.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde::Serialize;
use tracing::{info, warn};

use drover_config::RuntimePaths;

use super::PROCESS_TARGET;
use super::errors::LaunchError;
use super::files::atomic_write;

/// Holds the lock file for the lifetime of the daemon. Dropping the guard
/// removes the lock, pid and health files.
#[derive(Debug)]
pub(super) struct ProcessGuard {
    paths: RuntimePaths,
    _lock: File,
    pid: Option<u32>,
}

impl ProcessGuard {
    pub(super) fn acquire(paths: RuntimePaths) -> Result<Self, LaunchError> {
        let lock = acquire_lock(&paths)?;
        Ok(Self {
            paths,
            _lock: lock,
            pid: None,
        })
    }

    pub(super) fn write_pid(&mut self, pid: u32) -> Result<(), LaunchError> {
        let path = self.paths.pid_path();
        atomic_write(path, format!("{pid}\n").as_bytes()).map_err(|source| {
            LaunchError::PidWrite {
                path: path.to_path_buf(),
                source,
            }
        })?;
        self.pid = Some(pid);
        info!(
            target: PROCESS_TARGET,
            pid,
            file = %path.display(),
            "pid file written"
        );
        Ok(())
    }

    pub(super) fn write_health(&self, status: HealthState) -> Result<(), LaunchError> {
        let pid = self.pid.ok_or(LaunchError::MissingPid)?;
        let path = self.paths.health_path();
        let snapshot = HealthSnapshot::new(status, pid)?;
        let mut encoded = serde_json::to_vec(&snapshot)?;
        encoded.push(b'\n');
        atomic_write(path, &encoded).map_err(|source| LaunchError::HealthWrite {
            path: path.to_path_buf(),
            source,
        })?;
        info!(
            target: PROCESS_TARGET,
            status = ?snapshot.status,
            file = %path.display(),
            "health snapshot updated"
        );
        Ok(())
    }

    pub(super) fn paths(&self) -> &RuntimePaths {
        &self.paths
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        for (path, label) in [
            (self.paths.health_path(), "health"),
            (self.paths.pid_path(), "pid"),
            (self.paths.lock_path(), "lock"),
        ] {
            match fs::remove_file(path) {
                Err(error) if error.kind() != io::ErrorKind::NotFound => {
                    warn!(
                        target: PROCESS_TARGET,
                        file = %path.display(),
                        error = %error,
                        "failed to remove {label} file"
                    );
                }
                _ => {}
            }
        }
    }
}

/// Readiness stage published in the health snapshot. Clients wait for
/// `ready` before replaying a call to a freshly spawned daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(super) enum HealthState {
    Starting,
    Ready,
    Stopping,
}

#[derive(Debug, Serialize)]
struct HealthSnapshot {
    status: HealthState,
    pid: u32,
    timestamp: u64,
}

impl HealthSnapshot {
    fn new(status: HealthState, pid: u32) -> Result<Self, LaunchError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|source| LaunchError::Clock { source })?
            .as_secs();
        Ok(Self {
            status,
            pid,
            timestamp,
        })
    }
}

fn acquire_lock(paths: &RuntimePaths) -> Result<File, LaunchError> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    match options.open(paths.lock_path()) {
        Ok(file) => {
            info!(
                target: PROCESS_TARGET,
                file = %paths.lock_path().display(),
                "acquired daemon lock"
            );
            Ok(file)
        }
        Err(error) if error.kind() == io::ErrorKind::AlreadyExists => handle_existing_lock(paths),
        Err(source) => Err(LaunchError::LockCreate {
            path: paths.lock_path().to_path_buf(),
            source,
        }),
    }
}

fn handle_existing_lock(paths: &RuntimePaths) -> Result<File, LaunchError> {
    if let Some(pid) = read_pid(paths.pid_path())
        && is_alive(pid)?
    {
        info!(
            target: PROCESS_TARGET,
            pid,
            "refusing to start: existing daemon alive"
        );
        return Err(LaunchError::AlreadyRunning { pid });
    }
    warn!(
        target: PROCESS_TARGET,
        lock = %paths.lock_path().display(),
        "existing daemon not detected; cleaning stale files"
    );
    remove_file(paths.lock_path())?;
    remove_file(paths.pid_path())?;
    remove_file(paths.health_path())?;
    acquire_lock(paths)
}

fn read_pid(path: &Path) -> Option<u32> {
    let content = fs::read_to_string(path).ok()?;
    content.trim().parse::<u32>().ok()
}

fn remove_file(path: &Path) -> Result<(), LaunchError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(LaunchError::Cleanup {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn is_alive(pid: u32) -> Result<bool, LaunchError> {
    let Ok(raw) = i32::try_from(pid) else {
        return Ok(false);
    };
    if raw == 0 {
        return Ok(false);
    }
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => Ok(true),
        Err(Errno::ESRCH | Errno::ECHILD) => Ok(false),
        Err(errno) => Err(LaunchError::CheckProcess { pid, source: errno }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_config::{Config, SocketEndpoint};
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    struct Runtime {
        _dir: TempDir,
        paths: RuntimePaths,
    }

    #[fixture]
    fn runtime() -> Runtime {
        let dir = tempfile::tempdir().unwrap_or_else(|error| panic!("temp dir: {error}"));
        let socket = dir.path().join("droverd.sock");
        let config = Config {
            daemon_socket: SocketEndpoint::unix(socket.to_string_lossy().into_owned()),
            ..Config::default()
        };
        let paths =
            RuntimePaths::from_config(&config).unwrap_or_else(|error| panic!("paths: {error}"));
        Runtime { _dir: dir, paths }
    }

    fn read_health(paths: &RuntimePaths) -> serde_json::Value {
        let raw = fs::read_to_string(paths.health_path())
            .unwrap_or_else(|error| panic!("read health: {error}"));
        serde_json::from_str(&raw).unwrap_or_else(|error| panic!("parse health: {error}"))
    }

    #[rstest]
    fn writes_pid_and_health_then_cleans_up(runtime: Runtime) {
        let paths = runtime.paths.clone();
        {
            let mut guard = ProcessGuard::acquire(runtime.paths.clone())
                .unwrap_or_else(|error| panic!("acquire: {error}"));
            guard
                .write_pid(std::process::id())
                .unwrap_or_else(|error| panic!("pid: {error}"));
            guard
                .write_health(HealthState::Ready)
                .unwrap_or_else(|error| panic!("health: {error}"));
            let health = read_health(&paths);
            assert_eq!(health["status"], "ready");
            assert_eq!(health["pid"], std::process::id());
        }
        assert!(!paths.lock_path().exists());
        assert!(!paths.pid_path().exists());
        assert!(!paths.health_path().exists());
    }

    #[rstest]
    fn health_requires_pid(runtime: Runtime) {
        let guard = ProcessGuard::acquire(runtime.paths.clone())
            .unwrap_or_else(|error| panic!("acquire: {error}"));
        assert!(matches!(
            guard.write_health(HealthState::Starting),
            Err(LaunchError::MissingPid)
        ));
    }

    #[rstest]
    fn refuses_when_live_daemon_holds_lock(runtime: Runtime) {
        let mut first = ProcessGuard::acquire(runtime.paths.clone())
            .unwrap_or_else(|error| panic!("acquire: {error}"));
        first
            .write_pid(std::process::id())
            .unwrap_or_else(|error| panic!("pid: {error}"));
        let error = ProcessGuard::acquire(runtime.paths.clone())
            .err()
            .unwrap_or_else(|| panic!("second acquire should fail"));
        assert!(matches!(error, LaunchError::AlreadyRunning { pid } if pid == std::process::id()));
    }

    #[rstest]
    fn reclaims_stale_lock(runtime: Runtime) {
        fs::write(runtime.paths.lock_path(), b"").unwrap_or_else(|error| panic!("lock: {error}"));
        // Far above any realistic pid_max.
        fs::write(runtime.paths.pid_path(), b"2147483000\n")
            .unwrap_or_else(|error| panic!("pid: {error}"));
        let guard = ProcessGuard::acquire(runtime.paths.clone());
        assert!(guard.is_ok(), "stale lock should be reclaimed");
        assert!(!runtime.paths.pid_path().exists());
    }
}
