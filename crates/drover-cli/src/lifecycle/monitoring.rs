//! Daemon health monitoring.
//!
//! `droverd` publishes `{"status", "pid", "timestamp"}` to `droverd.health`
//! beside its socket. The client polls that file while waiting for a freshly
//! spawned daemon and reads it for `drover daemon status`.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::process::Child;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use drover_config::RuntimePaths;
use serde::Deserialize;

use super::error::LifecycleError;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Readiness stage reported by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum DaemonStatus {
    Starting,
    Ready,
    Stopping,
}

impl fmt::Display for DaemonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => f.write_str("starting"),
            Self::Ready => f.write_str("ready"),
            Self::Stopping => f.write_str("stopping"),
        }
    }
}

/// Contents of `droverd.health`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct HealthSnapshot {
    pub status: DaemonStatus,
    pub pid: u32,
    /// Seconds since the Unix epoch when the snapshot was written.
    pub timestamp: u64,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum HealthCheckOutcome {
    Ready(HealthSnapshot),
    Aborted,
    Continue,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ProcessMonitorContext {
    pub started_at: SystemTime,
    pub expected_pid: u32,
    /// The spawned process exited cleanly, so the daemon forked and the pid
    /// in the snapshot will differ.
    pub daemonized: bool,
}

fn read_optional(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error),
    }
}

/// Reads the health snapshot; a missing file is `Ok(None)`.
pub(crate) fn read_health(path: &Path) -> Result<Option<HealthSnapshot>, LifecycleError> {
    let Some(content) = read_optional(path).map_err(|source| LifecycleError::ReadHealth {
        path: path.to_path_buf(),
        source,
    })?
    else {
        return Ok(None);
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| LifecycleError::ParseHealth {
            path: path.to_path_buf(),
            source,
        })
}

/// Reads the daemon pid; a missing or empty file is `Ok(None)`.
pub(crate) fn read_pid(path: &Path) -> Result<Option<u32>, LifecycleError> {
    let Some(content) = read_optional(path).map_err(|source| LifecycleError::ReadPid {
        path: path.to_path_buf(),
        source,
    })?
    else {
        return Ok(None);
    };
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<u32>()
        .map(Some)
        .map_err(|source| LifecycleError::ParsePid {
            path: path.to_path_buf(),
            source,
        })
}

/// Waits until the spawned daemon reports `ready`.
///
/// A clean exit of `child` means the daemon forked into the background; from
/// then on only the snapshot timestamp identifies a fresh snapshot. A failed
/// exit, a `stopping` snapshot or the deadline passing abort the wait.
pub(crate) fn wait_for_ready(
    paths: &RuntimePaths,
    child: &mut Child,
    started_at: SystemTime,
    timeout: Duration,
) -> Result<HealthSnapshot, LifecycleError> {
    let deadline = Instant::now() + timeout;
    let expected_pid = child.id();
    let mut daemonized = false;
    while Instant::now() < deadline {
        // Check the child first so a fork is noticed before the pid check.
        if let Some(status) = child
            .try_wait()
            .map_err(|source| LifecycleError::MonitorChild { source })?
        {
            if !status.success() {
                return Err(LifecycleError::StartupFailed {
                    exit_status: status.code(),
                });
            }
            daemonized = true;
        }
        let monitor = ProcessMonitorContext {
            started_at,
            expected_pid,
            daemonized,
        };
        match check_health_snapshot(paths.health_path(), monitor)? {
            HealthCheckOutcome::Ready(snapshot) => return Ok(snapshot),
            HealthCheckOutcome::Aborted => {
                return Err(LifecycleError::StartupAborted {
                    path: paths.health_path().to_path_buf(),
                });
            }
            HealthCheckOutcome::Continue => {}
        }
        thread::sleep(POLL_INTERVAL);
    }
    Err(LifecycleError::StartupTimeout {
        health_path: paths.health_path().to_path_buf(),
        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
    })
}

pub(crate) fn check_health_snapshot(
    health_path: &Path,
    monitor: ProcessMonitorContext,
) -> Result<HealthCheckOutcome, LifecycleError> {
    let Some(snapshot) = read_health(health_path)? else {
        return Ok(HealthCheckOutcome::Continue);
    };
    let pid_ok = monitor.daemonized || snapshot.pid == monitor.expected_pid;
    if !pid_ok || !snapshot_is_recent(&snapshot, monitor.started_at)? {
        return Ok(HealthCheckOutcome::Continue);
    }
    Ok(match snapshot.status {
        DaemonStatus::Ready => HealthCheckOutcome::Ready(snapshot),
        DaemonStatus::Stopping => HealthCheckOutcome::Aborted,
        DaemonStatus::Starting => HealthCheckOutcome::Continue,
    })
}

pub(crate) fn snapshot_is_recent(
    snapshot: &HealthSnapshot,
    started_at: SystemTime,
) -> Result<bool, LifecycleError> {
    // Snapshots carry whole seconds; truncate so one written in the same
    // second as the launch still counts.
    let started_secs = started_at
        .duration_since(UNIX_EPOCH)
        .map_err(|_| LifecycleError::InvalidSystemClock { time: started_at })?
        .as_secs();
    Ok(snapshot.timestamp >= started_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use serde_json::json;
    use tempfile::TempDir;

    struct HealthFile {
        _dir: TempDir,
        path: std::path::PathBuf,
    }

    impl HealthFile {
        fn write(&self, value: &serde_json::Value) {
            fs::write(&self.path, value.to_string()).expect("write health snapshot");
        }
    }

    #[fixture]
    fn health() -> HealthFile {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("droverd.health");
        HealthFile { _dir: dir, path }
    }

    fn now_secs() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock after epoch")
            .as_secs()
    }

    fn monitor(expected_pid: u32, daemonized: bool) -> ProcessMonitorContext {
        ProcessMonitorContext {
            started_at: SystemTime::now(),
            expected_pid,
            daemonized,
        }
    }

    #[rstest]
    fn missing_snapshot_keeps_polling(health: HealthFile) {
        let outcome = check_health_snapshot(&health.path, monitor(7, false)).expect("check");
        assert_eq!(outcome, HealthCheckOutcome::Continue);
    }

    #[rstest]
    fn fresh_ready_snapshot_from_the_child_is_ready(health: HealthFile) {
        health.write(&json!({ "status": "ready", "pid": 7, "timestamp": now_secs() }));
        let outcome = check_health_snapshot(&health.path, monitor(7, false)).expect("check");
        assert!(matches!(outcome, HealthCheckOutcome::Ready(snapshot) if snapshot.pid == 7));
    }

    #[rstest]
    #[case(false, HealthCheckOutcome::Continue)]
    #[case(true, HealthCheckOutcome::Aborted)]
    fn foreign_pid_only_counts_after_forking(
        health: HealthFile,
        #[case] daemonized: bool,
        #[case] expected: HealthCheckOutcome,
    ) {
        health.write(&json!({ "status": "stopping", "pid": 99, "timestamp": now_secs() }));
        let outcome = check_health_snapshot(&health.path, monitor(7, daemonized)).expect("check");
        assert_eq!(outcome, expected);
    }

    #[rstest]
    fn stale_snapshot_is_ignored(health: HealthFile) {
        health.write(&json!({ "status": "ready", "pid": 7, "timestamp": 1 }));
        let outcome = check_health_snapshot(&health.path, monitor(7, true)).expect("check");
        assert_eq!(outcome, HealthCheckOutcome::Continue);
    }

    #[rstest]
    fn garbage_snapshot_is_a_parse_error(health: HealthFile) {
        fs::write(&health.path, "not json").expect("write");
        let error = read_health(&health.path).expect_err("garbage should not parse");
        assert!(matches!(error, LifecycleError::ParseHealth { .. }));
    }

    #[rstest]
    #[case("", None)]
    #[case("4242\n", Some(4242))]
    fn pid_files_are_parsed(#[case] content: &str, #[case] expected: Option<u32>) {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("droverd.pid");
        fs::write(&path, content).expect("write pid");
        assert_eq!(read_pid(&path).expect("read pid"), expected);
    }

    #[test]
    fn missing_pid_file_is_none() {
        let dir = TempDir::new().expect("temp dir");
        assert_eq!(read_pid(&dir.path().join("absent.pid")).expect("read"), None);
    }
}
