use serde::{Deserialize, Serialize};

use crate::{AppDescriptor, ProcessStatus};

/// Restart counters and timestamps of a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessMeta {
    /// Restarts performed since creation or the last reset.
    pub restart_time: u32,
    /// Restarts that happened before `min_uptime` elapsed.
    pub unstable_restarts: u32,
    /// Creation time, milliseconds since the Unix epoch.
    pub created_at: u64,
    /// Time of the last launch, milliseconds since the Unix epoch.
    pub pm_uptime: u64,
    /// Last delay used by the exponential backoff.
    pub prev_restart_delay: u64,
    /// Exit code of the last run, if it exited normally.
    #[serde(default)]
    pub exit_code: Option<i32>,
    /// Per-instance ordinal.
    pub instance: u32,
}

/// Sampled resource usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Monit {
    /// Resident memory in bytes.
    pub memory: u64,
    /// CPU usage in percent.
    pub cpu: f32,
}

/// Read-only snapshot of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessView {
    /// Numeric identifier.
    pub pm_id: u32,
    /// Whether this is the outgoing record of a reload.
    pub shadow: bool,
    /// Application name.
    pub name: String,
    /// Namespace.
    pub namespace: String,
    /// OS process id while running.
    pub pid: Option<u32>,
    /// Lifecycle status.
    pub status: ProcessStatus,
    /// Resolved descriptor.
    pub descriptor: AppDescriptor,
    /// Counters and timestamps.
    pub meta: ProcessMeta,
    /// Whether the filesystem watch is active.
    pub watching: bool,
    /// Whether resource sampling is enabled.
    pub monitored: bool,
    /// Last sampled usage.
    pub monit: Monit,
}

/// Host figures returned by `getSystemData`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemData {
    /// Logical CPUs.
    pub cpus: usize,
    /// Total memory in bytes.
    pub total_memory: u64,
    /// Used memory in bytes.
    pub used_memory: u64,
    /// Daemon uptime in milliseconds.
    pub daemon_uptime_ms: u64,
    /// Daemon process id.
    pub daemon_pid: u32,
    /// Host name, when known.
    pub hostname: Option<String>,
}

/// Daemon summary returned by `getReport`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonReport {
    /// Daemon version.
    pub version: String,
    /// Daemon process id.
    pub pid: u32,
    /// Daemon uptime in milliseconds.
    pub uptime_ms: u64,
    /// Records in the registry, shadows included.
    pub processes: usize,
    /// Records currently online.
    pub online: usize,
    /// State directory.
    pub state_dir: String,
    /// Socket endpoint.
    pub socket: String,
}
