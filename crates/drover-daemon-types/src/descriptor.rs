//! Application descriptors submitted through `prepare`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_NAMESPACE: &str = "default";
const DEFAULT_INSTANCE_VAR: &str = "DROVER_INSTANCE";
const DEFAULT_KILL_SIGNAL: &str = "SIGINT";

/// How instances of an application are launched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    /// One ordinary subprocess per instance.
    #[default]
    #[serde(alias = "fork")]
    Independent,
    /// Siblings sharing a daemon-owned listening socket.
    #[serde(alias = "cluster")]
    WorkerGroup,
}

/// Filesystem watch settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Whether the watch is active.
    #[serde(default)]
    pub enabled: bool,
    /// Paths to watch; the working directory when empty.
    #[serde(default)]
    pub paths: Vec<PathBuf>,
    /// Extra ignore patterns (component names or globs).
    #[serde(default)]
    pub ignore: Vec<String>,
    /// Debounce window in milliseconds.
    #[serde(default)]
    pub delay_ms: u64,
}

/// Everything needed to launch and supervise one application.
///
/// Policy fields are expressed in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppDescriptor {
    /// Application name, shared by all of its instances.
    pub name: String,
    /// Grouping namespace.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Script or executable to run.
    pub script: String,
    /// Arguments passed to the script.
    #[serde(default)]
    pub args: Vec<String>,
    /// Optional interpreter the script is handed to.
    #[serde(default)]
    pub interpreter: Option<String>,
    /// Arguments placed before the script when an interpreter is used.
    #[serde(default)]
    pub interpreter_args: Vec<String>,
    /// Working directory of the child.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Launch strategy.
    #[serde(default)]
    pub exec_mode: ExecMode,
    /// Requested instances; `0` means one per CPU, negative subtracts from it.
    #[serde(default = "default_instances")]
    pub instances: i32,
    /// Whether exits trigger automatic restarts.
    #[serde(default = "default_true")]
    pub autorestart: bool,
    /// Unstable restarts tolerated before the process is marked errored.
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    /// Uptime below which an exit counts as unstable.
    #[serde(default = "default_min_uptime")]
    pub min_uptime: u64,
    /// Fixed delay before automatic restarts.
    #[serde(default)]
    pub restart_delay: u64,
    /// Initial delay of the exponential restart backoff.
    #[serde(default)]
    pub exp_backoff_restart_delay: u64,
    /// Defer `online` until the child sends a ready message.
    #[serde(default)]
    pub wait_ready: bool,
    /// Upper bound on waiting for readiness.
    #[serde(default = "default_listen_timeout")]
    pub listen_timeout: u64,
    /// Grace period between the graceful and the forced kill.
    #[serde(default = "default_kill_timeout")]
    pub kill_timeout: u64,
    /// Polling interval while waiting for a signalled process to exit.
    #[serde(default = "default_kill_retry_time")]
    pub kill_retry_time: u64,
    /// Signal used for graceful termination.
    #[serde(default = "default_kill_signal")]
    pub kill_signal: String,
    /// Kill the whole process group on forced termination.
    #[serde(default = "default_true")]
    pub treekill: bool,
    /// Filesystem watch settings.
    #[serde(default)]
    pub watch: WatchConfig,
    /// Cron expression triggering soft reloads.
    #[serde(default)]
    pub cron_restart: Option<String>,
    /// User to run as.
    #[serde(default)]
    pub uid: Option<String>,
    /// Group to run as.
    #[serde(default)]
    pub gid: Option<String>,
    /// Extra environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Name of the per-instance ordinal variable.
    #[serde(default = "default_instance_var")]
    pub instance_var: String,
    /// Variable whose numeric value is offset by the ordinal.
    #[serde(default)]
    pub increment_var: Option<String>,
    /// Address shared by worker-group siblings, e.g. `0.0.0.0:3000`.
    #[serde(default)]
    pub listen: Option<String>,
    /// Write stderr into the stdout log file.
    #[serde(default)]
    pub merge_logs: bool,
    /// Explicit stdout log path.
    #[serde(default)]
    pub out_file: Option<PathBuf>,
    /// Explicit stderr log path.
    #[serde(default)]
    pub error_file: Option<PathBuf>,
    /// `strftime` format prefixed to each log line.
    #[serde(default)]
    pub log_date_format: Option<String>,
}

/// Validation failures for a descriptor.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DescriptorError {
    /// The application name is blank.
    #[error("application name must not be empty")]
    EmptyName,
    /// The application name is purely numeric and would shadow identifiers.
    #[error("application name '{name}' must not be numeric")]
    NumericName {
        /// Rejected name.
        name: String,
    },
    /// The script is blank.
    #[error("script for '{name}' must not be empty")]
    EmptyScript {
        /// Application name.
        name: String,
    },
    /// The instance ordinal variable is blank.
    #[error("instance variable for '{name}' must not be empty")]
    EmptyInstanceVar {
        /// Application name.
        name: String,
    },
    /// A worker group must share its socket via an address that parses.
    #[error("listen address '{address}' for '{name}' is not host:port")]
    InvalidListen {
        /// Application name.
        name: String,
        /// Rejected address.
        address: String,
    },
}

impl AppDescriptor {
    /// Builds a descriptor with defaults for everything but name and script.
    #[must_use]
    pub fn new(name: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: default_namespace(),
            script: script.into(),
            args: Vec::new(),
            interpreter: None,
            interpreter_args: Vec::new(),
            cwd: None,
            exec_mode: ExecMode::Independent,
            instances: default_instances(),
            autorestart: true,
            max_restarts: default_max_restarts(),
            min_uptime: default_min_uptime(),
            restart_delay: 0,
            exp_backoff_restart_delay: 0,
            wait_ready: false,
            listen_timeout: default_listen_timeout(),
            kill_timeout: default_kill_timeout(),
            kill_retry_time: default_kill_retry_time(),
            kill_signal: default_kill_signal(),
            treekill: true,
            watch: WatchConfig::default(),
            cron_restart: None,
            uid: None,
            gid: None,
            env: BTreeMap::new(),
            instance_var: default_instance_var(),
            increment_var: None,
            listen: None,
            merge_logs: false,
            out_file: None,
            error_file: None,
            log_date_format: None,
        }
    }

    /// Checks invariants that do not depend on the host.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(DescriptorError::EmptyName);
        }
        if name.chars().all(|character| character.is_ascii_digit()) {
            return Err(DescriptorError::NumericName {
                name: self.name.clone(),
            });
        }
        if self.script.trim().is_empty() {
            return Err(DescriptorError::EmptyScript {
                name: self.name.clone(),
            });
        }
        if self.instance_var.trim().is_empty() {
            return Err(DescriptorError::EmptyInstanceVar {
                name: self.name.clone(),
            });
        }
        if let Some(address) = &self.listen
            && address.parse::<std::net::SocketAddr>().is_err()
        {
            return Err(DescriptorError::InvalidListen {
                name: self.name.clone(),
                address: address.clone(),
            });
        }
        Ok(())
    }

    /// Resolves the requested instance count against the host CPU count.
    ///
    /// `0` yields one instance per CPU, a negative count is subtracted from
    /// the CPU count, and the result is never below one.
    #[must_use]
    pub fn resolve_instances(&self, cpus: usize) -> usize {
        let cpus = i64::try_from(cpus.max(1)).unwrap_or(i64::MAX);
        let requested = i64::from(self.instances);
        let resolved = match requested {
            0 => cpus,
            value if value < 0 => cpus.saturating_add(value),
            value => value,
        };
        usize::try_from(resolved.max(1)).unwrap_or(1)
    }

    /// Whether the restart policy uses a fixed delay or exponential backoff.
    #[must_use]
    pub const fn has_restart_delay(&self) -> bool {
        self.restart_delay > 0 || self.exp_backoff_restart_delay > 0
    }
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_owned()
}

fn default_instance_var() -> String {
    DEFAULT_INSTANCE_VAR.to_owned()
}

fn default_kill_signal() -> String {
    DEFAULT_KILL_SIGNAL.to_owned()
}

const fn default_true() -> bool {
    true
}

const fn default_instances() -> i32 {
    1
}

const fn default_max_restarts() -> u32 {
    16
}

const fn default_min_uptime() -> u64 {
    1_000
}

const fn default_listen_timeout() -> u64 {
    3_000
}

const fn default_kill_timeout() -> u64 {
    1_600
}

const fn default_kill_retry_time() -> u64 {
    100
}
