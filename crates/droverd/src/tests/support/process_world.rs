//! Process supervision test world shared across daemon lifecycle scenarios.

use std::cell::RefCell;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use drover_config::RuntimePaths;

use crate::health::HealthReporter;
use crate::process::daemonizer::{DaemonizeError, Daemonizer};
use crate::process::launch::{LaunchPlan, ProcessControl, ServiceDeps, run_daemon_with};
use crate::process::shutdown::{ShutdownError, ShutdownSignal};
use crate::process::{LaunchError, LaunchMode};

use super::StepResult;
use super::config_loader::{FailingConfigLoader, TestConfigLoader};
use super::launcher::ScriptedLauncher;
use super::reporter::RecordingHealthReporter;

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);
pub const POLL_INTERVAL: Duration = Duration::from_millis(25);

pub struct ProcessTestWorld {
    loader: TestConfigLoader,
    pub reporter: Arc<RecordingHealthReporter>,
    pub launcher: ScriptedLauncher,
    daemonizer: TestDaemonizer,
    shutdown: TestShutdownSignal,
    handle: Option<thread::JoinHandle<Result<(), LaunchError>>>,
    result: Option<Result<(), LaunchError>>,
    health_history: RefCell<Vec<String>>,
    pub last_response: Option<Value>,
}

impl Default for ProcessTestWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTestWorld {
    pub fn new() -> Self {
        Self {
            loader: TestConfigLoader::new(),
            reporter: Arc::new(RecordingHealthReporter::default()),
            launcher: ScriptedLauncher::default(),
            daemonizer: TestDaemonizer::default(),
            shutdown: TestShutdownSignal::default(),
            handle: None,
            result: None,
            health_history: RefCell::new(Vec::new()),
            last_response: None,
        }
    }

    fn services(&self) -> ServiceDeps<TestConfigLoader> {
        let reporter: Arc<dyn HealthReporter> = Arc::clone(&self.reporter) as _;
        ServiceDeps {
            loader: self.loader.clone(),
            reporter,
            launchers: self.launcher.launchers(),
        }
    }

    pub fn start_background(&mut self) -> StepResult {
        if self.handle.is_some() {
            return Err("daemon already running".to_owned());
        }
        self.health_history.borrow_mut().clear();
        let plan = LaunchPlan {
            process: ProcessControl {
                mode: LaunchMode::Background,
                daemonizer: self.daemonizer.clone(),
                shutdown: self.shutdown.clone(),
            },
            services: self.services(),
        };
        self.handle = Some(thread::spawn(move || run_daemon_with(plan)));
        Ok(())
    }

    pub fn start_foreground(&mut self, pretrigger: bool) -> StepResult {
        if self.result.is_some() {
            return Err("result already recorded".to_owned());
        }
        let shutdown = TestShutdownSignal::default();
        if pretrigger {
            shutdown.trigger();
        }
        let plan = LaunchPlan {
            process: ProcessControl {
                mode: LaunchMode::Foreground,
                daemonizer: self.daemonizer.clone(),
                shutdown,
            },
            services: self.services(),
        };
        self.result = Some(run_daemon_with(plan));
        Ok(())
    }

    pub fn start_foreground_with_invalid_config(&mut self) -> StepResult {
        if self.result.is_some() {
            return Err("result already recorded".to_owned());
        }
        let reporter: Arc<dyn HealthReporter> = Arc::clone(&self.reporter) as _;
        let plan = LaunchPlan {
            process: ProcessControl {
                mode: LaunchMode::Foreground,
                daemonizer: self.daemonizer.clone(),
                shutdown: TestShutdownSignal::default(),
            },
            services: ServiceDeps {
                loader: FailingConfigLoader,
                reporter,
                launchers: self.launcher.launchers(),
            },
        };
        self.result = Some(run_daemon_with(plan));
        Ok(())
    }

    pub fn join_background(&mut self) -> StepResult {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| "daemon not running".to_owned())?;
        match handle.join() {
            Ok(result) => {
                self.result = Some(result);
                Ok(())
            }
            Err(_) => Err("daemon thread panicked".to_owned()),
        }
    }

    pub fn trigger_shutdown(&self) {
        self.shutdown.trigger();
    }

    pub fn lock_path(&self) -> PathBuf {
        self.loader.runtime_dir().join("droverd.lock")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.loader.runtime_dir().join("droverd.pid")
    }

    pub fn health_path(&self) -> PathBuf {
        self.loader.runtime_dir().join("droverd.health")
    }

    pub fn read_health(&self) -> Result<Value, String> {
        let content = fs::read_to_string(self.health_path()).map_err(|error| error.to_string())?;
        serde_json::from_str(&content).map_err(|error| error.to_string())
    }

    /// Leaves a lock and pid file behind as a crashed daemon would.
    pub fn write_stale_runtime(&self, pid: u32) -> StepResult {
        fs::create_dir_all(self.loader.runtime_dir()).map_err(|error| error.to_string())?;
        fs::write(self.lock_path(), b"").map_err(|error| error.to_string())?;
        fs::write(self.pid_path(), format!("{pid}\n")).map_err(|error| error.to_string())
    }

    pub fn lock_exists(&self) -> bool {
        self.lock_path().exists()
    }

    pub fn daemonizer_calls(&self) -> usize {
        self.daemonizer.calls()
    }

    pub fn last_result(&self) -> Option<&Result<(), LaunchError>> {
        self.result.as_ref()
    }

    pub fn last_error(&self) -> Option<&LaunchError> {
        self.result.as_ref()?.as_ref().err()
    }

    pub fn wait_for_status(&self, expected: &str) -> StepResult {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        while Instant::now() < deadline {
            if self.sample_status().as_deref() == Some(expected) {
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL);
        }
        Err(format!("daemon did not publish {expected} health snapshot"))
    }

    pub fn saw_status(&self, expected: &str) -> bool {
        self.health_history
            .borrow()
            .iter()
            .any(|status| status == expected)
    }

    fn sample_status(&self) -> Option<String> {
        let snapshot = self.read_health().ok()?;
        let status = snapshot_status(&snapshot).to_owned();
        let mut history = self.health_history.borrow_mut();
        if history.last() != Some(&status) {
            history.push(status.clone());
        }
        Some(status)
    }

    /// Sends one JSONL request over the daemon socket and keeps the reply.
    pub fn request(&mut self, request: &Value) -> StepResult {
        let mut stream =
            UnixStream::connect(self.loader.socket_path()).map_err(|error| error.to_string())?;
        stream
            .set_read_timeout(Some(WAIT_TIMEOUT))
            .map_err(|error| error.to_string())?;
        let mut line = request.to_string();
        line.push('\n');
        stream
            .write_all(line.as_bytes())
            .map_err(|error| error.to_string())?;
        let mut reply = String::new();
        BufReader::new(stream)
            .read_line(&mut reply)
            .map_err(|error| error.to_string())?;
        let value = serde_json::from_str(&reply).map_err(|error| error.to_string())?;
        self.last_response = Some(value);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct TestDaemonizer {
    calls: Arc<AtomicUsize>,
}

impl TestDaemonizer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Daemonizer for TestDaemonizer {
    fn daemonize(&self, _paths: &RuntimePaths) -> Result<(), DaemonizeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Shutdown listener fired by the test instead of an OS signal.
#[derive(Clone, Default)]
pub struct TestShutdownSignal {
    external: CancellationToken,
}

impl TestShutdownSignal {
    pub fn trigger(&self) {
        self.external.cancel();
    }
}

impl ShutdownSignal for TestShutdownSignal {
    fn listen(&self, trigger: CancellationToken) -> Result<(), ShutdownError> {
        let external = self.external.clone();
        tokio::spawn(async move {
            external.cancelled().await;
            trigger.cancel();
        });
        Ok(())
    }
}

pub fn snapshot_status(snapshot: &Value) -> &str {
    snapshot
        .get("status")
        .and_then(Value::as_str)
        .expect("health snapshot should contain a status field")
}
