//! Scenario world for the bootstrap behaviour suite.

use std::cell::RefCell;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use rstest::fixture;
use serde_json::json;
use tokio::runtime::Runtime;

use crate::bootstrap::{BootstrapError, ConfigLoader, Daemon, bootstrap_with};
use crate::health::HealthReporter;

use super::config_loader::{FailingConfigLoader, TestConfigLoader};
use super::launcher::ScriptedLauncher;
use super::reporter::RecordingHealthReporter;
use super::supervisor_world::{descriptor, paused_runtime};

/// Scenario world shared across bootstrap steps.
pub struct TestWorld {
    loader: Box<dyn ConfigLoader>,
    pub reporter: Arc<RecordingHealthReporter>,
    pub launcher: ScriptedLauncher,
    daemon: Option<Daemon>,
    bootstrap_error: Option<BootstrapError>,
    runtime: Option<Runtime>,
}

impl TestWorld {
    /// Builds a world with a successful configuration loader.
    pub fn new() -> Self {
        Self {
            loader: Box::new(TestConfigLoader::new()),
            reporter: Arc::new(RecordingHealthReporter::default()),
            launcher: ScriptedLauncher::default(),
            daemon: None,
            bootstrap_error: None,
            runtime: None,
        }
    }

    pub fn use_successful_loader(&mut self) {
        self.loader = Box::new(TestConfigLoader::new());
    }

    pub fn use_failing_loader(&mut self) {
        self.loader = Box::new(FailingConfigLoader);
    }

    /// Switches to a loader that replays a dump naming `apps`.
    pub fn use_resurrecting_loader(&mut self, apps: &[&str]) -> Result<(), String> {
        let loader = TestConfigLoader::new().resurrecting();
        let descriptors: Vec<_> = apps.iter().map(|name| descriptor(name)).collect();
        let dump = json!({ "version": 1, "saved_at": 0, "apps": descriptors });
        fs::create_dir_all(loader.state_dir()).map_err(|error| error.to_string())?;
        fs::write(loader.state_dir().join("dump.json"), dump.to_string())
            .map_err(|error| error.to_string())?;
        self.loader = Box::new(loader);
        Ok(())
    }

    pub fn bootstrap(&mut self) {
        let reporter: Arc<dyn HealthReporter> = Arc::clone(&self.reporter) as _;
        match bootstrap_with(self.loader.as_ref(), reporter) {
            Ok(daemon) => {
                self.daemon = Some(daemon);
                self.bootstrap_error = None;
            }
            Err(error) => {
                self.daemon = None;
                self.bootstrap_error = Some(error);
            }
        }
    }

    pub fn daemon(&self) -> Option<&Daemon> {
        self.daemon.as_ref()
    }

    pub fn bootstrap_error(&self) -> Option<&BootstrapError> {
        self.bootstrap_error.as_ref()
    }

    /// Starts the supervisor on a paused runtime, lets `settle` pass and
    /// stops it again.
    pub fn start_supervisor(&mut self, settle: Duration) -> Result<(), String> {
        let daemon = self
            .daemon
            .as_ref()
            .ok_or_else(|| "bootstrap has not succeeded".to_owned())?;
        let runtime = self.runtime.get_or_insert_with(paused_runtime);
        let launchers = self.launcher.launchers();
        runtime.block_on(async {
            let supervisor = daemon.start_supervisor(launchers);
            tokio::time::sleep(settle).await;
            supervisor.shutdown().await;
        });
        Ok(())
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

#[fixture]
pub fn world() -> RefCell<TestWorld> {
    RefCell::new(TestWorld::new())
}
