//! Shared doubles and scenario worlds for the daemon test suites.

mod config_loader;
mod launcher;
mod process_world;
mod reporter;
mod supervisor_world;
#[path = "world.rs"]
mod test_world;

pub use config_loader::{FailingConfigLoader, TestConfigLoader};
pub use launcher::{ChildScript, Launch, ScriptedLauncher};
pub use process_world::{ProcessTestWorld, snapshot_status};
pub use reporter::{HealthEvent, RecordingHealthReporter};
pub use supervisor_world::{SupervisorWorld, descriptor, paused_runtime};
pub use test_world::{TestWorld, world};

/// Result type shared by behaviour steps.
pub type StepResult = Result<(), String>;
