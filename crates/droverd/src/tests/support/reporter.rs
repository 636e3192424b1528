//! Test double for [`HealthReporter`] that records structured events for assertions.

use std::sync::Mutex;

use drover_config::Config;

use crate::bootstrap::BootstrapError;
use crate::health::HealthReporter;
use crate::supervisor::SupervisorError;

/// Structured health events tracked during scenarios.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HealthEvent {
    BootstrapStarting,
    BootstrapSucceeded,
    BootstrapFailed(String),
    ResurrectCompleted(usize),
    ResurrectFailed(String),
    ShutdownStarted,
    ShutdownCompleted(usize),
}

/// Records health events for assertions.
#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    /// Captures a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    pub fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config) {
        self.record(HealthEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn resurrect_completed(&self, count: usize) {
        self.record(HealthEvent::ResurrectCompleted(count));
    }

    fn resurrect_failed(&self, error: &SupervisorError) {
        self.record(HealthEvent::ResurrectFailed(error.to_string()));
    }

    fn shutdown_started(&self) {
        self.record(HealthEvent::ShutdownStarted);
    }

    fn shutdown_completed(&self, stopped: usize) {
        self.record(HealthEvent::ShutdownCompleted(stopped));
    }
}
