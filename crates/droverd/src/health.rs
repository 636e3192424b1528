//! Structured health reporting for daemon lifecycle events.

use std::sync::Arc;

use crate::bootstrap::BootstrapError;
use crate::supervisor::SupervisorError;

use drover_config::Config;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked after the dump snapshot was replayed.
    fn resurrect_completed(&self, count: usize);

    /// Invoked when the dump snapshot could not be replayed.
    fn resurrect_failed(&self, error: &SupervisorError);

    /// Invoked when daemon shutdown begins.
    fn shutdown_started(&self);

    /// Invoked once every managed process has been stopped.
    fn shutdown_completed(&self, stopped: usize);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn resurrect_completed(&self, count: usize) {
        (**self).resurrect_completed(count);
    }

    fn resurrect_failed(&self, error: &SupervisorError) {
        (**self).resurrect_failed(error);
    }

    fn shutdown_started(&self) {
        (**self).shutdown_started();
    }

    fn shutdown_completed(&self, stopped: usize) {
        (**self).shutdown_completed(stopped);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting daemon bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            socket = %config.daemon_socket(),
            state_dir = %config.state_dir(),
            log_filter = %config.log_filter(),
            log_format = %config.log_format(),
            "daemon bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "daemon bootstrap failed"
        );
    }

    fn resurrect_completed(&self, count: usize) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "resurrect_completed",
            count,
            "dump replayed"
        );
    }

    fn resurrect_failed(&self, error: &SupervisorError) {
        tracing::warn!(
            target: HEALTH_TARGET,
            event = "resurrect_failed",
            category = %error.category(),
            error = %error,
            "dump could not be replayed"
        );
    }

    fn shutdown_started(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "shutdown_started",
            "stopping managed processes"
        );
    }

    fn shutdown_completed(&self, stopped: usize) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "shutdown_completed",
            stopped,
            "managed processes stopped"
        );
    }
}
