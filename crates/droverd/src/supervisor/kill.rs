//! Graceful-then-forced termination of a child.

use std::time::Duration;

use drover_daemon_types::AppDescriptor;
use nix::sys::signal::Signal;
use tokio::sync::watch;
use tokio::time::{Instant, timeout};
use tracing::{debug, warn};

use super::registry::Phase;
use super::{SUPERVISOR_TARGET, SupervisorError};
use crate::launcher::{Signaller, parse_signal};

/// Bound on waiting for a child after the forced signal.
const FORCED_EXIT_WAIT: Duration = Duration::from_secs(5);

/// How a record's child is asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct KillPlan {
    pub(crate) signal: Signal,
    pub(crate) timeout: Duration,
    pub(crate) retry: Duration,
    pub(crate) treekill: bool,
}

impl KillPlan {
    pub(crate) fn for_descriptor(descriptor: &AppDescriptor) -> Result<Self, SupervisorError> {
        let signal =
            parse_signal(&descriptor.kill_signal).ok_or_else(|| SupervisorError::InvalidSignal {
                signal: descriptor.kill_signal.clone(),
            })?;
        Ok(Self {
            signal,
            timeout: Duration::from_millis(descriptor.kill_timeout),
            retry: Duration::from_millis(descriptor.kill_retry_time.max(1)),
            treekill: descriptor.treekill,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum KillOutcome {
    /// Exited after the graceful signal.
    Graceful,
    /// Exited after the forced signal.
    Forced,
    /// Still running after the forced signal.
    Unresponsive,
}

/// Sends the graceful signal, polls for exit every `retry` until `timeout`,
/// then escalates to `SIGKILL`.
pub(crate) async fn terminate(
    signaller: &dyn Signaller,
    mut phase: watch::Receiver<Phase>,
    plan: &KillPlan,
) -> KillOutcome {
    if has_exited(&phase) {
        return KillOutcome::Graceful;
    }
    if let Err(error) = signaller.signal(plan.signal) {
        debug!(
            target: SUPERVISOR_TARGET,
            signal = %plan.signal,
            %error,
            "graceful signal not delivered"
        );
    }

    let deadline = Instant::now() + plan.timeout;
    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        let window = plan.retry.min(deadline - now);
        if timeout(window, wait_exited(&mut phase)).await.is_ok() {
            return KillOutcome::Graceful;
        }
    }

    let forced = if plan.treekill {
        signaller.signal_tree(Signal::SIGKILL)
    } else {
        signaller.signal(Signal::SIGKILL)
    };
    if let Err(error) = forced {
        debug!(target: SUPERVISOR_TARGET, %error, "forced signal not delivered");
    }
    match timeout(FORCED_EXIT_WAIT, wait_exited(&mut phase)).await {
        Ok(()) => KillOutcome::Forced,
        Err(_) => {
            warn!(
                target: SUPERVISOR_TARGET,
                waited_ms = FORCED_EXIT_WAIT.as_millis(),
                "child survived SIGKILL"
            );
            KillOutcome::Unresponsive
        }
    }
}

fn has_exited(phase: &watch::Receiver<Phase>) -> bool {
    *phase.borrow() == Phase::Exited || phase.has_changed().is_err()
}

/// Resolves once the launch is over. A dropped sender means the record moved
/// on to another launch, which only happens after this one exited.
pub(crate) async fn wait_exited(phase: &mut watch::Receiver<Phase>) {
    let _ = phase.wait_for(|current| *current == Phase::Exited).await;
}
