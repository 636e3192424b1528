//! Publish/subscribe channel for lifecycle events, child messages and logs.

use drover_daemon_types::{BusEvent, LifecycleEvent, ProcessRef};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

use super::SUPERVISOR_TARGET;

/// Fan-out channel with any number of subscribers.
///
/// Slow subscribers lag rather than block publishers; the receiver reports
/// how many events it missed.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BusEvent>,
}

impl EventBus {
    /// Builds a bus retaining up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to every current subscriber.
    pub fn publish(&self, event: BusEvent) {
        if let Err(unsent) = self.sender.send(event) {
            trace!(
                target: SUPERVISOR_TARGET,
                topic = %unsent.0.topic,
                "no bus subscribers"
            );
        }
    }

    /// Publishes a lifecycle transition.
    pub fn lifecycle(
        &self,
        at: u64,
        process: ProcessRef,
        event: LifecycleEvent,
        detail: Option<Value>,
    ) {
        self.publish(BusEvent::lifecycle(at, process, event, detail));
    }

    /// Registers a new subscriber.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }
}
