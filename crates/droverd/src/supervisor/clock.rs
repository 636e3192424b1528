//! Millisecond wall clock that follows the tokio timer.
//!
//! Timestamps are derived from a wall-clock anchor plus the elapsed tokio
//! [`Instant`], so paused-time tests observe the same clock the timers use.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Clock {
    wall_anchor_ms: u64,
    instant_anchor: Instant,
}

impl Clock {
    pub(crate) fn new() -> Self {
        let wall_anchor_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        Self {
            wall_anchor_ms,
            instant_anchor: Instant::now(),
        }
    }

    /// Milliseconds since the Unix epoch.
    pub(crate) fn now_ms(&self) -> u64 {
        let elapsed = u64::try_from(self.instant_anchor.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.wall_anchor_ms.saturating_add(elapsed)
    }

    pub(crate) fn now_utc(&self) -> DateTime<Utc> {
        let millis = i64::try_from(self.now_ms()).unwrap_or(i64::MAX);
        DateTime::from_timestamp_millis(millis).unwrap_or_default()
    }
}
