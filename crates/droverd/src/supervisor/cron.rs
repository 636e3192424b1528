//! Time-triggered soft reloads.
//!
//! Each process with a cron expression owns one job keyed by its identifier.
//! A job sleeps until the next occurrence and then asks the control loop to
//! reload the process. Five-field expressions are accepted by prefixing a
//! zero seconds field.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use cron::Schedule;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::SupervisorError;
use super::clock::Clock;
use super::control::ControlEvent;

pub(crate) const CRON_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::cron");

#[derive(Debug)]
struct CronJob {
    expression: String,
    cancel: CancellationToken,
}

/// Registered cron jobs.
#[derive(Debug)]
pub(crate) struct CronScheduler {
    jobs: Mutex<HashMap<u32, CronJob>>,
    clock: Clock,
    control: UnboundedSender<ControlEvent>,
}

/// Parses an expression, accepting the classic five-field form.
pub(crate) fn parse_schedule(expression: &str) -> Result<Schedule, SupervisorError> {
    Schedule::from_str(&normalise(expression)).map_err(|source| SupervisorError::InvalidCron {
        expression: expression.to_owned(),
        source,
    })
}

fn normalise(expression: &str) -> String {
    let trimmed = expression.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_owned()
    }
}

impl CronScheduler {
    pub(crate) fn new(clock: Clock, control: UnboundedSender<ControlEvent>) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            clock,
            control,
        }
    }

    /// Registers the job of process `id`.
    ///
    /// Registering the same expression again is a no-op and returns `false`;
    /// a different expression replaces the running job.
    pub(crate) fn register(&self, id: u32, expression: &str) -> Result<bool, SupervisorError> {
        let schedule = parse_schedule(expression)?;
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(job) = jobs.get(&id) {
            if job.expression == expression {
                return Ok(false);
            }
            job.cancel.cancel();
        }
        let cancel = CancellationToken::new();
        tokio::spawn(run_job(
            id,
            schedule,
            self.clock,
            self.control.clone(),
            cancel.clone(),
        ));
        info!(target: CRON_TARGET, id, expression, "registered cron job");
        jobs.insert(
            id,
            CronJob {
                expression: expression.to_owned(),
                cancel,
            },
        );
        Ok(true)
    }

    pub(crate) fn deregister(&self, id: u32) -> bool {
        let removed = self
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        match removed {
            Some(job) => {
                job.cancel.cancel();
                debug!(target: CRON_TARGET, id, "deregistered cron job");
                true
            }
            None => false,
        }
    }

    pub(crate) fn clear(&self) {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        for job in jobs.values() {
            job.cancel.cancel();
        }
        jobs.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for CronScheduler {
    fn drop(&mut self) {
        self.clear();
    }
}

async fn run_job(
    id: u32,
    schedule: Schedule,
    clock: Clock,
    control: UnboundedSender<ControlEvent>,
    cancel: CancellationToken,
) {
    loop {
        let now = clock.now_utc();
        let Some(next) = schedule.after(&now).next() else {
            debug!(target: CRON_TARGET, id, "schedule has no further occurrences");
            return;
        };
        let wait = (next - now).to_std().unwrap_or_default();
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(wait) => {}
        }
        debug!(target: CRON_TARGET, id, at = %next, "cron job fired");
        if control.send(ControlEvent::CronFired { id }).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::rstest;
    use tokio::sync::mpsc;

    use super::*;

    #[rstest]
    #[case("* * * * *", "0 * * * * *")]
    #[case("30 */5 * * * *", "30 */5 * * * *")]
    #[case("  0 3 * * 1 ", "0 0 3 * * 1")]
    fn normalises_five_field_expressions(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalise(input), expected);
    }

    #[test]
    fn invalid_expressions_are_configuration_errors() {
        let error = parse_schedule("every tuesday").err();
        assert!(matches!(error, Some(SupervisorError::InvalidCron { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_per_minute_and_ignores_duplicate_registration() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let scheduler = CronScheduler::new(Clock::new(), sender);

        assert!(matches!(scheduler.register(7, "* * * * *"), Ok(true)));
        assert!(matches!(scheduler.register(7, "* * * * *"), Ok(false)));
        assert_eq!(scheduler.len(), 1);

        tokio::time::sleep(Duration::from_secs(180)).await;
        scheduler.clear();

        let mut fired = 0;
        while let Ok(event) = receiver.try_recv() {
            assert_eq!(event, ControlEvent::CronFired { id: 7 });
            fired += 1;
        }
        assert_eq!(fired, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn deregistered_jobs_stop_firing() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let scheduler = CronScheduler::new(Clock::new(), sender);
        assert!(matches!(scheduler.register(1, "* * * * *"), Ok(true)));
        assert!(scheduler.deregister(1));
        assert!(!scheduler.deregister(1));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(receiver.try_recv().is_err());
    }
}
