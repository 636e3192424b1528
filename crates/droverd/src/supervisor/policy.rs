//! Restart policy arithmetic.
//!
//! Both rules are kept free of IO so they can be checked against exact
//! timings: the instability counter that eventually marks a process errored,
//! and the delay applied before an automatic restart.

use drover_daemon_types::{AppDescriptor, ProcessMeta};

/// Upper bound of the exponential restart backoff.
pub(crate) const BACKOFF_CEILING_MS: u64 = 15_000;

/// Uptime after which an exit is considered healthy and the backoff resets.
pub(crate) const BACKOFF_RESET_UPTIME_MS: u64 = 30_000;

/// Whether an exit at `now` counts towards the instability limit.
///
/// The process must still be inside its instability window
/// (`min_uptime * max_restarts` since creation) and must have run for less
/// than `min_uptime` since its last launch.
pub(crate) fn is_unstable_exit(descriptor: &AppDescriptor, meta: &ProcessMeta, now: u64) -> bool {
    let window = descriptor
        .min_uptime
        .saturating_mul(u64::from(descriptor.max_restarts));
    now.saturating_sub(meta.created_at) < window
        && now.saturating_sub(meta.pm_uptime) < descriptor.min_uptime
}

/// Whether the unstable restart counter has reached the configured limit.
///
/// A limit of zero disables the check.
pub(crate) const fn is_overlimit(descriptor: &AppDescriptor, meta: &ProcessMeta) -> bool {
    descriptor.max_restarts > 0 && meta.unstable_restarts >= descriptor.max_restarts
}

/// Computes the delay before the next automatic restart and records it.
///
/// A fixed `restart_delay` wins. Otherwise an exponential backoff starts at
/// `exp_backoff_restart_delay` and grows by half on every consecutive crash,
/// capped at [`BACKOFF_CEILING_MS`] (or the initial delay when that is
/// larger). A run of at least [`BACKOFF_RESET_UPTIME_MS`] resets the backoff.
pub(crate) fn next_restart_delay(
    descriptor: &AppDescriptor,
    meta: &mut ProcessMeta,
    uptime_ms: u64,
) -> u64 {
    if uptime_ms >= BACKOFF_RESET_UPTIME_MS {
        meta.prev_restart_delay = 0;
    }
    if descriptor.restart_delay > 0 {
        return descriptor.restart_delay;
    }
    let initial = descriptor.exp_backoff_restart_delay;
    if initial == 0 {
        return 0;
    }
    let previous = meta.prev_restart_delay;
    let next = if previous > 0 {
        let ceiling = BACKOFF_CEILING_MS.max(initial);
        previous.saturating_add(previous / 2).min(ceiling)
    } else {
        initial
    };
    meta.prev_restart_delay = next;
    next
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn descriptor(max_restarts: u32, min_uptime: u64) -> AppDescriptor {
        AppDescriptor {
            max_restarts,
            min_uptime,
            ..AppDescriptor::new("api", "server")
        }
    }

    fn meta(created_at: u64, pm_uptime: u64) -> ProcessMeta {
        ProcessMeta {
            created_at,
            pm_uptime,
            ..ProcessMeta::default()
        }
    }

    #[rstest]
    #[case(meta(0, 0), 100, true)]
    #[case(meta(0, 0), 1_000, false)]
    #[case(meta(0, 1_500), 1_900, true)]
    #[case(meta(0, 1_950), 2_050, false)]
    fn counts_only_recent_short_runs(
        #[case] meta: ProcessMeta,
        #[case] now: u64,
        #[case] expected: bool,
    ) {
        assert_eq!(is_unstable_exit(&descriptor(2, 1_000), &meta, now), expected);
    }

    #[rstest]
    #[case(2, 1, false)]
    #[case(2, 2, true)]
    #[case(0, 9, false)]
    fn limit_is_inclusive(#[case] max_restarts: u32, #[case] unstable: u32, #[case] expected: bool) {
        let meta = ProcessMeta {
            unstable_restarts: unstable,
            ..ProcessMeta::default()
        };
        assert_eq!(is_overlimit(&descriptor(max_restarts, 1_000), &meta), expected);
    }

    #[test]
    fn fixed_delay_wins_over_backoff() {
        let descriptor = AppDescriptor {
            restart_delay: 250,
            exp_backoff_restart_delay: 100,
            ..AppDescriptor::new("api", "server")
        };
        let mut meta = ProcessMeta::default();
        assert_eq!(next_restart_delay(&descriptor, &mut meta, 10), 250);
        assert_eq!(meta.prev_restart_delay, 0);
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let descriptor = AppDescriptor {
            exp_backoff_restart_delay: 4_000,
            ..AppDescriptor::new("api", "server")
        };
        let mut meta = ProcessMeta::default();
        let delays: Vec<u64> = (0..5)
            .map(|_| next_restart_delay(&descriptor, &mut meta, 10))
            .collect();
        assert_eq!(delays, vec![4_000, 6_000, 9_000, 13_500, 15_000]);
        assert!(delays.windows(2).all(|pair| pair.first() <= pair.get(1)));
    }

    #[test]
    fn long_uptime_resets_backoff() {
        let descriptor = AppDescriptor {
            exp_backoff_restart_delay: 100,
            ..AppDescriptor::new("api", "server")
        };
        let mut meta = ProcessMeta {
            prev_restart_delay: 8_000,
            ..ProcessMeta::default()
        };
        assert_eq!(
            next_restart_delay(&descriptor, &mut meta, BACKOFF_RESET_UPTIME_MS),
            100
        );
    }

    #[test]
    fn no_policy_restarts_immediately() {
        let mut meta = ProcessMeta::default();
        assert_eq!(
            next_restart_delay(&descriptor(16, 1_000), &mut meta, 10),
            0
        );
    }
}
