//! Supervisor core: the registry of managed processes and every operation
//! that mutates it.
//!
//! A [`Supervisor`] is an explicit context object. It owns the registry, the
//! launchers, the event bus, the cron scheduler, the watchers, the
//! process-wide reload lock and the daemon-wide shutdown flag, so isolated
//! instances can run side by side in tests.
//!
//! Child notices (output, channel messages, exits) and timer triggers (watch,
//! cron, readiness timeouts) are funnelled through one control loop that
//! applies them in arrival order. Operations on one identifier are serialised
//! behind a per-identifier lock; reload-class operations additionally hold
//! the process-wide reload lock, always acquired first. The registry mutex is
//! never held across an await point.

mod bus;
pub(crate) mod clock;
pub(crate) mod control;
mod cron;
mod dump;
mod errors;
mod events;
mod execute;
mod inspect;
mod kill;
mod lifecycle;
pub(crate) mod logs;
mod messaging;
mod monitor;
mod policy;
mod registry;
mod reload;
mod watch;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use drover_config::{Config, StatePaths};
use drover_daemon_types::{BusEvent, ProcessView};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard, OwnedMutexGuard, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use self::bus::EventBus;
pub use self::errors::SupervisorError;
pub use self::reload::ReloadMode;

use self::clock::Clock;
use self::control::{ControlEvent, run_control_loop};
use self::cron::CronScheduler;
use self::monitor::ResourceSampler;
use self::registry::Registry;
use self::watch::WatchRegistry;
use crate::launcher::Launchers;

pub(crate) const SUPERVISOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::supervisor");

/// Tunables of a supervisor instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorSettings {
    /// Window for acquiring the reload lock.
    pub reload_lock_timeout: Duration,
    /// Grace period granted to the outgoing instance of a soft reload.
    pub graceful_timeout: Duration,
    /// Fan-out limit for name-scoped operations.
    pub concurrent_actions: usize,
    /// Fan-out limit for bulk delete and shutdown.
    pub bulk_concurrency: usize,
    /// Per-subscriber backlog of the event bus.
    pub bus_capacity: usize,
    /// CPU count used to resolve instance counts.
    pub cpus: usize,
}

impl SupervisorSettings {
    /// Derives settings from the shared configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            reload_lock_timeout: config.reload_lock_timeout(),
            graceful_timeout: config.graceful_timeout(),
            concurrent_actions: config.concurrent_actions(),
            bulk_concurrency: config.bulk_concurrency(),
            bus_capacity: config.bus_capacity(),
            cpus: host_cpus(),
        }
    }
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

fn host_cpus() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}

/// The supervisor context shared by every RPC handler.
pub struct Supervisor {
    registry: Mutex<Registry>,
    id_locks: Mutex<HashMap<u32, Arc<AsyncMutex<()>>>>,
    reload_lock: AsyncMutex<()>,
    allocation: AsyncMutex<()>,
    being_killed: AtomicBool,
    next_launch: AtomicU64,
    bus: EventBus,
    launchers: Launchers,
    cron: CronScheduler,
    watchers: WatchRegistry,
    sampler: ResourceSampler,
    paths: StatePaths,
    settings: SupervisorSettings,
    clock: Clock,
    control: UnboundedSender<ControlEvent>,
    closed: CancellationToken,
    started_at: u64,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Supervisor")
            .field("state_dir", &self.paths.root())
            .field("settings", &self.settings)
            .field("being_killed", &self.is_being_killed())
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// Builds a supervisor and starts its control loop. Must run inside the
    /// tokio runtime.
    #[must_use]
    pub fn start(paths: StatePaths, settings: SupervisorSettings, launchers: Launchers) -> Arc<Self> {
        let (control, events) = mpsc::unbounded_channel();
        let clock = Clock::new();
        let closed = CancellationToken::new();
        let supervisor = Arc::new(Self {
            registry: Mutex::new(Registry::default()),
            id_locks: Mutex::new(HashMap::new()),
            reload_lock: AsyncMutex::new(()),
            allocation: AsyncMutex::new(()),
            being_killed: AtomicBool::new(false),
            next_launch: AtomicU64::new(1),
            bus: EventBus::new(settings.bus_capacity),
            launchers,
            cron: CronScheduler::new(clock, control.clone()),
            watchers: WatchRegistry::new(control.clone()),
            sampler: ResourceSampler::new(),
            paths,
            settings,
            clock,
            control,
            closed: closed.clone(),
            started_at: clock.now_ms(),
        });
        tokio::spawn(run_control_loop(Arc::downgrade(&supervisor), events, closed));
        info!(
            target: SUPERVISOR_TARGET,
            state_dir = %supervisor.paths.root().display(),
            "supervisor started"
        );
        supervisor
    }

    /// Registers a bus subscriber.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.bus.subscribe()
    }

    /// The event bus.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Whether daemon-wide shutdown has begun.
    #[must_use]
    pub fn is_being_killed(&self) -> bool {
        self.being_killed.load(Ordering::SeqCst)
    }

    /// Snapshot of one primary record.
    pub fn process(&self, id: u32) -> Result<ProcessView, SupervisorError> {
        self.registry().primary(id).map(registry::ProcessRecord::view)
    }

    /// Snapshot of every record, shadows included.
    #[must_use]
    pub fn processes(&self) -> Vec<ProcessView> {
        self.registry().views()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_accepting(&self) -> Result<(), SupervisorError> {
        if self.is_being_killed() {
            Err(SupervisorError::ShuttingDown)
        } else {
            Ok(())
        }
    }

    fn next_launch(&self) -> u64 {
        self.next_launch.fetch_add(1, Ordering::SeqCst)
    }

    async fn lock_id(&self, id: u32) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.id_locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(id).or_default())
        };
        lock.lock_owned().await
    }

    fn forget_id_lock(&self, id: u32) {
        self.id_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    async fn lock_reload(&self) -> Result<AsyncMutexGuard<'_, ()>, SupervisorError> {
        let window = self.settings.reload_lock_timeout;
        tokio::time::timeout(window, self.reload_lock.lock())
            .await
            .map_err(|_| SupervisorError::ReloadLocked {
                waited_ms: u64::try_from(window.as_millis()).unwrap_or(u64::MAX),
            })
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}
