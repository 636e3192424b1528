//! Scenario world driving an isolated supervisor on paused tokio time.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::runtime::Runtime;
use tokio::sync::broadcast::{self, error::TryRecvError};

use drover_config::StatePaths;
use drover_daemon_types::{AppDescriptor, BusEvent, LifecycleEvent, ProcessStatus, ProcessView};

use crate::supervisor::{Supervisor, SupervisorError, SupervisorSettings};

use super::launcher::{ChildScript, ScriptedLauncher};

/// Upper bound used when polling for a status change.
const SETTLE_LIMIT: Duration = Duration::from_secs(120);
const SETTLE_STEP: Duration = Duration::from_millis(10);

/// Builds a current-thread runtime whose clock only moves when idle.
pub fn paused_runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .expect("failed to build paused runtime")
}

/// Descriptor with defaults for everything but the name.
pub fn descriptor(name: &str) -> AppDescriptor {
    AppDescriptor::new(name, format!("/srv/{name}/server"))
}

pub struct SupervisorWorld {
    runtime: Runtime,
    state: TempDir,
    pub launcher: ScriptedLauncher,
    supervisor: Arc<Supervisor>,
    events: broadcast::Receiver<BusEvent>,
    seen: Vec<BusEvent>,
    pub ids: Vec<u32>,
    pub pending: AppDescriptor,
    pub last: Option<Result<ProcessView, SupervisorError>>,
    pub observed: Vec<u64>,
    pub mark: usize,
    pub launch_mark: usize,
    pub failure: Option<String>,
}

impl SupervisorWorld {
    pub fn new() -> Self {
        Self::with_settings(SupervisorSettings::default())
    }

    pub fn with_settings(settings: SupervisorSettings) -> Self {
        let state = TempDir::new().expect("failed to create state directory");
        let paths = StatePaths::create(state.path()).expect("failed to prepare state directory");
        let runtime = paused_runtime();
        let launcher = ScriptedLauncher::new(ChildScript::long_running());
        let launchers = launcher.launchers();
        let supervisor = runtime.block_on(async { Supervisor::start(paths, settings, launchers) });
        let events = supervisor.subscribe();
        Self {
            runtime,
            state,
            launcher,
            supervisor,
            events,
            seen: Vec::new(),
            ids: Vec::new(),
            pending: descriptor("api"),
            last: None,
            observed: Vec::new(),
            mark: 0,
            launch_mark: 0,
            failure: None,
        }
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    pub fn state_dir(&self) -> &std::path::Path {
        self.state.path()
    }

    /// Drives `future` to completion on the world's runtime.
    pub fn run<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Lets virtual time pass so timers and hook tasks run.
    pub fn advance(&self, duration: Duration) {
        self.run(async move { tokio::time::sleep(duration).await });
    }

    /// Prepares the pending descriptor.
    pub fn prepare_pending(&mut self) -> Result<Vec<ProcessView>, String> {
        let pending = self.pending.clone();
        self.prepare(pending)
    }

    /// Records the outcome of a single-record operation.
    pub fn record<F>(&mut self, operation: F)
    where
        F: Future<Output = Result<ProcessView, SupervisorError>>,
    {
        let result = self.run(operation);
        // Let exit notices and follow-up tasks land.
        self.advance(Duration::from_millis(1));
        self.last = Some(result);
    }

    pub fn last_view(&self) -> Result<&ProcessView, String> {
        match &self.last {
            Some(Ok(view)) => Ok(view),
            Some(Err(error)) => Err(format!("operation failed: {error}")),
            None => Err("no operation recorded".to_owned()),
        }
    }

    pub fn last_error(&self) -> Result<&SupervisorError, String> {
        match &self.last {
            Some(Err(error)) => Ok(error),
            Some(Ok(view)) => Err(format!("operation succeeded with {}", view.status)),
            None => Err("no operation recorded".to_owned()),
        }
    }

    /// Prepares `descriptor` and remembers the identifiers it produced.
    pub fn prepare(&mut self, descriptor: AppDescriptor) -> Result<Vec<ProcessView>, String> {
        let supervisor = Arc::clone(&self.supervisor);
        let views = self
            .run(async move { supervisor.prepare(descriptor).await })
            .map_err(|error| error.to_string())?;
        self.ids.extend(views.iter().map(|view| view.pm_id));
        // Let hook tasks observe the spawn.
        self.advance(Duration::from_millis(1));
        Ok(views)
    }

    pub fn first_id(&self) -> Result<u32, String> {
        self.ids
            .first()
            .copied()
            .ok_or_else(|| "no process has been prepared".to_owned())
    }

    pub fn view(&self, id: u32) -> Result<ProcessView, String> {
        self.supervisor.process(id).map_err(|error| error.to_string())
    }

    pub fn status(&self, id: u32) -> Result<ProcessStatus, String> {
        self.view(id).map(|view| view.status)
    }

    /// Advances time in small steps until `id` reaches `expected`.
    pub fn settle_on(&self, id: u32, expected: ProcessStatus) -> Result<ProcessView, String> {
        let mut waited = Duration::ZERO;
        loop {
            let view = self.view(id)?;
            if view.status == expected {
                return Ok(view);
            }
            if waited >= SETTLE_LIMIT {
                return Err(format!(
                    "process {id} stayed {} instead of reaching {expected}",
                    view.status
                ));
            }
            self.advance(SETTLE_STEP);
            waited += SETTLE_STEP;
        }
    }

    /// Every bus event published so far.
    pub fn events(&mut self) -> &[BusEvent] {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.seen.push(event),
                Err(TryRecvError::Lagged(_)) => {}
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
        &self.seen
    }

    pub fn lifecycle_count(&mut self, event: LifecycleEvent) -> usize {
        self.events()
            .iter()
            .filter(|seen| seen.lifecycle_event() == Some(event))
            .count()
    }

    /// Stops everything so hook tasks do not outlive the scenario.
    pub fn shutdown(&self) -> usize {
        let supervisor = Arc::clone(&self.supervisor);
        self.run(async move { supervisor.shutdown().await })
    }
}

impl Default for SupervisorWorld {
    fn default() -> Self {
        Self::new()
    }
}
