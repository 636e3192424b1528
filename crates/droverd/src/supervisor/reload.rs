//! Zero-downtime replacement of a running record.
//!
//! A reload is a small state machine:
//!
//! ```text
//! SpawningNew -> AwaitingNewReady -> NotifyingOld -> AwaitingOldExit -> Done
//!      |                |                (soft only)
//!      +----------------+--> Failed
//! ```
//!
//! The outgoing record is relabelled as the shadow of its identifier and a
//! replacement is launched as the new primary. A hard reload detaches the
//! shadow as soon as the replacement is ready and reaps it in the
//! background. A soft reload asks the shadow to shut down over its channel
//! and waits for it, up to the graceful timeout, before removing it. If the
//! replacement dies before becoming ready the shadow is restored.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use drover_daemon_types::{
    LifecycleEvent, ParentMessage, ProcessId, ProcessMeta, ProcessStatus, ProcessView,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::kill::{self, KillPlan};
use super::registry::{Phase, ProcessRecord};
use super::{Supervisor, SupervisorError};
use crate::launcher::Signaller;

pub(crate) const RELOAD_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::reload");

/// How the outgoing instance is retired.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReloadMode {
    /// Wait for the outgoing instance to finish gracefully.
    Soft,
    /// Drop the outgoing instance as soon as the replacement is ready.
    Hard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
enum ReloadPhase {
    Idle,
    SpawningNew,
    AwaitingNewReady,
    NotifyingOld,
    AwaitingOldExit,
    Done,
    Failed,
}

/// Handle on a shadow that was asked to leave.
struct Retiring {
    phase: watch::Receiver<Phase>,
    signaller: Arc<dyn Signaller>,
    plan: KillPlan,
}

impl Supervisor {
    /// Replaces a running record. Records that are not online are restarted
    /// instead.
    pub async fn reload(
        self: &Arc<Self>,
        id: u32,
        mode: ReloadMode,
    ) -> Result<ProcessView, SupervisorError> {
        self.ensure_accepting()?;
        let _reload = self.lock_reload().await?;
        let _guard = self.lock_id(id).await;
        let status = self.registry().primary(id)?.status;
        if status != ProcessStatus::Online {
            info!(
                target: RELOAD_TARGET,
                id,
                %mode,
                %status,
                "process not online; restarting instead"
            );
            return self.restart_locked(id, BTreeMap::new()).await;
        }
        Handoff::new(self, id, mode).run().await
    }
}

struct Handoff<'a> {
    supervisor: &'a Arc<Supervisor>,
    id: u32,
    mode: ReloadMode,
    phase: ReloadPhase,
}

impl<'a> Handoff<'a> {
    const fn new(supervisor: &'a Arc<Supervisor>, id: u32, mode: ReloadMode) -> Self {
        Self {
            supervisor,
            id,
            mode,
            phase: ReloadPhase::Idle,
        }
    }

    fn enter(&mut self, next: ReloadPhase) {
        debug!(
            target: RELOAD_TARGET,
            id = self.id,
            mode = %self.mode,
            from = %self.phase,
            to = %next,
            "reload transition"
        );
        self.phase = next;
    }

    async fn run(mut self) -> Result<ProcessView, SupervisorError> {
        self.enter(ReloadPhase::SpawningNew);
        if let Err(error) = self.spawn_new().await {
            self.enter(ReloadPhase::Failed);
            return Err(error);
        }

        self.enter(ReloadPhase::AwaitingNewReady);
        if let Err(error) = self.await_new_ready().await {
            self.enter(ReloadPhase::Failed);
            self.abort();
            return Err(error);
        }

        match self.mode {
            ReloadMode::Hard => self.detach_old(),
            ReloadMode::Soft => {
                self.enter(ReloadPhase::NotifyingOld);
                let retiring = self.notify_old();
                self.enter(ReloadPhase::AwaitingOldExit);
                if let Some(retiring) = retiring {
                    self.await_old_exit(retiring).await;
                }
                self.remove_old();
            }
        }

        self.enter(ReloadPhase::Done);
        let supervisor = self.supervisor;
        let registry = supervisor.registry();
        let record = registry.primary(self.id)?;
        info!(
            target: RELOAD_TARGET,
            id = self.id,
            mode = %self.mode,
            pid = record.pid(),
            "reload complete"
        );
        supervisor.bus.lifecycle(
            supervisor.clock.now_ms(),
            record.process_ref(),
            LifecycleEvent::Reload,
            Some(json!({ "mode": self.mode })),
        );
        Ok(record.view())
    }

    /// Relabels the primary as a shadow and launches its replacement.
    async fn spawn_new(&self) -> Result<(), SupervisorError> {
        let supervisor = self.supervisor;
        let id = self.id;
        let replacement = {
            let mut registry = supervisor.registry();
            if !registry.relabel(ProcessId::Primary(id), ProcessId::Shadow(id)) {
                return Err(SupervisorError::configuration(format!(
                    "process {id} is already being reloaded"
                )));
            }
            let shadow = registry
                .get_mut(ProcessId::Shadow(id))
                .ok_or_else(|| SupervisorError::unknown_id(id))?;
            shadow.stopping = true;
            shadow.cancel_restart();
            replacement_for(shadow)
        };
        if let Err(error) = supervisor.launch_record(replacement).await {
            warn!(target: RELOAD_TARGET, id, %error, "replacement failed to launch");
            self.restore_shadow();
            return Err(error);
        }
        Ok(())
    }

    /// Waits for the replacement to come up. Running out the listen timeout
    /// is a fallback, not a failure.
    async fn await_new_ready(&self) -> Result<(), SupervisorError> {
        let (mut phase, wait) = {
            let registry = self.supervisor.registry();
            let record = registry.primary(self.id)?;
            (
                record.watch_phase(),
                Duration::from_millis(record.descriptor.listen_timeout),
            )
        };
        let settled = timeout(wait, async {
            phase
                .wait_for(|current| *current != Phase::Spawned)
                .await
                .map(|current| *current)
        })
        .await;
        match settled {
            Ok(Ok(current)) if current.is_up() => Ok(()),
            Ok(_) => Err(self.replacement_failure()),
            Err(_) => {
                debug!(
                    target: RELOAD_TARGET,
                    id = self.id,
                    waited_ms = wait.as_millis(),
                    "replacement not ready in time; continuing"
                );
                Ok(())
            }
        }
    }

    fn replacement_failure(&self) -> SupervisorError {
        let registry = self.supervisor.registry();
        match registry.primary(self.id) {
            Ok(record) if record.status == ProcessStatus::Errored => SupervisorError::Instability {
                id: self.id,
                max_restarts: record.descriptor.max_restarts,
            },
            _ => SupervisorError::ReloadAborted {
                id: self.id,
                reason: "replacement exited before becoming ready".to_owned(),
            },
        }
    }

    /// Drops the replacement and puts the shadow back as the primary.
    fn abort(&self) {
        let supervisor = self.supervisor;
        let removed = supervisor.registry().remove(ProcessId::Primary(self.id));
        if let Some(mut replacement) = removed {
            replacement.cancel_restart();
            if let Some(child) = replacement.child.take()
                && let Err(error) = child.signaller.signal_tree(nix::sys::signal::Signal::SIGKILL)
            {
                debug!(target: RELOAD_TARGET, id = self.id, %error, "replacement already gone");
            }
        }
        self.restore_shadow();
    }

    fn restore_shadow(&self) {
        let supervisor = self.supervisor;
        let mut registry = supervisor.registry();
        if !registry.relabel(ProcessId::Shadow(self.id), ProcessId::Primary(self.id)) {
            return;
        }
        if let Ok(record) = registry.primary_mut(self.id) {
            record.stopping = false;
            if let Some(pid) = record.pid() {
                let path = supervisor.pid_path(&record.descriptor.name, self.id);
                if let Err(error) =
                    crate::process::files::atomic_write(&path, format!("{pid}\n").as_bytes())
                {
                    warn!(target: RELOAD_TARGET, id = self.id, %error, "failed to restore pid file");
                }
            }
        }
        info!(target: RELOAD_TARGET, id = self.id, "outgoing instance restored");
    }

    /// Hard reload: detaches the shadow and reaps it in the background.
    fn detach_old(&self) {
        let supervisor = self.supervisor;
        let mut registry = supervisor.registry();
        let key = ProcessId::Shadow(self.id);
        let Some(shadow) = registry.get(key) else {
            return;
        };
        let retiring = shadow.child.as_ref().and_then(|child| {
            KillPlan::for_descriptor(&shadow.descriptor)
                .ok()
                .map(|plan| Retiring {
                    phase: shadow.watch_phase(),
                    signaller: Arc::clone(&child.signaller),
                    plan,
                })
        });
        let Some(retiring) = retiring else {
            registry.remove(key);
            return;
        };
        registry.detach(key);
        drop(registry);
        let id = self.id;
        tokio::spawn(async move {
            let outcome =
                kill::terminate(retiring.signaller.as_ref(), retiring.phase, &retiring.plan).await;
            debug!(target: RELOAD_TARGET, id, %outcome, "outgoing instance reaped");
        });
    }

    /// Soft reload: asks the shadow to shut down over its channel, falling
    /// back to its kill signal when it has none.
    fn notify_old(&self) -> Option<Retiring> {
        let registry = self.supervisor.registry();
        let shadow = registry.get(ProcessId::Shadow(self.id))?;
        let child = shadow.child.as_ref()?;
        let plan = KillPlan::for_descriptor(&shadow.descriptor).ok()?;
        let delivered = child
            .channel
            .as_ref()
            .is_some_and(|channel| channel.send(ParentMessage::Shutdown).is_ok());
        if !delivered && let Err(error) = child.signaller.signal(plan.signal) {
            debug!(target: RELOAD_TARGET, id = self.id, %error, "shutdown signal not delivered");
        }
        Some(Retiring {
            phase: shadow.watch_phase(),
            signaller: Arc::clone(&child.signaller),
            plan,
        })
    }

    async fn await_old_exit(&self, retiring: Retiring) {
        let Retiring {
            mut phase,
            signaller,
            plan,
        } = retiring;
        let grace = self.supervisor.settings.graceful_timeout;
        if timeout(grace, kill::wait_exited(&mut phase)).await.is_ok() {
            return;
        }
        warn!(
            target: RELOAD_TARGET,
            id = self.id,
            grace_ms = grace.as_millis(),
            "outgoing instance ignored shutdown; killing"
        );
        kill::terminate(signaller.as_ref(), phase, &plan).await;
    }

    fn remove_old(&self) {
        let mut registry = self.supervisor.registry();
        let key = ProcessId::Shadow(self.id);
        let still_running = registry
            .get(key)
            .is_some_and(|shadow| shadow.child.is_some());
        if still_running {
            registry.detach(key);
        } else {
            registry.remove(key);
        }
    }
}

/// A fresh record taking over from `shadow`: same descriptor, ordinal and
/// log sinks; restart count incremented and instability counters reset.
fn replacement_for(shadow: &ProcessRecord) -> ProcessRecord {
    let meta = ProcessMeta {
        restart_time: shadow.meta.restart_time.saturating_add(1),
        unstable_restarts: 0,
        prev_restart_delay: 0,
        exit_code: None,
        ..shadow.meta.clone()
    };
    let mut record = ProcessRecord::new(shadow.id(), shadow.descriptor.clone(), meta, 0);
    record.watching = shadow.watching;
    record.monitored = shadow.monitored;
    record.logs = shadow.logs.clone();
    record
}
