//! Applying control-loop events: child notices, exits and triggers.

use std::sync::{Arc, Weak};
use std::time::Duration;

use drover_daemon_types::{BusEvent, ChildMessage, LifecycleEvent, ProcessStatus};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::control::{ChildEvent, ControlEvent};
use super::registry::{Phase, ProcessRecord};
use super::reload::ReloadMode;
use super::{SUPERVISOR_TARGET, Supervisor, policy};
use crate::launcher::ExitOutcome;

impl Supervisor {
    /// Applies one control event. Never blocks; follow-up work that needs to
    /// wait is spawned.
    pub(crate) fn apply(self: &Arc<Self>, event: ControlEvent) {
        match event {
            ControlEvent::Child { launch, event } => match event {
                ChildEvent::Message(message) => self.on_message(launch, message),
                ChildEvent::ReadyTimeout => self.on_ready_timeout(launch),
                ChildEvent::Exited(outcome) => self.handle_exit(launch, outcome),
            },
            ControlEvent::WatchTriggered { name } => self.on_watch_triggered(name),
            ControlEvent::CronFired { id } => self.on_cron_fired(id),
        }
    }

    fn on_message(&self, launch: u64, message: ChildMessage) {
        let now = self.clock.now_ms();
        let mut registry = self.registry();
        let Some(key) = registry.key_for_launch(launch) else {
            if let Some(record) = registry.by_launch(launch) {
                publish_message(&self.bus, now, record, message);
            }
            return;
        };
        let Some(record) = registry.get_mut(key) else {
            return;
        };
        match message {
            ChildMessage::Ready => {
                if record.status == ProcessStatus::Launching {
                    record.status = ProcessStatus::Online;
                    self.bus
                        .lifecycle(now, record.process_ref(), LifecycleEvent::Online, None);
                }
                record.set_phase(Phase::Ready);
                self.bus
                    .lifecycle(now, record.process_ref(), LifecycleEvent::Ready, None);
            }
            ChildMessage::RuntimeVersion { version } => {
                record.runtime_version = Some(version.clone());
                self.bus.lifecycle(
                    now,
                    record.process_ref(),
                    LifecycleEvent::RuntimeVersion,
                    Some(json!({ "version": version })),
                );
            }
            other => publish_message(&self.bus, now, record, other),
        }
    }

    fn on_ready_timeout(&self, launch: u64) {
        let mut registry = self.registry();
        let Some(record) = registry
            .key_for_launch(launch)
            .and_then(|key| registry.get_mut(key))
        else {
            return;
        };
        if record.status != ProcessStatus::Launching {
            return;
        }
        debug!(
            target: SUPERVISOR_TARGET,
            id = record.id(),
            wait_ms = record.descriptor.listen_timeout,
            "no ready message; treating process as online"
        );
        record.status = ProcessStatus::Online;
        record.set_phase(Phase::Online);
        self.bus.lifecycle(
            self.clock.now_ms(),
            record.process_ref(),
            LifecycleEvent::Online,
            Some(json!({ "ready_timeout": true })),
        );
    }

    /// The restart policy: decides what follows the exit of a launch.
    fn handle_exit(self: &Arc<Self>, launch: u64, outcome: ExitOutcome) {
        let now = self.clock.now_ms();
        let detail = json!({ "code": outcome.code, "signal": outcome.signal });
        let mut registry = self.registry();

        let Some(key) = registry.key_for_launch(launch) else {
            if let Some(record) = registry.take_detached(launch) {
                record.set_phase(Phase::Exited);
                self.bus.lifecycle(
                    now,
                    record.process_ref(),
                    LifecycleEvent::Exit,
                    Some(detail),
                );
            } else {
                debug!(target: SUPERVISOR_TARGET, launch, "exit of a forgotten launch");
            }
            return;
        };
        let Some(record) = registry.get_mut(key) else {
            return;
        };

        let uptime = now.saturating_sub(record.meta.pm_uptime);
        let stopping = record.stopping || !record.descriptor.autorestart;
        record.child = None;
        record.meta.exit_code = outcome.code;
        record.set_phase(Phase::Exited);

        if key.is_shadow() {
            record.status = ProcessStatus::Stopped;
            self.bus
                .lifecycle(now, record.process_ref(), LifecycleEvent::Exit, Some(detail));
            return;
        }
        self.remove_pid_file(&record.descriptor.name, record.id());

        if policy::is_unstable_exit(&record.descriptor, &record.meta, now) {
            record.meta.unstable_restarts = record.meta.unstable_restarts.saturating_add(1);
        }
        let overlimit = policy::is_overlimit(&record.descriptor, &record.meta);
        if overlimit {
            warn!(
                target: SUPERVISOR_TARGET,
                id = record.id(),
                app = %record.descriptor.name,
                max_restarts = record.descriptor.max_restarts,
                "restart limit reached; process errored"
            );
            record.status = ProcessStatus::Errored;
            record.meta.unstable_restarts = 0;
            record.meta.prev_restart_delay = 0;
            self.bus.lifecycle(
                now,
                record.process_ref(),
                LifecycleEvent::RestartOverlimit,
                None,
            );
        } else if !record.stopping && !record.descriptor.autorestart {
            record.status = ProcessStatus::Stopped;
        }

        info!(
            target: SUPERVISOR_TARGET,
            id = record.id(),
            app = %record.descriptor.name,
            code = ?outcome.code,
            signal = ?outcome.signal,
            uptime_ms = uptime,
            "process exited"
        );
        self.bus
            .lifecycle(now, record.process_ref(), LifecycleEvent::Exit, Some(detail));

        if stopping || overlimit || self.is_being_killed() {
            return;
        }
        let delay = policy::next_restart_delay(&record.descriptor, &mut record.meta, uptime);
        self.schedule_restart(record, delay);
    }

    /// Arms a cancellable delayed restart of `record`.
    fn schedule_restart(self: &Arc<Self>, record: &mut ProcessRecord, delay_ms: u64) {
        record.cancel_restart();
        record.status = ProcessStatus::WaitingRestart;
        let token = CancellationToken::new();
        record.restart_timer = Some(token.clone());
        let id = record.id();
        debug!(target: SUPERVISOR_TARGET, id, delay_ms, "restart scheduled");
        let supervisor = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => return,
                () = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
            }
            restart_after_delay(supervisor, id, token).await;
        });
    }

    fn on_watch_triggered(self: &Arc<Self>, name: String) {
        if self.is_being_killed() || !self.watchers.try_begin(&name) {
            debug!(target: SUPERVISOR_TARGET, app = %name, "watch restart already in flight");
            return;
        }
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            info!(target: SUPERVISOR_TARGET, app = %name, "change detected; restarting");
            match supervisor.restart_process_name(&name).await {
                Ok(views) => debug!(
                    target: SUPERVISOR_TARGET,
                    app = %name,
                    restarted = views.len(),
                    "watch restart finished"
                ),
                Err(error) => {
                    warn!(target: SUPERVISOR_TARGET, app = %name, %error, "watch restart failed");
                }
            }
            supervisor.watchers.finish(&name);
        });
    }

    /// Soft-reloads `id` on its schedule. Jobs live until the record is
    /// deleted, so a record stopped by hand is restarted by its next tick.
    fn on_cron_fired(self: &Arc<Self>, id: u32) {
        let Ok(process) = self.registry().primary(id).map(ProcessRecord::process_ref) else {
            self.cron.deregister(id);
            return;
        };
        self.bus.lifecycle(
            self.clock.now_ms(),
            process,
            LifecycleEvent::CronFired,
            None,
        );
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(error) = supervisor.reload(id, ReloadMode::Soft).await {
                warn!(target: SUPERVISOR_TARGET, id, %error, "cron reload failed");
            }
        });
    }
}

async fn restart_after_delay(supervisor: Weak<Supervisor>, id: u32, token: CancellationToken) {
    let Some(supervisor) = supervisor.upgrade() else {
        return;
    };
    if supervisor.is_being_killed() {
        return;
    }
    let _guard = supervisor.lock_id(id).await;
    if token.is_cancelled() {
        return;
    }
    {
        let mut registry = supervisor.registry();
        let Ok(record) = registry.primary_mut(id) else {
            return;
        };
        record.restart_timer = None;
        record.meta.restart_time = record.meta.restart_time.saturating_add(1);
    }
    if let Err(error) = supervisor.execute_existing(id).await {
        warn!(target: SUPERVISOR_TARGET, id, %error, "automatic restart failed");
    }
}

fn publish_message(
    bus: &super::EventBus,
    now: u64,
    record: &ProcessRecord,
    message: ChildMessage,
) {
    let process = record.process_ref();
    let event = match message {
        ChildMessage::Ready => {
            BusEvent::lifecycle(now, process, LifecycleEvent::Ready, None)
        }
        ChildMessage::CronFired => {
            BusEvent::lifecycle(now, process, LifecycleEvent::CronFired, None)
        }
        ChildMessage::RuntimeVersion { version } => BusEvent::lifecycle(
            now,
            process,
            LifecycleEvent::RuntimeVersion,
            Some(json!({ "version": version })),
        ),
        ChildMessage::Custom { kind, payload } => BusEvent::message(now, process, Some(kind), payload),
        ChildMessage::Opaque { raw } => BusEvent::message(now, process, None, Value::String(raw)),
    };
    bus.publish(event);
}
