//! Start, stop, restart, delete and duplicate, for one identifier or a
//! group of them.

use std::collections::BTreeMap;
use std::sync::Arc;

use drover_daemon_types::{AppDescriptor, LifecycleEvent, ProcessId, ProcessStatus, ProcessView};
use futures::stream::{self, StreamExt};
use serde_json::json;
use tracing::{info, warn};

use super::kill::{self, KillPlan};
use super::registry::ProcessRecord;
use super::{SUPERVISOR_TARGET, Supervisor, SupervisorError, cron};

impl Supervisor {
    /// Validates `descriptor` and launches as many instances as it resolves
    /// to, each with its own identifier and ordinal.
    pub async fn prepare(
        self: &Arc<Self>,
        descriptor: AppDescriptor,
    ) -> Result<Vec<ProcessView>, SupervisorError> {
        self.ensure_accepting()?;
        descriptor.validate()?;
        KillPlan::for_descriptor(&descriptor)?;
        if let Some(expression) = &descriptor.cron_restart {
            cron::parse_schedule(expression)?;
        }
        let count = descriptor.resolve_instances(self.settings.cpus);
        info!(
            target: SUPERVISOR_TARGET,
            app = %descriptor.name,
            instances = count,
            exec_mode = ?descriptor.exec_mode,
            "preparing application"
        );
        let mut views = Vec::with_capacity(count);
        for _ in 0..count {
            let id = self.execute_new(descriptor.clone(), None).await?;
            views.push(self.process(id)?);
        }
        Ok(views)
    }

    /// Starts a record that is not running, cancelling any pending delayed
    /// restart.
    pub async fn start_process(self: &Arc<Self>, id: u32) -> Result<ProcessView, SupervisorError> {
        self.ensure_accepting()?;
        let _guard = self.lock_id(id).await;
        {
            let mut registry = self.registry();
            let record = registry.primary_mut(id)?;
            if record.status.is_running() {
                return Err(SupervisorError::AlreadyOnline { id });
            }
            record.cancel_restart();
            record.meta.unstable_restarts = 0;
        }
        self.execute_existing(id).await?;
        self.process(id)
    }

    /// Stops a record. Stopping a record that is not running succeeds
    /// without signalling anything.
    pub async fn stop_process(self: &Arc<Self>, id: u32) -> Result<ProcessView, SupervisorError> {
        let _guard = self.lock_id(id).await;
        self.stop_locked(ProcessId::Primary(id)).await
    }

    /// Stops the record at `key`; callers hold its identifier lock.
    pub(super) async fn stop_locked(&self, key: ProcessId) -> Result<ProcessView, SupervisorError> {
        let (signaller, phase, plan) = {
            let mut registry = self.registry();
            let record = registry
                .get_mut(key)
                .ok_or_else(|| SupervisorError::unknown_id(key.number()))?;
            if !record.status.is_stoppable() {
                return Ok(record.view());
            }
            let plan = KillPlan::for_descriptor(&record.descriptor)?;
            record.cancel_restart();
            record.stopping = true;
            let Some(child) = record.child.as_ref() else {
                self.finish_stop(record, None);
                return Ok(record.view());
            };
            let signaller = Arc::clone(&child.signaller);
            record.status = ProcessStatus::Stopping;
            (signaller, record.watch_phase(), plan)
        };

        let outcome = kill::terminate(signaller.as_ref(), phase, &plan).await;

        let mut registry = self.registry();
        let record = registry
            .get_mut(key)
            .ok_or_else(|| SupervisorError::unknown_id(key.number()))?;
        self.finish_stop(record, Some(outcome));
        Ok(record.view())
    }

    fn finish_stop(&self, record: &mut ProcessRecord, outcome: Option<kill::KillOutcome>) {
        record.cancel_restart();
        record.stopping = false;
        record.status = ProcessStatus::Stopped;
        info!(
            target: SUPERVISOR_TARGET,
            id = record.id(),
            app = %record.descriptor.name,
            outcome = outcome.map(|outcome| outcome.to_string()),
            "process stopped"
        );
        self.bus.lifecycle(
            self.clock.now_ms(),
            record.process_ref(),
            LifecycleEvent::Stop,
            outcome.map(|outcome| json!({ "kill": outcome.to_string() })),
        );
    }

    /// Stops then starts a record, resetting its instability counters and
    /// merging `env` into its environment.
    pub async fn restart_process(
        self: &Arc<Self>,
        id: u32,
        env: BTreeMap<String, String>,
    ) -> Result<ProcessView, SupervisorError> {
        self.ensure_accepting()?;
        let _reload = self.lock_reload().await?;
        let _guard = self.lock_id(id).await;
        self.restart_locked(id, env).await
    }

    /// Restart body; callers hold the reload lock and the identifier lock.
    pub(super) async fn restart_locked(
        self: &Arc<Self>,
        id: u32,
        env: BTreeMap<String, String>,
    ) -> Result<ProcessView, SupervisorError> {
        {
            let mut registry = self.registry();
            let record = registry.primary_mut(id)?;
            record.meta.unstable_restarts = 0;
            record.meta.prev_restart_delay = 0;
            record.descriptor.env.extend(env);
        }
        self.stop_locked(ProcessId::Primary(id)).await?;
        self.ensure_accepting()?;
        {
            let mut registry = self.registry();
            let record = registry.primary_mut(id)?;
            record.meta.restart_time = record.meta.restart_time.saturating_add(1);
        }
        self.execute_existing(id).await?;

        let registry = self.registry();
        let record = registry.primary(id)?;
        self.bus.lifecycle(
            self.clock.now_ms(),
            record.process_ref(),
            LifecycleEvent::Restart,
            Some(json!({ "restart_time": record.meta.restart_time })),
        );
        Ok(record.view())
    }

    /// Deregisters triggers, stops and removes a record.
    pub async fn delete_process(self: &Arc<Self>, id: u32) -> Result<ProcessView, SupervisorError> {
        let guard = self.lock_id(id).await;
        self.registry().primary(id)?;
        self.cron.deregister(id);
        self.watchers.disable(id);
        self.stop_locked(ProcessId::Primary(id)).await?;

        let (record, name_remains) = {
            let mut registry = self.registry();
            let record = registry
                .remove(ProcessId::Primary(id))
                .ok_or_else(|| SupervisorError::unknown_id(id))?;
            let name_remains = registry.has_name(&record.descriptor.name);
            (record, name_remains)
        };
        self.remove_pid_file(&record.descriptor.name, id);
        if !name_remains {
            self.launchers
                .for_mode(record.descriptor.exec_mode)
                .release(&record.descriptor.name);
        }
        info!(
            target: SUPERVISOR_TARGET,
            id,
            app = %record.descriptor.name,
            "process deleted"
        );
        self.bus.lifecycle(
            self.clock.now_ms(),
            record.process_ref(),
            LifecycleEvent::Delete,
            None,
        );
        drop(guard);
        self.forget_id_lock(id);
        Ok(record.view())
    }

    /// Launches one more instance of a record's application.
    pub async fn duplicate_process(self: &Arc<Self>, id: u32) -> Result<ProcessView, SupervisorError> {
        self.ensure_accepting()?;
        let descriptor = self.registry().primary(id)?.descriptor.clone();
        let new_id = self.execute_new(descriptor, None).await?;
        self.process(new_id)
    }

    /// Zeroes the restart counters of a record and restamps its creation.
    pub async fn reset_meta(self: &Arc<Self>, id: u32) -> Result<ProcessView, SupervisorError> {
        let _guard = self.lock_id(id).await;
        let mut registry = self.registry();
        let record = registry.primary_mut(id)?;
        record.meta.restart_time = 0;
        record.meta.unstable_restarts = 0;
        record.meta.prev_restart_delay = 0;
        record.meta.created_at = self.clock.now_ms();
        Ok(record.view())
    }

    /// Stops every record named `name`.
    pub async fn stop_process_name(
        self: &Arc<Self>,
        name: &str,
    ) -> Result<Vec<ProcessView>, SupervisorError> {
        let ids = self.ids_for_name(name)?;
        let limit = self.settings.concurrent_actions;
        self.fan_out(ids, limit, |supervisor, id| async move {
            supervisor.stop_process(id).await
        })
        .await
    }

    /// Restarts every record named `name`.
    pub async fn restart_process_name(
        self: &Arc<Self>,
        name: &str,
    ) -> Result<Vec<ProcessView>, SupervisorError> {
        let ids = self.ids_for_name(name)?;
        let limit = self.settings.concurrent_actions;
        self.fan_out(ids, limit, |supervisor, id| async move {
            supervisor.restart_process(id, BTreeMap::new()).await
        })
        .await
    }

    /// Deletes every record named `name`.
    pub async fn delete_process_name(
        self: &Arc<Self>,
        name: &str,
    ) -> Result<Vec<ProcessView>, SupervisorError> {
        let ids = self.ids_for_name(name)?;
        let limit = self.settings.concurrent_actions;
        self.fan_out(ids, limit, |supervisor, id| async move {
            supervisor.delete_process(id).await
        })
        .await
    }

    /// Deletes every record.
    pub async fn delete_all(self: &Arc<Self>) -> Result<Vec<ProcessView>, SupervisorError> {
        let ids = self.registry().primary_ids();
        let limit = self.settings.bulk_concurrency;
        self.fan_out(ids, limit, |supervisor, id| async move {
            supervisor.delete_process(id).await
        })
        .await
    }

    /// Identifiers of primaries named `name`.
    pub fn ids_by_name(&self, name: &str) -> Vec<u32> {
        self.registry().ids_by_name(name)
    }

    /// Identifiers of primaries in `namespace`.
    pub fn ids_by_namespace(&self, namespace: &str) -> Vec<u32> {
        self.registry().ids_by_namespace(namespace)
    }

    fn ids_for_name(&self, name: &str) -> Result<Vec<u32>, SupervisorError> {
        let ids = self.registry().ids_matching(name);
        if ids.is_empty() {
            Err(SupervisorError::unknown_name(name))
        } else {
            Ok(ids)
        }
    }

    /// Runs `operation` for each identifier with at most `limit` in flight.
    /// Every identifier is attempted; the first failure is returned.
    async fn fan_out<F, Fut>(
        self: &Arc<Self>,
        ids: Vec<u32>,
        limit: usize,
        operation: F,
    ) -> Result<Vec<ProcessView>, SupervisorError>
    where
        F: Fn(Arc<Self>, u32) -> Fut,
        Fut: Future<Output = Result<ProcessView, SupervisorError>>,
    {
        let results: Vec<Result<ProcessView, SupervisorError>> = stream::iter(ids)
            .map(|id| operation(Arc::clone(self), id))
            .buffer_unordered(limit.max(1))
            .collect()
            .await;
        let mut views = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok(view) => views.push(view),
                Err(error) => {
                    warn!(target: SUPERVISOR_TARGET, %error, "grouped operation failed");
                    first_error.get_or_insert(error);
                }
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => {
                views.sort_by_key(|view| view.pm_id);
                Ok(views)
            }
        }
    }

    /// Begins daemon-wide shutdown: suppresses restarts, drops every trigger
    /// and stops every record, shadows included. Returns how many records
    /// were stopped.
    pub async fn shutdown(self: &Arc<Self>) -> usize {
        self.being_killed
            .store(true, std::sync::atomic::Ordering::SeqCst);
        self.watchers.disable_all();
        self.cron.clear();

        let keys = {
            let mut registry = self.registry();
            for record in registry.records_mut() {
                record.cancel_restart();
            }
            registry.keys()
        };
        let limit = self.settings.bulk_concurrency;
        let stopped: Vec<bool> = stream::iter(keys)
            .map(|key| {
                let supervisor = Arc::clone(self);
                async move {
                    let _guard = supervisor.lock_id(key.number()).await;
                    match supervisor.stop_locked(key).await {
                        Ok(_) => true,
                        Err(error) => {
                            warn!(target: SUPERVISOR_TARGET, %key, %error, "stop during shutdown failed");
                            false
                        }
                    }
                }
            })
            .buffer_unordered(limit.max(1))
            .collect()
            .await;
        let count = stopped.into_iter().filter(|stopped| *stopped).count();
        info!(target: SUPERVISOR_TARGET, stopped = count, "all processes stopped");
        count
    }
}
