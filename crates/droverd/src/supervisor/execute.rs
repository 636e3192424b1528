//! Spawning children for records and installing them in the registry.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use drover_daemon_types::{AppDescriptor, LifecycleEvent, ProcessId, ProcessMeta, ProcessStatus};
use nix::sys::signal::Signal;
use serde_json::json;
use tracing::{debug, info, warn};

use super::control::{ChildEvent, ControlEvent};
use super::logs::LogSinks;
use super::registry::{Phase, ProcessRecord};
use super::{SUPERVISOR_TARGET, Supervisor, SupervisorError};
use crate::launcher::hooks::{HookContext, attach_hooks};
use crate::launcher::{LaunchRequest, SpawnedChild, build_environment};
use crate::process::files::atomic_write;

impl Supervisor {
    /// Launches a new record under the next free identifier and returns it.
    ///
    /// When `instance` is `None` the lowest ordinal free among live records of
    /// the same name is used. A spawn failure leaves the registry and the
    /// identifier allocator untouched.
    pub(super) async fn execute_new(
        self: &Arc<Self>,
        descriptor: AppDescriptor,
        instance: Option<u32>,
    ) -> Result<u32, SupervisorError> {
        let _allocation = self.allocation.lock().await;
        let (id, instance) = {
            let registry = self.registry();
            let instance =
                instance.unwrap_or_else(|| registry.lowest_free_instance(&descriptor.name));
            (registry.next_id(), instance)
        };
        let now = self.clock.now_ms();
        let meta = ProcessMeta {
            instance,
            created_at: now,
            pm_uptime: now,
            ..ProcessMeta::default()
        };
        self.launch_record(ProcessRecord::new(id, descriptor, meta, 0))
            .await?;
        self.arm_triggers(id);
        Ok(id)
    }

    /// Spawns a child for a record that is not yet in the registry and
    /// inserts it as the primary of its identifier.
    pub(super) async fn launch_record(
        self: &Arc<Self>,
        mut record: ProcessRecord,
    ) -> Result<(), SupervisorError> {
        let id = record.id();
        if record.logs.is_none() {
            record.logs = Some(self.open_logs(&record.descriptor, id, record.meta.instance)?);
        }
        let launch = self.next_launch();
        let child = self
            .spawn(id, record.meta.instance, &record.descriptor)
            .await?;

        let mut registry = self.registry();
        if registry.get(ProcessId::Primary(id)).is_some() {
            drop(registry);
            discard(child);
            return Err(SupervisorError::configuration(format!(
                "process {id} already exists"
            )));
        }
        self.install(&mut record, child, launch);
        registry.insert(record);
        Ok(())
    }

    /// Spawns a fresh child for an existing primary record.
    ///
    /// Callers hold the identifier lock. A spawn failure marks the record
    /// errored.
    pub(super) async fn execute_existing(self: &Arc<Self>, id: u32) -> Result<(), SupervisorError> {
        self.ensure_accepting()?;
        let (descriptor, instance) = {
            let mut registry = self.registry();
            let record = registry.primary_mut(id)?;
            record.cancel_restart();
            (record.descriptor.clone(), record.meta.instance)
        };
        let launch = self.next_launch();
        let spawned = self.spawn(id, instance, &descriptor).await;

        let mut registry = self.registry();
        let Some(record) = registry.get_mut(ProcessId::Primary(id)) else {
            drop(registry);
            if let Ok(child) = spawned {
                discard(child);
            }
            return Err(SupervisorError::unknown_id(id));
        };
        match spawned {
            Ok(child) if record.child.is_none() => {
                if record.logs.is_none() {
                    record.logs = self.open_logs(&descriptor, id, instance).ok();
                }
                self.install(record, child, launch);
                Ok(())
            }
            Ok(child) => {
                drop(registry);
                discard(child);
                Err(SupervisorError::AlreadyOnline { id })
            }
            Err(error) => {
                record.status = ProcessStatus::Errored;
                record.set_phase(Phase::Exited);
                self.bus.lifecycle(
                    self.clock.now_ms(),
                    record.process_ref(),
                    LifecycleEvent::Error,
                    Some(json!({ "message": error.to_string() })),
                );
                Err(error)
            }
        }
    }

    async fn spawn(
        &self,
        id: u32,
        instance: u32,
        descriptor: &AppDescriptor,
    ) -> Result<SpawnedChild, SupervisorError> {
        let request = LaunchRequest {
            id,
            instance,
            descriptor: descriptor.clone(),
            env: build_environment(descriptor, id, instance),
        };
        self.launchers
            .for_mode(descriptor.exec_mode)
            .launch(&request)
            .await
            .map_err(|source| {
                warn!(
                    target: SUPERVISOR_TARGET,
                    id,
                    app = %descriptor.name,
                    error = %source,
                    "spawn failed"
                );
                SupervisorError::Spawn {
                    name: descriptor.name.clone(),
                    source,
                }
            })
    }

    /// Wires a freshly spawned child into `record`. Runs with the registry
    /// locked so no child notice can be applied before the record is in
    /// place.
    fn install(&self, record: &mut ProcessRecord, child: SpawnedChild, launch: u64) {
        record.begin_launch(launch);
        record.stopping = false;
        record.restart_timer = None;
        record.meta.pm_uptime = self.clock.now_ms();

        let context = HookContext {
            launch,
            process: record.process_ref(),
            logs: record.logs.clone(),
            bus: self.bus.clone(),
            control: self.control.clone(),
            clock: self.clock,
        };
        let live = attach_hooks(&context, child);
        let pid = live.pid;
        record.child = Some(live);
        if !record.key.is_shadow() {
            self.write_pid_file(record, pid);
        }

        let now = self.clock.now_ms();
        info!(
            target: SUPERVISOR_TARGET,
            id = record.id(),
            app = %record.descriptor.name,
            pid,
            launch,
            "process launched"
        );
        self.bus.lifecycle(
            now,
            record.process_ref(),
            LifecycleEvent::Start,
            Some(json!({ "pid": pid })),
        );

        if record.descriptor.wait_ready {
            record.status = ProcessStatus::Launching;
            let control = self.control.clone();
            let wait = Duration::from_millis(record.descriptor.listen_timeout);
            tokio::spawn(async move {
                tokio::time::sleep(wait).await;
                let event = ControlEvent::Child {
                    launch,
                    event: ChildEvent::ReadyTimeout,
                };
                if control.send(event).is_err() {
                    debug!(target: SUPERVISOR_TARGET, launch, "control loop gone");
                }
            });
        } else {
            record.status = ProcessStatus::Online;
            record.set_phase(Phase::Online);
            self.bus
                .lifecycle(now, record.process_ref(), LifecycleEvent::Online, None);
        }
    }

    /// Registers the cron job and the watch of a new record.
    fn arm_triggers(&self, id: u32) {
        let Ok(descriptor) = self.registry().primary(id).map(|record| record.descriptor.clone())
        else {
            return;
        };
        if let Some(expression) = &descriptor.cron_restart
            && let Err(error) = self.cron.register(id, expression)
        {
            warn!(target: SUPERVISOR_TARGET, id, %error, "cron registration failed");
        }
        if descriptor.watch.enabled {
            self.enable_watch(id, &descriptor);
        }
    }

    pub(super) fn enable_watch(&self, id: u32, descriptor: &AppDescriptor) -> bool {
        let enabled = match self.watchers.enable(id, descriptor) {
            Ok(()) => true,
            Err(error) => {
                warn!(target: SUPERVISOR_TARGET, id, %error, "watch not enabled");
                false
            }
        };
        if let Ok(record) = self.registry().primary_mut(id) {
            record.watching = enabled;
        }
        enabled
    }

    fn open_logs(
        &self,
        descriptor: &AppDescriptor,
        id: u32,
        instance: u32,
    ) -> Result<LogSinks, SupervisorError> {
        LogSinks::open(self.paths.logs_dir(), descriptor, id, instance).map_err(|source| {
            SupervisorError::io("failed to open log files", self.paths.logs_dir(), source)
        })
    }

    pub(super) fn pid_path(&self, name: &str, id: u32) -> PathBuf {
        self.paths.pids_dir().join(format!("{name}-{id}.pid"))
    }

    fn write_pid_file(&self, record: &ProcessRecord, pid: u32) {
        let path = self.pid_path(&record.descriptor.name, record.id());
        if let Err(error) = atomic_write(&path, format!("{pid}\n").as_bytes()) {
            warn!(
                target: SUPERVISOR_TARGET,
                path = %path.display(),
                %error,
                "failed to write pid file"
            );
        }
    }

    pub(super) fn remove_pid_file(&self, name: &str, id: u32) {
        let path = self.pid_path(name, id);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => warn!(
                target: SUPERVISOR_TARGET,
                path = %path.display(),
                %error,
                "failed to remove pid file"
            ),
        }
    }
}

/// Kills a child that lost its record while spawning and reaps it.
fn discard(child: SpawnedChild) {
    if let Err(error) = child.signaller.signal_tree(Signal::SIGKILL) {
        debug!(target: SUPERVISOR_TARGET, pid = child.pid, %error, "discarded child already gone");
    }
    tokio::spawn(child.exit);
}
