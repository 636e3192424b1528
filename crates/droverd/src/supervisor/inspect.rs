//! Read-mostly operations: resource sampling, host figures, the daemon
//! report and dump/resurrect.

use std::sync::Arc;

use drover_daemon_types::{DaemonReport, Monit, ProcessStatus, ProcessView, SystemData};
use sysinfo::System;
use tracing::{info, warn};

use super::dump::DumpFile;
use super::{SUPERVISOR_TARGET, Supervisor, SupervisorError};

impl Supervisor {
    /// Includes a record in resource sampling.
    pub fn monitor(&self, id: u32) -> Result<ProcessView, SupervisorError> {
        self.set_monitored(id, true)
    }

    /// Excludes a record from resource sampling; its figures are zeroed.
    pub fn unmonitor(&self, id: u32) -> Result<ProcessView, SupervisorError> {
        self.set_monitored(id, false)
    }

    fn set_monitored(&self, id: u32, monitored: bool) -> Result<ProcessView, SupervisorError> {
        let mut registry = self.registry();
        let record = registry.primary_mut(id)?;
        record.monitored = monitored;
        if !monitored {
            record.monit = Monit::default();
        }
        Ok(record.view())
    }

    /// Views of every record with freshly sampled memory and CPU usage.
    pub fn get_monitor_data(&self) -> Vec<ProcessView> {
        let pids: Vec<u32> = self
            .registry()
            .records()
            .filter(|record| record.monitored)
            .filter_map(|record| record.pid())
            .collect();
        let samples = self.sampler.sample(&pids);

        let mut registry = self.registry();
        for record in registry.records_mut() {
            if !record.monitored {
                continue;
            }
            record.monit = record
                .pid()
                .and_then(|pid| samples.get(&pid).copied())
                .unwrap_or_default();
        }
        registry.views()
    }

    /// Host CPU and memory figures plus daemon uptime.
    pub fn get_system_data(&self) -> SystemData {
        let memory = self.sampler.host_memory();
        SystemData {
            cpus: self.settings.cpus,
            total_memory: memory.total,
            used_memory: memory.used,
            daemon_uptime_ms: self.uptime_ms(),
            daemon_pid: std::process::id(),
            hostname: System::host_name(),
        }
    }

    /// Daemon summary; `socket` is the endpoint the daemon listens on.
    pub fn report(&self, socket: &str) -> DaemonReport {
        let registry = self.registry();
        let online = registry
            .records()
            .filter(|record| record.status == ProcessStatus::Online)
            .count();
        DaemonReport {
            version: env!("CARGO_PKG_VERSION").to_owned(),
            pid: std::process::id(),
            uptime_ms: self.uptime_ms(),
            processes: registry.len(),
            online,
            state_dir: self.paths.root().display().to_string(),
            socket: socket.to_owned(),
        }
    }

    fn uptime_ms(&self) -> u64 {
        self.clock.now_ms().saturating_sub(self.started_at)
    }

    /// Persists the descriptor of every primary record. Returns how many
    /// entries were written.
    pub fn dump(&self) -> Result<usize, SupervisorError> {
        let apps: Vec<_> = {
            let registry = self.registry();
            registry
                .primary_ids()
                .into_iter()
                .filter_map(|id| registry.primary(id).ok())
                .map(|record| record.descriptor.clone())
                .collect()
        };
        let count = apps.len();
        let path = self.paths.dump_path();
        DumpFile::new(self.clock.now_ms(), apps).write(path)?;
        info!(target: SUPERVISOR_TARGET, count, path = %path.display(), "dump written");
        Ok(count)
    }

    /// Relaunches every descriptor in the dump file. Entries that fail are
    /// logged and skipped.
    pub async fn resurrect(self: &Arc<Self>) -> Result<Vec<ProcessView>, SupervisorError> {
        self.ensure_accepting()?;
        let path = self.paths.dump_path();
        let dump = DumpFile::read(path)?;
        let mut views = Vec::new();
        for descriptor in dump.apps {
            let name = descriptor.name.clone();
            match self.prepare(descriptor).await {
                Ok(mut launched) => views.append(&mut launched),
                Err(error) => {
                    warn!(target: SUPERVISOR_TARGET, app = %name, %error, "resurrection failed");
                }
            }
        }
        info!(
            target: SUPERVISOR_TARGET,
            count = views.len(),
            path = %path.display(),
            "processes resurrected"
        );
        Ok(views)
    }
}
