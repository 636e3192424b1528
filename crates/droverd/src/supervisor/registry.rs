//! In-memory map from identifiers to process records.
//!
//! Identifiers are allocated by monotonic increment and are never reused
//! while any record remains; removing the last record resets the allocator
//! to zero. Records detached by a hard reload leave the addressable map but
//! stay tracked by launch until their exit is observed.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use drover_daemon_types::{
    AppDescriptor, Monit, ProcessId, ProcessMeta, ProcessRef, ProcessStatus, ProcessView,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::SupervisorError;
use super::logs::LogSinks;
use crate::launcher::hooks::LiveChild;

/// Progress of the current launch, observed by readiness and exit waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Spawned,
    Online,
    Ready,
    Exited,
}

impl Phase {
    pub(crate) const fn is_up(self) -> bool {
        matches!(self, Self::Online | Self::Ready)
    }
}

#[derive(Debug)]
pub(crate) struct ProcessRecord {
    pub(crate) key: ProcessId,
    pub(crate) descriptor: AppDescriptor,
    pub(crate) status: ProcessStatus,
    pub(crate) meta: ProcessMeta,
    pub(crate) launch: u64,
    pub(crate) phase: watch::Sender<Phase>,
    pub(crate) child: Option<LiveChild>,
    pub(crate) restart_timer: Option<CancellationToken>,
    /// Set while an explicit stop or delete is in progress.
    pub(crate) stopping: bool,
    pub(crate) watching: bool,
    pub(crate) monitored: bool,
    pub(crate) monit: Monit,
    pub(crate) logs: Option<LogSinks>,
    pub(crate) runtime_version: Option<String>,
}

impl ProcessRecord {
    pub(crate) fn new(id: u32, descriptor: AppDescriptor, meta: ProcessMeta, launch: u64) -> Self {
        Self {
            key: ProcessId::Primary(id),
            descriptor,
            status: ProcessStatus::Launching,
            meta,
            launch,
            phase: watch::channel(Phase::Spawned).0,
            child: None,
            restart_timer: None,
            stopping: false,
            watching: false,
            monitored: true,
            monit: Monit::default(),
            logs: None,
            runtime_version: None,
        }
    }

    pub(crate) const fn id(&self) -> u32 {
        self.key.number()
    }

    pub(crate) fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(|child| child.pid)
    }

    pub(crate) fn process_ref(&self) -> ProcessRef {
        ProcessRef {
            pm_id: self.id(),
            name: self.descriptor.name.clone(),
            namespace: self.descriptor.namespace.clone(),
            shadow: self.key.is_shadow(),
        }
    }

    pub(crate) fn view(&self) -> ProcessView {
        ProcessView {
            pm_id: self.id(),
            shadow: self.key.is_shadow(),
            name: self.descriptor.name.clone(),
            namespace: self.descriptor.namespace.clone(),
            pid: self.pid(),
            status: self.status,
            descriptor: self.descriptor.clone(),
            meta: self.meta.clone(),
            watching: self.watching,
            monitored: self.monitored,
            monit: self.monit,
        }
    }

    /// Starts tracking a new launch; waiters on the previous one observe it
    /// as finished.
    pub(crate) fn begin_launch(&mut self, launch: u64) {
        self.launch = launch;
        self.phase = watch::channel(Phase::Spawned).0;
        self.child = None;
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        self.phase.send_replace(phase);
    }

    pub(crate) fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub(crate) fn watch_phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Cancels a pending delayed restart; returns whether one was pending.
    pub(crate) fn cancel_restart(&mut self) -> bool {
        match self.restart_timer.take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Registry {
    records: BTreeMap<ProcessId, ProcessRecord>,
    detached: HashMap<u64, ProcessRecord>,
    next_id: u32,
}

impl Registry {
    /// Identifier the next new record will receive.
    pub(crate) const fn next_id(&self) -> u32 {
        self.next_id
    }

    /// Inserts a record and advances the allocator past its identifier.
    pub(crate) fn insert(&mut self, record: ProcessRecord) {
        if let ProcessId::Primary(id) = record.key {
            self.next_id = self.next_id.max(id.saturating_add(1));
        }
        self.records.insert(record.key, record);
    }

    pub(crate) fn get(&self, key: ProcessId) -> Option<&ProcessRecord> {
        self.records.get(&key)
    }

    pub(crate) fn get_mut(&mut self, key: ProcessId) -> Option<&mut ProcessRecord> {
        self.records.get_mut(&key)
    }

    pub(crate) fn primary(&self, id: u32) -> Result<&ProcessRecord, SupervisorError> {
        self.get(ProcessId::Primary(id))
            .ok_or_else(|| SupervisorError::unknown_id(id))
    }

    pub(crate) fn primary_mut(&mut self, id: u32) -> Result<&mut ProcessRecord, SupervisorError> {
        self.get_mut(ProcessId::Primary(id))
            .ok_or_else(|| SupervisorError::unknown_id(id))
    }

    /// Removes a record; emptying the map recycles identifiers from zero.
    pub(crate) fn remove(&mut self, key: ProcessId) -> Option<ProcessRecord> {
        let removed = self.records.remove(&key);
        if self.records.is_empty() {
            self.next_id = 0;
        }
        removed
    }

    /// Moves the record at `from` to `to`; fails if `to` is taken.
    pub(crate) fn relabel(&mut self, from: ProcessId, to: ProcessId) -> bool {
        if self.records.contains_key(&to) {
            return false;
        }
        match self.records.remove(&from) {
            Some(mut record) => {
                record.key = to;
                self.records.insert(to, record);
                true
            }
            None => false,
        }
    }

    /// Removes a record from the addressable map while its exit is pending.
    pub(crate) fn detach(&mut self, key: ProcessId) -> Option<&ProcessRecord> {
        let record = self.remove(key)?;
        let launch = record.launch;
        self.detached.insert(launch, record);
        self.detached.get(&launch)
    }

    pub(crate) fn take_detached(&mut self, launch: u64) -> Option<ProcessRecord> {
        self.detached.remove(&launch)
    }

    /// Key of the record whose current launch is `launch`.
    pub(crate) fn key_for_launch(&self, launch: u64) -> Option<ProcessId> {
        self.records
            .values()
            .find(|record| record.launch == launch)
            .map(|record| record.key)
    }

    /// Record whose current launch is `launch`, detached records included.
    pub(crate) fn by_launch(&self, launch: u64) -> Option<&ProcessRecord> {
        self.records
            .values()
            .find(|record| record.launch == launch)
            .or_else(|| self.detached.get(&launch))
    }

    #[cfg(test)]
    pub(crate) fn detached_count(&self) -> usize {
        self.detached.len()
    }

    pub(crate) fn records(&self) -> impl Iterator<Item = &ProcessRecord> {
        self.records.values()
    }

    pub(crate) fn records_mut(&mut self) -> impl Iterator<Item = &mut ProcessRecord> {
        self.records.values_mut()
    }

    pub(crate) fn keys(&self) -> Vec<ProcessId> {
        self.records.keys().copied().collect()
    }

    pub(crate) fn primary_ids(&self) -> Vec<u32> {
        self.records
            .keys()
            .filter_map(|key| match key {
                ProcessId::Primary(id) => Some(*id),
                ProcessId::Shadow(_) => None,
            })
            .collect()
    }

    pub(crate) fn ids_by_name(&self, name: &str) -> Vec<u32> {
        self.primary_ids_where(|record| record.descriptor.name == name)
    }

    pub(crate) fn ids_by_namespace(&self, namespace: &str) -> Vec<u32> {
        self.primary_ids_where(|record| record.descriptor.namespace == namespace)
    }

    /// Resolves a name, namespace, glob pattern or `all` to identifiers.
    pub(crate) fn ids_matching(&self, target: &str) -> Vec<u32> {
        if target == "all" {
            return self.primary_ids();
        }
        let by_name = self.ids_by_name(target);
        if !by_name.is_empty() {
            return by_name;
        }
        let by_namespace = self.ids_by_namespace(target);
        if !by_namespace.is_empty() {
            return by_namespace;
        }
        match glob::Pattern::new(target) {
            Ok(pattern) => {
                self.primary_ids_where(|record| pattern.matches(&record.descriptor.name))
            }
            Err(_) => Vec::new(),
        }
    }

    fn primary_ids_where(&self, predicate: impl Fn(&ProcessRecord) -> bool) -> Vec<u32> {
        self.records
            .values()
            .filter(|record| !record.key.is_shadow() && predicate(record))
            .map(ProcessRecord::id)
            .collect()
    }

    pub(crate) fn has_name(&self, name: &str) -> bool {
        self.records
            .values()
            .any(|record| record.descriptor.name == name)
    }

    /// Lowest ordinal not used by any live instance of `name`.
    pub(crate) fn lowest_free_instance(&self, name: &str) -> u32 {
        let used: BTreeSet<u32> = self
            .records
            .values()
            .filter(|record| !record.key.is_shadow() && record.descriptor.name == name)
            .map(|record| record.meta.instance)
            .collect();
        (0..).find(|ordinal| !used.contains(ordinal)).unwrap_or_default()
    }

    pub(crate) fn views(&self) -> Vec<ProcessView> {
        self.records.values().map(ProcessRecord::view).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }
}
