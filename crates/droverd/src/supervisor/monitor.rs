//! Resource sampling for monitored processes and the host.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use drover_daemon_types::Monit;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Host memory figures in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct HostMemory {
    pub(crate) total: u64,
    pub(crate) used: u64,
}

/// Wraps one `sysinfo` handle; CPU usage needs consecutive refreshes of the
/// same handle to be meaningful.
#[derive(Debug)]
pub(crate) struct ResourceSampler {
    system: Mutex<System>,
}

impl ResourceSampler {
    pub(crate) fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    /// Samples memory and CPU of each pid. Pids that vanished report zeroes.
    pub(crate) fn sample(&self, pids: &[u32]) -> HashMap<u32, Monit> {
        if pids.is_empty() {
            return HashMap::new();
        }
        let targets: Vec<Pid> = pids.iter().copied().map(Pid::from_u32).collect();
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes(ProcessesToUpdate::Some(&targets), true);
        pids.iter()
            .map(|pid| {
                let monit = system
                    .process(Pid::from_u32(*pid))
                    .map(|process| Monit {
                        memory: process.memory(),
                        cpu: process.cpu_usage(),
                    })
                    .unwrap_or_default();
                (*pid, monit)
            })
            .collect()
    }

    pub(crate) fn host_memory(&self) -> HostMemory {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_memory();
        HostMemory {
            total: system.total_memory(),
            used: system.used_memory(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ResourceSampler;

    #[test]
    fn samples_the_current_process() {
        let sampler = ResourceSampler::new();
        let pid = std::process::id();
        let samples = sampler.sample(&[pid]);
        let monit = samples.get(&pid).copied().unwrap_or_default();
        assert!(monit.memory > 0, "the test runner uses some memory");
    }

    #[test]
    fn reports_host_memory() {
        let memory = ResourceSampler::new().host_memory();
        assert!(memory.total >= memory.used);
    }
}
