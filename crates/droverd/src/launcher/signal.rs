use std::io;
use std::str::FromStr;

use nix::sys::signal::{Signal, kill, killpg};
use nix::unistd::Pid;

use super::Signaller;

/// Signals a child by pid; the child leads its own process group.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PidSignaller {
    pid: Pid,
}

impl PidSignaller {
    pub(crate) fn new(pid: u32) -> Self {
        Self {
            pid: Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX)),
        }
    }
}

impl Signaller for PidSignaller {
    fn signal(&self, signal: Signal) -> io::Result<()> {
        kill(self.pid, signal).map_err(io::Error::from)
    }

    fn signal_tree(&self, signal: Signal) -> io::Result<()> {
        killpg(self.pid, signal).map_err(io::Error::from)
    }
}

/// Resolves a signal name such as `SIGINT`, `INT` or `2`.
pub(crate) fn parse_signal(name: &str) -> Option<Signal> {
    let trimmed = name.trim();
    if let Ok(number) = trimmed.parse::<i32>() {
        return Signal::try_from(number).ok();
    }
    let upper = trimmed.to_ascii_uppercase();
    if upper.starts_with("SIG") {
        Signal::from_str(&upper).ok()
    } else {
        Signal::from_str(&format!("SIG{upper}")).ok()
    }
}
