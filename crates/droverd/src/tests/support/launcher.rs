//! In-memory launcher whose children follow a script instead of running a
//! program.
//!
//! Each child gets duplex pipes for stdout, stdin and the IPC channel, an
//! exit future resolved by the script or by signals, and a signaller that
//! records every delivery. Tests drive it on paused tokio time.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use nix::sys::signal::Signal;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::oneshot;

use drover_daemon_types::ParentMessage;

use crate::launcher::{
    ChildChannel, ExitOutcome, LaunchRequest, Launcher, Launchers, Signaller, SpawnError,
    SpawnedChild,
};

const PIPE_CAPACITY: usize = 64 * 1024;

/// What one scripted child does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChildScript {
    /// Exit with this code after this long.
    pub exit_after: Option<(Duration, i32)>,
    /// Write `ready` on the IPC channel after this long.
    pub ready_after: Option<Duration>,
    /// Refuse to spawn.
    pub fail_spawn: bool,
    /// Survive SIGINT, SIGTERM and SIGQUIT; only SIGKILL ends the child.
    pub ignore_graceful: bool,
    /// Exit cleanly on a `shutdown` channel message.
    pub honour_shutdown: bool,
}

impl ChildScript {
    /// A child that runs until signalled.
    pub fn long_running() -> Self {
        Self {
            honour_shutdown: true,
            ..Self::default()
        }
    }

    /// A child that exits with `code` after `after`.
    pub fn exits_after(after: Duration, code: i32) -> Self {
        Self {
            exit_after: Some((after, code)),
            ..Self::long_running()
        }
    }

    /// A child that reports readiness after `after`.
    pub fn ready_after(after: Duration) -> Self {
        Self {
            ready_after: Some(after),
            ..Self::long_running()
        }
    }

    /// A child the launcher cannot start.
    pub fn failing() -> Self {
        Self {
            fail_spawn: true,
            ..Self::default()
        }
    }
}

/// One recorded launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launch {
    pub id: u32,
    pub instance: u32,
    pub name: String,
    pub pid: u32,
    pub env: BTreeMap<String, String>,
}

type ExitSender = Arc<Mutex<Option<oneshot::Sender<ExitOutcome>>>>;

#[derive(Debug, Default)]
struct State {
    default: ChildScript,
    queued: VecDeque<ChildScript>,
    launches: Vec<Launch>,
    exits: HashMap<u32, ExitSender>,
    stdout: HashMap<u32, DuplexStream>,
    signals: Vec<(u32, Signal)>,
    stdin_lines: HashMap<u32, Vec<String>>,
    channel_messages: HashMap<u32, Vec<ParentMessage>>,
    released: Vec<String>,
}

/// Launcher double shared between the supervisor and the test.
#[derive(Clone)]
pub struct ScriptedLauncher {
    state: Arc<Mutex<State>>,
    next_pid: Arc<AtomicU32>,
}

impl Default for ScriptedLauncher {
    fn default() -> Self {
        Self::new(ChildScript::long_running())
    }
}

impl ScriptedLauncher {
    pub fn new(default: ChildScript) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                default,
                ..State::default()
            })),
            next_pid: Arc::new(AtomicU32::new(10_000)),
        }
    }

    /// Launchers routing both exec modes here.
    pub fn launchers(&self) -> Launchers {
        Launchers::uniform(Arc::new(self.clone()))
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("launcher state poisoned")
    }

    /// Replaces the script used when nothing is queued.
    pub fn set_default(&self, script: ChildScript) {
        self.state().default = script;
    }

    /// Uses `script` for the next launch only.
    pub fn queue(&self, script: ChildScript) {
        self.state().queued.push_back(script);
    }

    pub fn launches(&self) -> Vec<Launch> {
        self.state().launches.clone()
    }

    pub fn launch_count(&self) -> usize {
        self.state().launches.len()
    }

    pub fn signals(&self) -> Vec<(u32, Signal)> {
        self.state().signals.clone()
    }

    pub fn signals_to(&self, pid: u32) -> Vec<Signal> {
        self.state()
            .signals
            .iter()
            .filter(|(target, _)| *target == pid)
            .map(|(_, signal)| *signal)
            .collect()
    }

    pub fn stdin_lines(&self, pid: u32) -> Vec<String> {
        self.state().stdin_lines.get(&pid).cloned().unwrap_or_default()
    }

    pub fn channel_messages(&self, pid: u32) -> Vec<ParentMessage> {
        self.state()
            .channel_messages
            .get(&pid)
            .cloned()
            .unwrap_or_default()
    }

    pub fn released(&self) -> Vec<String> {
        self.state().released.clone()
    }

    /// Ends a child as if it exited on its own.
    pub fn exit(&self, pid: u32, code: i32) {
        let sender = self.state().exits.get(&pid).cloned();
        if let Some(sender) = sender {
            resolve(&sender, ExitOutcome::code(code));
        }
    }

    /// Writes a line to a child's stdout.
    pub async fn emit_stdout(&self, pid: u32, line: &str) {
        let pipe = self.state().stdout.remove(&pid);
        if let Some(mut pipe) = pipe {
            pipe.write_all(format!("{line}\n").as_bytes())
                .await
                .expect("write scripted stdout");
            self.state().stdout.insert(pid, pipe);
        }
    }

    fn next_script(&self) -> ChildScript {
        let mut state = self.state();
        let default = state.default;
        state.queued.pop_front().unwrap_or(default)
    }
}

#[async_trait]
impl Launcher for ScriptedLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<SpawnedChild, SpawnError> {
        let script = self.next_script();
        if script.fail_spawn {
            return Err(SpawnError::spawn(
                request.descriptor.script.clone(),
                io::Error::new(io::ErrorKind::NotFound, "scripted spawn failure"),
            ));
        }
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let (exit_tx, exit_rx) = oneshot::channel();
        let exit_sender: ExitSender = Arc::new(Mutex::new(Some(exit_tx)));

        let (stdout_child, stdout_daemon) = tokio::io::duplex(PIPE_CAPACITY);
        let (stdin_child, stdin_daemon) = tokio::io::duplex(PIPE_CAPACITY);
        let (channel_child, channel_daemon) = tokio::io::duplex(PIPE_CAPACITY);
        let (stderr_child, stderr_daemon) = tokio::io::duplex(PIPE_CAPACITY);
        drop(stderr_child);

        {
            let mut state = self.state();
            state.launches.push(Launch {
                id: request.id,
                instance: request.instance,
                name: request.descriptor.name.clone(),
                pid,
                env: request.env.clone(),
            });
            state.exits.insert(pid, Arc::clone(&exit_sender));
            state.stdout.insert(pid, stdout_child);
        }

        tokio::spawn(record_stdin(Arc::clone(&self.state), pid, stdin_child));
        tokio::spawn(run_channel(
            Arc::clone(&self.state),
            pid,
            channel_child,
            script,
            Arc::clone(&exit_sender),
        ));
        if let Some((after, code)) = script.exit_after {
            let sender = Arc::clone(&exit_sender);
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                resolve(&sender, ExitOutcome::code(code));
            });
        }

        let (channel_reader, channel_writer) = tokio::io::split(channel_daemon);
        let signaller = ScriptedSignaller {
            pid,
            ignore_graceful: script.ignore_graceful,
            exit: exit_sender,
            state: Arc::clone(&self.state),
        };
        Ok(SpawnedChild {
            pid,
            stdout: Some(Box::new(stdout_daemon)),
            stderr: Some(Box::new(stderr_daemon)),
            stdin: Some(Box::new(stdin_daemon)),
            channel: Some(ChildChannel {
                reader: Box::new(channel_reader),
                writer: Box::new(channel_writer),
            }),
            exit: exit_rx
                .map(|outcome| outcome.unwrap_or(ExitOutcome::signalled(9)))
                .boxed(),
            signaller: Arc::new(signaller),
        })
    }

    fn release(&self, name: &str) {
        self.state().released.push(name.to_owned());
    }
}

fn resolve(sender: &ExitSender, outcome: ExitOutcome) -> bool {
    let taken = sender.lock().expect("exit sender poisoned").take();
    match taken {
        Some(sender) => sender.send(outcome).is_ok(),
        None => false,
    }
}

async fn record_stdin(state: Arc<Mutex<State>>, pid: u32, pipe: DuplexStream) {
    let mut lines = BufReader::new(pipe).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        state
            .lock()
            .expect("launcher state poisoned")
            .stdin_lines
            .entry(pid)
            .or_default()
            .push(line);
    }
}

async fn run_channel(
    state: Arc<Mutex<State>>,
    pid: u32,
    pipe: DuplexStream,
    script: ChildScript,
    exit: ExitSender,
) {
    let (reader, mut writer) = tokio::io::split(pipe);
    if let Some(after) = script.ready_after {
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = writer.write_all(b"ready\n").await;
            // Keep the write half open for the child's lifetime.
            std::future::pending::<()>().await;
        });
    }
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(message) = serde_json::from_str::<ParentMessage>(&line) else {
            continue;
        };
        let shutdown = message == ParentMessage::Shutdown;
        state
            .lock()
            .expect("launcher state poisoned")
            .channel_messages
            .entry(pid)
            .or_default()
            .push(message);
        if shutdown && script.honour_shutdown {
            resolve(&exit, ExitOutcome::code(0));
        }
    }
}

/// Records signals and ends the child the way a real process would.
#[derive(Debug)]
struct ScriptedSignaller {
    pid: u32,
    ignore_graceful: bool,
    exit: ExitSender,
    state: Arc<Mutex<State>>,
}

impl ScriptedSignaller {
    fn deliver(&self, signal: Signal) -> io::Result<()> {
        if self.exit.lock().expect("exit sender poisoned").is_none() {
            return Err(io::Error::from_raw_os_error(libc::ESRCH));
        }
        self.state
            .lock()
            .expect("launcher state poisoned")
            .signals
            .push((self.pid, signal));
        let terminal = match signal {
            Signal::SIGKILL => true,
            Signal::SIGINT | Signal::SIGTERM | Signal::SIGQUIT => !self.ignore_graceful,
            _ => false,
        };
        if terminal {
            resolve(&self.exit, ExitOutcome::signalled(signal as i32));
        }
        Ok(())
    }
}

impl Signaller for ScriptedSignaller {
    fn signal(&self, signal: Signal) -> io::Result<()> {
        self.deliver(signal)
    }

    fn signal_tree(&self, signal: Signal) -> io::Result<()> {
        self.deliver(signal)
    }
}
