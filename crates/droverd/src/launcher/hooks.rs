//! Lifecycle hooks shared by every launch strategy.
//!
//! Attaching hooks turns the raw pieces of a [`SpawnedChild`] into background
//! tasks: output lines go to the log sinks and the bus, channel lines are
//! classified and forwarded to the supervisor's control loop, and the exit
//! future reports the outcome there too. The supervisor keeps the returned
//! [`LiveChild`] to signal the child and write to it.

use std::sync::Arc;

use drover_daemon_types::{BusEvent, ChildMessage, LogStream, ParentMessage, ProcessRef};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use super::{ChildReader, ChildWriter, ExitOutcome, LAUNCHER_TARGET, Signaller, SpawnedChild};
use crate::supervisor::clock::Clock;
use crate::supervisor::control::{ChildEvent, ControlEvent};
use crate::supervisor::{EventBus, logs::LogSinks};

/// Where a child's hooks deliver what they observe.
#[derive(Clone)]
pub(crate) struct HookContext {
    pub(crate) launch: u64,
    pub(crate) process: ProcessRef,
    pub(crate) logs: Option<LogSinks>,
    pub(crate) bus: EventBus,
    pub(crate) control: UnboundedSender<ControlEvent>,
    pub(crate) clock: Clock,
}

/// Handles the supervisor retains for a running child.
#[derive(Debug, Clone)]
pub(crate) struct LiveChild {
    pub(crate) pid: u32,
    pub(crate) signaller: Arc<dyn Signaller>,
    pub(crate) stdin: Option<UnboundedSender<String>>,
    pub(crate) channel: Option<UnboundedSender<ParentMessage>>,
}

/// Spawns the hook tasks for `child`. Must run inside the tokio runtime.
pub(crate) fn attach_hooks(context: &HookContext, child: SpawnedChild) -> LiveChild {
    let SpawnedChild {
        pid,
        stdout,
        stderr,
        stdin,
        channel,
        exit,
        signaller,
    } = child;

    if let Some(reader) = stdout {
        tokio::spawn(forward_output(context.clone(), LogStream::Out, reader));
    }
    if let Some(reader) = stderr {
        tokio::spawn(forward_output(context.clone(), LogStream::Err, reader));
    }
    let stdin = stdin.map(|writer| {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(write_stdin(pid, writer, receiver));
        sender
    });
    let channel = channel.map(|channel| {
        tokio::spawn(read_channel(context.clone(), channel.reader));
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(write_channel(pid, channel.writer, receiver));
        sender
    });

    let control = context.control.clone();
    let launch = context.launch;
    tokio::spawn(async move {
        let outcome: ExitOutcome = exit.await;
        notify(&control, launch, ChildEvent::Exited(outcome));
    });

    LiveChild {
        pid,
        signaller,
        stdin,
        channel,
    }
}

fn notify(control: &UnboundedSender<ControlEvent>, launch: u64, event: ChildEvent) {
    if control.send(ControlEvent::Child { launch, event }).is_err() {
        debug!(target: LAUNCHER_TARGET, launch, "control loop gone; dropping child event");
    }
}

async fn forward_output(context: HookContext, stream: LogStream, reader: ChildReader) {
    let sink = context.logs.as_ref().map(|logs| match stream {
        LogStream::Out => Arc::clone(&logs.out),
        LogStream::Err => Arc::clone(&logs.err),
    });
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(sink) = &sink {
                    sink.write_line(&line);
                }
                context.bus.publish(BusEvent::log(
                    context.clock.now_ms(),
                    context.process.clone(),
                    stream,
                    line,
                ));
            }
            Ok(None) => break,
            Err(error) => {
                warn!(
                    target: LAUNCHER_TARGET,
                    app = %context.process.name,
                    %stream,
                    %error,
                    "stopped reading child output"
                );
                break;
            }
        }
    }
}

async fn read_channel(context: HookContext, reader: ChildReader) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        notify(
            &context.control,
            context.launch,
            ChildEvent::Message(ChildMessage::parse(&line)),
        );
    }
}

async fn write_stdin(pid: u32, mut writer: ChildWriter, mut lines: UnboundedReceiver<String>) {
    while let Some(line) = lines.recv().await {
        let mut payload = line.into_bytes();
        payload.push(b'\n');
        if let Err(error) = writer.write_all(&payload).await {
            warn!(target: LAUNCHER_TARGET, pid, %error, "failed to write child stdin");
            break;
        }
        if let Err(error) = writer.flush().await {
            warn!(target: LAUNCHER_TARGET, pid, %error, "failed to flush child stdin");
            break;
        }
    }
}

async fn write_channel(
    pid: u32,
    mut writer: ChildWriter,
    mut messages: UnboundedReceiver<ParentMessage>,
) {
    while let Some(message) = messages.recv().await {
        let mut payload = match serde_json::to_vec(&message) {
            Ok(payload) => payload,
            Err(error) => {
                warn!(target: LAUNCHER_TARGET, pid, %error, "failed to encode channel message");
                continue;
            }
        };
        payload.push(b'\n');
        if let Err(error) = writer.write_all(&payload).await {
            debug!(target: LAUNCHER_TARGET, pid, %error, "child channel closed");
            break;
        }
    }
}
