//! Builds and spawns the OS command for a launch request.

use std::os::fd::RawFd;
use std::process::Stdio;
use std::sync::Arc;

use drover_daemon_types::AppDescriptor;
use futures::FutureExt;
use nix::unistd::{Group, User};
use tokio::process::Command;
use tracing::{debug, warn};

use super::channel::{ChannelPair, FdMapping, apply_mappings};
use super::{
    CHANNEL_FD, ChildReader, ChildWriter, ExitOutcome, LAUNCHER_TARGET, LISTEN_FD, LaunchRequest,
    PidSignaller, SpawnError, SpawnedChild,
};

const CHANNEL_FD_VAR: &str = "DROVER_CHANNEL_FD";
const LISTEN_FD_VAR: &str = "DROVER_LISTEN_FD";
const LISTEN_FDS_VAR: &str = "LISTEN_FDS";

/// Spawns the request's program with piped streams, an IPC channel on
/// [`CHANNEL_FD`] and, when given, a shared socket on [`LISTEN_FD`].
///
/// The child leads its own process group so the kill path can reap its
/// descendants. Must run inside the tokio runtime.
pub(super) fn spawn_child(
    request: &LaunchRequest,
    shared_socket: Option<RawFd>,
) -> Result<SpawnedChild, SpawnError> {
    let descriptor = &request.descriptor;
    let (program, args) = program_and_args(descriptor);
    let mut command = Command::new(&program);
    command
        .args(&args)
        .envs(&request.env)
        .env(CHANNEL_FD_VAR, CHANNEL_FD.to_string())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(false);
    if let Some(cwd) = &descriptor.cwd {
        command.current_dir(cwd);
    }
    if let Some(user) = &descriptor.uid {
        command.uid(resolve_user(user)?);
    }
    if let Some(group) = &descriptor.gid {
        command.gid(resolve_group(group)?);
    }

    let channel = ChannelPair::new()?;
    let mut mappings = vec![FdMapping {
        source: channel.child_fd(),
        target: CHANNEL_FD,
    }];
    if let Some(source) = shared_socket {
        mappings.push(FdMapping {
            source,
            target: LISTEN_FD,
        });
        command
            .env(LISTEN_FD_VAR, LISTEN_FD.to_string())
            .env(LISTEN_FDS_VAR, "1");
    }
    // SAFETY: the hook only calls fcntl and dup2, both async-signal-safe.
    unsafe {
        command.pre_exec(move || apply_mappings(&mappings));
    }

    let mut child = command
        .spawn()
        .map_err(|source| SpawnError::spawn(&program, source))?;
    let Some(pid) = child.id() else {
        return Err(SpawnError::MissingPid { program });
    };
    let channel = match channel.into_parent() {
        Ok(channel) => channel,
        Err(error) => {
            if let Err(kill_error) = child.start_kill() {
                warn!(target: LAUNCHER_TARGET, pid, %kill_error, "failed to kill orphaned child");
            }
            return Err(error);
        }
    };
    debug!(
        target: LAUNCHER_TARGET,
        pid,
        program = %program,
        shared_socket = shared_socket.is_some(),
        "child spawned"
    );

    let stdout = child.stdout.take().map(|stream| Box::new(stream) as ChildReader);
    let stderr = child.stderr.take().map(|stream| Box::new(stream) as ChildReader);
    let stdin = child.stdin.take().map(|stream| Box::new(stream) as ChildWriter);
    let exit = async move {
        match child.wait().await {
            Ok(status) => ExitOutcome::from(status),
            Err(error) => {
                warn!(target: LAUNCHER_TARGET, pid, %error, "failed to reap child");
                ExitOutcome::default()
            }
        }
    }
    .boxed();

    Ok(SpawnedChild {
        pid,
        stdout,
        stderr,
        stdin,
        channel: Some(channel),
        exit,
        signaller: Arc::new(PidSignaller::new(pid)),
    })
}

/// The program to execute and its arguments.
///
/// With an interpreter the script becomes the interpreter's argument.
fn program_and_args(descriptor: &AppDescriptor) -> (String, Vec<String>) {
    match &descriptor.interpreter {
        Some(interpreter) => {
            let mut args = descriptor.interpreter_args.clone();
            args.push(descriptor.script.clone());
            args.extend(descriptor.args.iter().cloned());
            (interpreter.clone(), args)
        }
        None => (descriptor.script.clone(), descriptor.args.clone()),
    }
}

fn resolve_user(user: &str) -> Result<u32, SpawnError> {
    if let Ok(uid) = user.parse::<u32>() {
        return Ok(uid);
    }
    match User::from_name(user) {
        Ok(Some(found)) => Ok(found.uid.as_raw()),
        Ok(None) => Err(SpawnError::UnknownUser {
            user: user.to_owned(),
        }),
        Err(source) => Err(SpawnError::Lookup {
            name: user.to_owned(),
            source,
        }),
    }
}

fn resolve_group(group: &str) -> Result<u32, SpawnError> {
    if let Ok(gid) = group.parse::<u32>() {
        return Ok(gid);
    }
    match Group::from_name(group) {
        Ok(Some(found)) => Ok(found.gid.as_raw()),
        Ok(None) => Err(SpawnError::UnknownGroup {
            group: group.to_owned(),
        }),
        Err(source) => Err(SpawnError::Lookup {
            name: group.to_owned(),
            source,
        }),
    }
}
