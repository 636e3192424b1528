//! Client library and command-line runtime for the drover supervisor.
//!
//! [`DaemonClient`] is the RPC glue other tools embed: it connects to
//! `droverd`, launches it on demand and replays the call. [`run`] drives the
//! `drover` binary on top of it. Configuration loading and IO streams can be
//! substituted so tests exercise the runtime without a terminal.

use std::ffi::{OsStr, OsString};
use std::io::Write;
use std::process::ExitCode;
use std::str::FromStr;

use clap::Parser;
use drover_daemon_types::RpcMethod;
use serde_json::Value;

mod cli;
mod client;
mod config;
mod errors;
mod lifecycle;
mod transport;

#[cfg(test)]
mod tests;

use cli::{Cli, CliCommand};
pub use client::{DaemonClient, EventStream, PING_TIMEOUT};
pub(crate) use config::{ConfigLoader, OrthoConfigLoader};
use config::{command_arguments, split_config_arguments};
pub(crate) use errors::AppError;
pub use errors::ClientError;
pub use lifecycle::{
    LifecycleCommand, LifecycleContext, LifecycleError, LifecycleOutput, SystemLifecycle,
};

/// Writers the runtime reports to.
pub(crate) struct IoStreams<'a, W: Write, E: Write> {
    pub(crate) stdout: &'a mut W,
    pub(crate) stderr: &'a mut E,
}

impl<'a, W: Write, E: Write> IoStreams<'a, W, E> {
    pub(crate) const fn new(stdout: &'a mut W, stderr: &'a mut E) -> Self {
        Self { stdout, stderr }
    }
}

struct CliRunner<'a, W: Write, E: Write, L: ConfigLoader> {
    io: &'a mut IoStreams<'a, W, E>,
    loader: &'a L,
    daemon_binary: Option<&'a OsStr>,
}

impl<'a, W, E, L> CliRunner<'a, W, E, L>
where
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    const fn new(io: &'a mut IoStreams<'a, W, E>, loader: &'a L) -> Self {
        Self {
            io,
            loader,
            daemon_binary: None,
        }
    }

    #[cfg(test)]
    const fn with_daemon_binary(mut self, daemon_binary: Option<&'a OsStr>) -> Self {
        self.daemon_binary = daemon_binary;
        self
    }

    fn run<I>(&mut self, args: I) -> ExitCode
    where
        I: IntoIterator<Item = OsString>,
    {
        let mut lifecycle = SystemLifecycle;
        self.run_with_handler(args, |command, context, output| {
            lifecycle.handle(command, context, output)
        })
    }

    fn run_with_handler<I, F>(&mut self, args: I, mut handler: F) -> ExitCode
    where
        I: IntoIterator<Item = OsString>,
        F: FnMut(
            LifecycleCommand,
            LifecycleContext<'_>,
            &mut LifecycleOutput<&mut W, &mut E>,
        ) -> Result<ExitCode, LifecycleError>,
    {
        let args: Vec<OsString> = args.into_iter().collect();
        let split = split_config_arguments(&args);

        let result = Cli::try_parse_from(command_arguments(&args, &split))
            .map_err(AppError::CliUsage)
            .and_then(|cli| {
                self.loader
                    .load(&split.config_arguments)
                    .map(|config| (cli, config))
            })
            .and_then(|(cli, config)| {
                let context = LifecycleContext {
                    config: &config,
                    config_arguments: &split.config_arguments,
                    daemon_binary: self.daemon_binary,
                };
                match cli.command {
                    CliCommand::Daemon { action } => {
                        let mut output =
                            LifecycleOutput::new(&mut *self.io.stdout, &mut *self.io.stderr);
                        handler(action.into(), context, &mut output).map_err(AppError::from)
                    }
                    CliCommand::Call { method, params } => {
                        execute_call(&client_for(context), &method, params.as_deref(), self.io)
                    }
                    CliCommand::Events { topics } => {
                        execute_events(&client_for(context), &topics, self.io)
                    }
                }
            });

        match result {
            Ok(exit_code) => exit_code,
            Err(AppError::CliUsage(error)) if !error.use_stderr() => {
                let _ = write!(self.io.stdout, "{error}");
                ExitCode::SUCCESS
            }
            Err(error) => {
                let _ = writeln!(self.io.stderr, "{error}");
                ExitCode::FAILURE
            }
        }
    }
}

fn client_for(context: LifecycleContext<'_>) -> DaemonClient {
    let client = DaemonClient::new(context.config.clone())
        .with_config_arguments(context.config_arguments.to_vec());
    match context.daemon_binary {
        Some(binary) => client.with_daemon_binary(binary),
        None => client,
    }
}

fn execute_call<W: Write, E: Write>(
    client: &DaemonClient,
    method: &str,
    params: Option<&str>,
    io: &mut IoStreams<'_, W, E>,
) -> Result<ExitCode, AppError> {
    let rpc_method =
        RpcMethod::from_str(method).map_err(|_| AppError::UnknownMethod(method.to_owned()))?;
    let params = match params {
        Some(text) => serde_json::from_str(text).map_err(|source| AppError::ParseParams {
            method: method.to_owned(),
            source,
        })?,
        None => Value::Null,
    };
    match client.call(rpc_method, params) {
        Ok(data) => {
            let rendered = serde_json::to_string_pretty(&data).map_err(AppError::Render)?;
            writeln!(io.stdout, "{rendered}").map_err(AppError::Output)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(ClientError::Rpc(error)) => {
            writeln!(io.stderr, "{} error: {}", error.category, error.message)
                .map_err(AppError::Output)?;
            Ok(ExitCode::FAILURE)
        }
        Err(error) => Err(error.into()),
    }
}

fn execute_events<W: Write, E: Write>(
    client: &DaemonClient,
    topics: &[String],
    io: &mut IoStreams<'_, W, E>,
) -> Result<ExitCode, AppError> {
    for event in client.subscribe(topics)? {
        let line = serde_json::to_string(&event?).map_err(AppError::Render)?;
        writeln!(io.stdout, "{line}").map_err(AppError::Output)?;
        io.stdout.flush().map_err(AppError::Output)?;
    }
    Ok(ExitCode::SUCCESS)
}

/// Runs the `drover` command line with the given arguments and writers.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let mut io = IoStreams::new(stdout, stderr);
    run_with_loader(args, &mut io, &OrthoConfigLoader)
}

pub(crate) fn run_with_loader<'a, I, W, E, L>(
    args: I,
    io: &'a mut IoStreams<'a, W, E>,
    loader: &'a L,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    CliRunner::new(io, loader).run(args)
}

#[cfg(test)]
pub(crate) fn run_with_handler<'a, I, W, E, L, F>(
    args: I,
    io: &'a mut IoStreams<'a, W, E>,
    loader: &'a L,
    daemon_binary: Option<&'a OsStr>,
    handler: F,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
    L: ConfigLoader,
    F: FnMut(
        LifecycleCommand,
        LifecycleContext<'_>,
        &mut LifecycleOutput<&mut W, &mut E>,
    ) -> Result<ExitCode, LifecycleError>,
{
    CliRunner::new(io, loader)
        .with_daemon_binary(daemon_binary)
        .run_with_handler(args, handler)
}

