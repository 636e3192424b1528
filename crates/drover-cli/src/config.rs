//! Configuration loading helpers for the `drover` client.
//!
//! Leading configuration flags are peeled off the command line and handed to
//! `ortho_config`; everything from the first command token onwards belongs to
//! clap. The same configuration flags are forwarded to `droverd` when the
//! client launches it, so both sides agree on the socket and state layout.

use std::ffi::{OsStr, OsString};

use drover_config::Config;
use ortho_config::OrthoConfig;

use crate::AppError;

/// Flags accepted by the configuration loader, paired with whether they take
/// a value.
///
/// MAINTENANCE: keep in step with the fields of `drover_config::Config`.
pub(crate) const CONFIG_CLI_FLAGS: &[(&str, bool)] = &[
    ("--config-path", true),
    ("--daemon-socket", true),
    ("--log-filter", true),
    ("--log-format", true),
    ("--state-dir", true),
    ("--reload-lock-timeout-ms", true),
    ("--concurrent-actions", true),
    ("--bulk-concurrency", true),
    ("--graceful-timeout-ms", true),
    ("--bus-capacity", true),
    ("--resurrect-on-start", false),
];

pub(crate) trait ConfigLoader {
    /// Loads configuration for the client.
    ///
    /// # Flag Ordering
    ///
    /// Configuration flags must precede the command. A configuration flag
    /// written after the command is parsed as a command argument.
    fn load(&self, args: &[OsString]) -> Result<Config, AppError>;
}

pub(crate) struct OrthoConfigLoader;

impl ConfigLoader for OrthoConfigLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, AppError> {
        Config::load_from_iter(args.iter().cloned()).map_err(AppError::LoadConfiguration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagAction {
    Include { needs_value: bool },
    Skip,
}

fn classify_flag(argument: &OsStr) -> FlagAction {
    let text = argument.to_string_lossy();
    if !text.starts_with("--") {
        return FlagAction::Skip;
    }
    let (flag, inline_value) = match text.split_once('=') {
        Some((flag, _)) => (flag, true),
        None => (text.as_ref(), false),
    };
    CONFIG_CLI_FLAGS
        .iter()
        .find(|(known, _)| *known == flag)
        .map_or(FlagAction::Skip, |(_, takes_value)| FlagAction::Include {
            needs_value: *takes_value && !inline_value,
        })
}

/// Command line split into configuration flags and the command proper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ConfigArgumentSplit {
    /// Program name followed by the configuration flags.
    pub(crate) config_arguments: Vec<OsString>,
    /// Index of the first command token in the original arguments.
    pub(crate) command_start: usize,
}

pub(crate) fn split_config_arguments(args: &[OsString]) -> ConfigArgumentSplit {
    let Some(program) = args.first() else {
        return ConfigArgumentSplit {
            config_arguments: Vec::new(),
            command_start: 0,
        };
    };

    let mut filtered = vec![program.clone()];
    let mut command_start = 1;
    let mut pending_value = false;

    for argument in args.iter().skip(1) {
        if pending_value {
            filtered.push(argument.clone());
            pending_value = false;
            command_start += 1;
            continue;
        }
        match classify_flag(argument) {
            FlagAction::Include { needs_value } => {
                filtered.push(argument.clone());
                pending_value = needs_value;
                command_start += 1;
            }
            FlagAction::Skip => break,
        }
    }

    ConfigArgumentSplit {
        config_arguments: filtered,
        command_start,
    }
}

/// Rebuilds the argument list clap sees: the program name plus the command.
pub(crate) fn command_arguments(args: &[OsString], split: &ConfigArgumentSplit) -> Vec<OsString> {
    args.first()
        .into_iter()
        .chain(args.iter().skip(split.command_start))
        .cloned()
        .collect()
}
