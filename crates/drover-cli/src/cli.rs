//! Command-line surface of the `drover` binary.

use clap::{Parser, Subcommand};

/// Client for the drover process supervisor.
#[derive(Parser, Debug)]
#[command(name = "drover", disable_help_subcommand = true)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

/// Top-level commands.
#[derive(Subcommand, Debug, Clone)]
pub(crate) enum CliCommand {
    /// Manages the `droverd` process itself.
    Daemon {
        /// The lifecycle action to perform.
        #[command(subcommand)]
        action: DaemonAction,
    },
    /// Sends one RPC to the daemon and prints its result.
    Call {
        /// Method name, for example `getMonitorData`.
        #[arg(value_name = "METHOD")]
        method: String,
        /// JSON parameters; omitted means `null`.
        #[arg(value_name = "PARAMS")]
        params: Option<String>,
    },
    /// Streams bus events until interrupted.
    Events {
        /// Topic prefixes to follow; none follows everything.
        #[arg(value_name = "TOPIC", num_args = 0..)]
        topics: Vec<String>,
    },
}

/// Daemon lifecycle actions.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DaemonAction {
    /// Starts the daemon and waits for it to report ready.
    Start,
    /// Stops the running daemon.
    Stop,
    /// Prints the daemon's health snapshot.
    Status,
}
