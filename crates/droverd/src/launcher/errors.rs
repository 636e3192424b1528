//! Failures raised while creating a child process.

use std::io;

use thiserror::Error;

/// Errors surfaced by a [`Launcher`](super::Launcher).
#[derive(Debug, Error)]
pub enum SpawnError {
    /// The OS refused to start the program.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The child exited before its pid could be read.
    #[error("'{program}' exited before reporting a pid")]
    MissingPid {
        /// Program that was started.
        program: String,
    },
    /// Creating the IPC socket pair failed.
    #[error("failed to create IPC channel: {source}")]
    Channel {
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// Binding the shared worker-group socket failed.
    #[error("failed to bind shared socket {address}: {source}")]
    Bind {
        /// Address from the descriptor's `listen` field.
        address: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The configured user does not exist.
    #[error("unknown user '{user}'")]
    UnknownUser {
        /// Name from the descriptor.
        user: String,
    },
    /// The configured group does not exist.
    #[error("unknown group '{group}'")]
    UnknownGroup {
        /// Name from the descriptor.
        group: String,
    },
    /// Looking up a user or group failed.
    #[error("failed to resolve '{name}': {source}")]
    Lookup {
        /// Name being resolved.
        name: String,
        /// Underlying OS error.
        #[source]
        source: nix::errno::Errno,
    },
}

impl SpawnError {
    /// Wraps an OS error raised while starting `program`.
    pub fn spawn(program: impl Into<String>, source: io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            source,
        }
    }
}
