//! Derives the on-disk layout shared by the CLI and daemon.
//!
//! Two trees exist. The runtime directory sits next to the Unix socket and
//! holds the daemon's lock, pid and health snapshot. The state directory holds
//! what the supervisor owns on behalf of managed processes: their log files,
//! their pid files and the dump snapshot used for resurrection.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::{Config, SocketEndpoint};

#[cfg(unix)]
use dirs::runtime_dir;
#[cfg(unix)]
use libc::geteuid;

/// Canonical paths for daemon runtime artefacts.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    runtime_dir: PathBuf,
    lock_path: PathBuf,
    pid_path: PathBuf,
    health_path: PathBuf,
}

impl RuntimePaths {
    /// Derives runtime paths from the shared configuration.
    pub fn from_config(config: &Config) -> Result<Self, RuntimePathsError> {
        let runtime_dir = runtime_directory(config)?;
        create_directory(&runtime_dir)?;
        Ok(Self {
            lock_path: runtime_dir.join("droverd.lock"),
            pid_path: runtime_dir.join("droverd.pid"),
            health_path: runtime_dir.join("droverd.health"),
            runtime_dir,
        })
    }

    /// Directory holding runtime artefacts.
    #[must_use]
    pub fn runtime_dir(&self) -> &Path {
        self.runtime_dir.as_path()
    }

    /// Path to the lock file guarding singleton startup.
    #[must_use]
    pub fn lock_path(&self) -> &Path {
        self.lock_path.as_path()
    }

    /// Path to the daemon PID file.
    #[must_use]
    pub fn pid_path(&self) -> &Path {
        self.pid_path.as_path()
    }

    /// Path to the health snapshot.
    #[must_use]
    pub fn health_path(&self) -> &Path {
        self.health_path.as_path()
    }
}

/// Layout of the supervisor's state directory.
#[derive(Debug, Clone)]
pub struct StatePaths {
    root: PathBuf,
    logs_dir: PathBuf,
    pids_dir: PathBuf,
    dump_path: PathBuf,
}

impl StatePaths {
    /// Derives and creates the state tree from configuration.
    pub fn from_config(config: &Config) -> Result<Self, RuntimePathsError> {
        Self::create(config.state_dir().as_std_path())
    }

    /// Creates the state tree rooted at `root`.
    pub fn create(root: &Path) -> Result<Self, RuntimePathsError> {
        let paths = Self {
            root: root.to_path_buf(),
            logs_dir: root.join("logs"),
            pids_dir: root.join("pids"),
            dump_path: root.join("dump.json"),
        };
        create_directory(&paths.logs_dir)?;
        create_directory(&paths.pids_dir)?;
        Ok(paths)
    }

    /// Root of the state tree.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    /// Directory receiving per-process log files.
    #[must_use]
    pub fn logs_dir(&self) -> &Path {
        self.logs_dir.as_path()
    }

    /// Directory receiving per-process pid files.
    #[must_use]
    pub fn pids_dir(&self) -> &Path {
        self.pids_dir.as_path()
    }

    /// Location of the dump snapshot.
    #[must_use]
    pub fn dump_path(&self) -> &Path {
        self.dump_path.as_path()
    }
}

fn create_directory(path: &Path) -> Result<(), RuntimePathsError> {
    fs::create_dir_all(path).map_err(|source| RuntimePathsError::RuntimeDirectory {
        path: path.to_path_buf(),
        source,
    })
}

fn runtime_directory(config: &Config) -> Result<PathBuf, RuntimePathsError> {
    match config.daemon_socket() {
        SocketEndpoint::Unix { path } => {
            match path.parent().filter(|parent| !parent.as_str().is_empty()) {
                Some(parent) => Ok(parent.as_std_path().to_path_buf()),
                None => Err(RuntimePathsError::MissingSocketParent {
                    path: path.to_string(),
                }),
            }
        }
        SocketEndpoint::Tcp { .. } => Ok(default_runtime_directory()),
    }
}

fn default_runtime_directory() -> PathBuf {
    #[cfg(unix)]
    {
        if let Some(mut dir) = runtime_dir() {
            dir.push("drover");
            return dir;
        }
        let mut dir = env::temp_dir();
        dir.push("drover");
        dir.push(format!("uid-{}", unsafe { geteuid() }));
        dir
    }

    #[cfg(not(unix))]
    {
        let mut dir = env::temp_dir();
        dir.push("drover");
        dir
    }
}

/// Errors raised while deriving daemon runtime or state paths.
#[derive(Debug, Error)]
pub enum RuntimePathsError {
    /// The socket path lacked a parent directory.
    #[error("socket path '{path}' has no parent directory")]
    MissingSocketParent {
        /// Offending socket path.
        path: String,
    },
    /// Creating a directory failed.
    #[error("failed to prepare directory '{path}': {source}")]
    RuntimeDirectory {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying filesystem error.
        #[source]
        source: std::io::Error,
    },
}
