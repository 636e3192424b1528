//! Test configuration loaders for scenarios covering success and failure paths.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use camino::Utf8PathBuf;
use ortho_config::{OrthoConfig, OrthoError};
use tempfile::TempDir;

use drover_config::{Config, SocketEndpoint};

use crate::bootstrap::ConfigLoader;

/// Loader that provisions a Unix socket and a state directory under a
/// temporary directory.
#[derive(Clone)]
pub struct TestConfigLoader {
    root: Arc<Mutex<TempDir>>,
    resurrect_on_start: bool,
}

impl TestConfigLoader {
    #[must_use]
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temporary directory for socket");
        Self {
            root: Arc::new(Mutex::new(dir)),
            resurrect_on_start: false,
        }
    }

    /// Replays the dump snapshot on start.
    #[must_use]
    pub fn resurrecting(mut self) -> Self {
        self.resurrect_on_start = true;
        self
    }

    fn root(&self) -> PathBuf {
        self.root
            .lock()
            .expect("temporary directory mutex poisoned")
            .path()
            .to_path_buf()
    }

    /// Directory holding the socket and the runtime artefacts beside it.
    pub fn runtime_dir(&self) -> PathBuf {
        self.root().join("run")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root().join("state")
    }

    pub fn socket_path(&self) -> PathBuf {
        self.runtime_dir().join("droverd.sock")
    }

    pub fn config(&self) -> Config {
        Config {
            daemon_socket: SocketEndpoint::unix(utf8(&self.socket_path())),
            state_dir: Utf8PathBuf::from(utf8(&self.state_dir())),
            resurrect_on_start: self.resurrect_on_start,
            ..Config::default()
        }
    }
}

impl Default for TestConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config())
    }
}

/// Loader that intentionally fails by passing an invalid socket argument.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("droverd"),
            OsString::from("--daemon-socket"),
            OsString::from("invalid://socket"),
        ];
        Config::load_from_iter(args)
    }
}

fn utf8(path: &Path) -> String {
    path.to_str()
        .expect("temporary path was not valid UTF-8")
        .to_owned()
}
