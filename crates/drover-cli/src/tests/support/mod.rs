//! Harness types shared by the client's unit and behavioural tests.

mod fake_daemon;
mod lifecycle;

use std::cell::RefCell;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, ensure};
use drover_config::{Config, SocketEndpoint};
use rstest::fixture;
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::{AppError, ConfigLoader, IoStreams, run_with_handler};

pub(crate) use fake_daemon::FakeDaemon;
pub(crate) use lifecycle::TestLifecycle;

/// Returns a fixed configuration regardless of the flags given.
pub(crate) struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    pub(crate) const fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self, _args: &[OsString]) -> Result<Config, AppError> {
        Ok(self.config.clone())
    }
}

/// A temporary directory with a Unix socket path inside it.
pub(crate) struct SocketDir {
    dir: TempDir,
}

impl SocketDir {
    pub(crate) fn new() -> Result<Self> {
        Ok(Self {
            dir: TempDir::new().context("temp dir")?,
        })
    }

    pub(crate) fn socket_path(&self) -> PathBuf {
        self.dir.path().join("run").join("droverd.sock")
    }

    pub(crate) fn config(&self) -> Result<Config> {
        let socket = self.socket_path();
        let path = socket.to_str().context("utf8 socket path")?;
        Ok(Config {
            daemon_socket: SocketEndpoint::unix(path),
            state_dir: self.dir.path().join("state").try_into().context("utf8 state dir")?,
            ..Config::default()
        })
    }

    /// Starts a fake daemon on the socket, creating its parent directory.
    pub(crate) fn serve(&self, connections: Vec<Vec<String>>) -> Result<FakeDaemon> {
        let socket = self.socket_path();
        if let Some(parent) = socket.parent() {
            std::fs::create_dir_all(parent).context("socket parent")?;
        }
        FakeDaemon::spawn(&socket, connections)
    }
}

pub(crate) fn result_line(data: &Value) -> String {
    json!({ "kind": "result", "data": data }).to_string()
}

pub(crate) fn error_line(category: &str, message: &str) -> String {
    json!({ "kind": "error", "error": { "category": category, "message": message } }).to_string()
}

pub(crate) fn log_event_line(name: &str, line: &str) -> String {
    json!({
        "kind": "event",
        "event": {
            "topic": "log:out",
            "at": 1_700_000_000_000_u64,
            "process": { "pm_id": 0, "name": name, "namespace": "default" },
            "body": { "type": "log", "stream": "out", "line": line }
        }
    })
    .to_string()
}

/// Test world holding CLI state, the fake daemon and captured output.
pub(crate) struct TestWorld {
    pub sockets: SocketDir,
    pub daemon: Option<FakeDaemon>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: Option<ExitCode>,
    pub requests: Vec<Value>,
    pub lifecycle: TestLifecycle,
    pub daemon_binary: Option<OsString>,
}

impl TestWorld {
    pub(crate) fn new() -> Result<Self> {
        Ok(Self {
            sockets: SocketDir::new()?,
            daemon: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_code: None,
            requests: Vec::new(),
            lifecycle: TestLifecycle::default(),
            daemon_binary: None,
        })
    }

    pub(crate) fn serve_replies(&mut self, replies: Vec<String>) -> Result<()> {
        self.daemon = Some(self.sockets.serve(vec![replies])?);
        Ok(())
    }

    pub(crate) fn run(&mut self, command: &str) -> Result<()> {
        self.stdout.clear();
        self.stderr.clear();
        self.requests.clear();
        let loader = StaticConfigLoader::new(self.sockets.config()?);
        let daemon_binary = self.daemon_binary.clone();
        let lifecycle = &self.lifecycle;
        let mut io = IoStreams::new(&mut self.stdout, &mut self.stderr);
        let exit = run_with_handler(
            build_args(command),
            &mut io,
            &loader,
            daemon_binary.as_deref(),
            |invocation, context, output| lifecycle.handle(invocation, context, output),
        );
        self.exit_code = Some(exit);
        if let Some(mut daemon) = self.daemon.take() {
            for line in daemon.take_requests()? {
                self.requests
                    .push(serde_json::from_str(&line).context("request is JSON")?);
            }
        }
        Ok(())
    }

    pub(crate) fn stdout_text(&self) -> Result<String> {
        String::from_utf8(self.stdout.clone()).context("stdout utf8")
    }

    pub(crate) fn stderr_text(&self) -> Result<String> {
        String::from_utf8(self.stderr.clone()).context("stderr utf8")
    }

    pub(crate) fn assert_exit(&self, expected: ExitCode) -> Result<()> {
        let exit = self.exit_code.context("exit code recorded")?;
        ensure!(exit == expected, "expected {expected:?}, got {exit:?}");
        Ok(())
    }

    pub(crate) fn single_request(&self) -> Result<&Value> {
        ensure!(
            self.requests.len() == 1,
            "expected one request, saw {}",
            self.requests.len()
        );
        self.requests.first().context("request recorded")
    }
}

fn build_args(command: &str) -> Vec<OsString> {
    std::iter::once(OsString::from("drover"))
        .chain(command.split_whitespace().map(OsString::from))
        .collect()
}

#[fixture]
pub(crate) fn world() -> RefCell<TestWorld> {
    RefCell::new(TestWorld::new().expect("test world"))
}
