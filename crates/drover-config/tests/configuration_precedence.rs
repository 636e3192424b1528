//! Behavioural coverage for configuration layering.

use std::cell::RefCell;
use std::ffi::OsString;
use std::fs;
use std::sync::{Mutex, MutexGuard};

use camino::Utf8PathBuf;
use once_cell::sync::Lazy;
use ortho_config::OrthoConfig;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;

use drover_config::{
    Config, DEFAULT_RELOAD_LOCK_TIMEOUT_MS, SocketEndpoint, default_log_filter,
    default_log_format, default_socket_endpoint, default_state_dir,
};

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

struct Harness {
    temp_dir: TempDir,
    file_lines: RefCell<Vec<String>>,
    cli_args: RefCell<Vec<OsString>>,
    env_overrides: RefCell<Vec<(String, Option<OsString>)>>,
    loaded: RefCell<Option<Result<Config, String>>>,
    _env_guard: MutexGuard<'static, ()>,
}

impl Harness {
    fn new() -> Self {
        let guard = ENV_MUTEX
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Self {
            temp_dir: TempDir::new().expect("create temporary directory"),
            file_lines: RefCell::new(Vec::new()),
            cli_args: RefCell::new(vec![OsString::from("drover")]),
            env_overrides: RefCell::new(Vec::new()),
            loaded: RefCell::new(None),
            _env_guard: guard,
        }
    }

    fn add_file_line(&self, line: String) {
        self.file_lines.borrow_mut().push(line);
    }

    fn set_env(&self, key: &str, value: &str) {
        let previous = std::env::var_os(key);
        // Environment mutation is serialised by ENV_MUTEX and undone on drop.
        unsafe { std::env::set_var(key, value) };
        self.env_overrides
            .borrow_mut()
            .push((key.to_owned(), previous));
    }

    fn push_cli_arg(&self, arg: impl Into<OsString>) {
        self.cli_args.borrow_mut().push(arg.into());
    }

    fn config(&self) -> Config {
        if self.loaded.borrow().is_none() {
            let mut args = self.cli_args.borrow().clone();
            let lines = self.file_lines.borrow();
            if !lines.is_empty() {
                let path = self.temp_dir.path().join("drover.toml");
                fs::write(&path, lines.join("\n")).expect("write configuration");
                args.insert(1, OsString::from("--config-path"));
                args.insert(2, path.into_os_string());
            }
            let result = Config::load_from_iter(args).map_err(|error| error.to_string());
            *self.loaded.borrow_mut() = Some(result);
        }
        match self.loaded.borrow().as_ref() {
            Some(Ok(config)) => config.clone(),
            Some(Err(error)) => panic!("configuration failed to load: {error}"),
            None => panic!("configuration was not loaded"),
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let mut overrides = self.env_overrides.borrow_mut();
        while let Some((key, value)) = overrides.pop() {
            match value {
                Some(previous) => unsafe { std::env::set_var(&key, previous) },
                None => unsafe { std::env::remove_var(&key) },
            }
        }
    }
}

fn socket_toml(socket: &SocketEndpoint) -> String {
    match socket {
        SocketEndpoint::Unix { path } => {
            format!("daemon_socket = {{ transport = \"unix\", path = \"{path}\" }}")
        }
        SocketEndpoint::Tcp { host, port } => {
            format!("daemon_socket = {{ transport = \"tcp\", host = \"{host}\", port = {port} }}")
        }
    }
}

fn parse_socket(socket: &str) -> SocketEndpoint {
    socket
        .parse()
        .unwrap_or_else(|error| panic!("invalid socket '{socket}': {error}"))
}

#[fixture]
fn harness() -> Harness {
    Harness::new()
}

#[given("a configuration file setting the daemon socket to \"{socket}\"")]
fn given_file_socket(harness: &Harness, socket: String) {
    harness.add_file_line(socket_toml(&parse_socket(&socket)));
}

#[given("a configuration file setting the state directory to \"{dir}\"")]
fn given_file_state_dir(harness: &Harness, dir: String) {
    harness.add_file_line(format!("state_dir = \"{dir}\""));
}

#[given("the environment overrides the daemon socket to \"{socket}\"")]
fn given_env_socket(harness: &Harness, socket: String) {
    harness.set_env("DROVER_DAEMON_SOCKET", &socket);
}

#[when("the CLI sets the daemon socket to \"{socket}\"")]
fn when_cli_socket(harness: &Harness, socket: String) {
    harness.push_cli_arg("--daemon-socket");
    harness.push_cli_arg(socket);
}

#[when("the configuration loads without overrides")]
fn when_load_plain(harness: &Harness) {
    let _ = harness.config();
}

#[then("loading the configuration resolves the daemon socket to \"{socket}\"")]
fn then_socket(harness: &Harness, socket: String) {
    assert_eq!(harness.config().daemon_socket(), &parse_socket(&socket));
}

#[then("loading the configuration resolves the state directory to \"{dir}\"")]
fn then_state_dir(harness: &Harness, dir: String) {
    assert_eq!(harness.config().state_dir(), &Utf8PathBuf::from(dir));
}

#[then("loading the configuration applies the built-in defaults")]
fn then_defaults(harness: &Harness) {
    let config = harness.config();
    assert_eq!(config.daemon_socket(), &default_socket_endpoint());
    assert_eq!(config.log_filter(), default_log_filter());
    assert_eq!(config.log_format(), default_log_format());
    assert_eq!(config.state_dir(), &default_state_dir());
    assert_eq!(config.reload_lock_timeout_ms, DEFAULT_RELOAD_LOCK_TIMEOUT_MS);
    assert!(!config.resurrect_on_start());
}

#[scenario(
    path = "tests/features/configuration_precedence.feature",
    name = "Defaults apply without overrides"
)]
fn defaults_apply(#[from(harness)] harness: Harness) {
    let _ = harness;
}

#[scenario(
    path = "tests/features/configuration_precedence.feature",
    name = "Configuration file sets the state directory"
)]
fn file_sets_state_dir(#[from(harness)] harness: Harness) {
    let _ = harness;
}

#[scenario(
    path = "tests/features/configuration_precedence.feature",
    name = "Environment overrides the configuration file"
)]
fn environment_overrides_file(#[from(harness)] harness: Harness) {
    let _ = harness;
}

#[scenario(
    path = "tests/features/configuration_precedence.feature",
    name = "CLI flags override the environment"
)]
fn cli_overrides_environment(#[from(harness)] harness: Harness) {
    let _ = harness;
}
