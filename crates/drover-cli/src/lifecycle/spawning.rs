//! Daemon process spawning.

use std::env;
use std::ffi::{OsStr, OsString};
use std::process::{Child, Command, Stdio};

use super::error::LifecycleError;

/// Environment variable naming the daemon binary.
const DAEMON_BIN_ENV_VAR: &str = "DROVER_DAEMON_BIN";
const DEFAULT_DAEMON_BIN: &str = "droverd";

/// Spawns `droverd`, forwarding the client's configuration flags.
///
/// The binary is the explicit override if given, otherwise
/// `DROVER_DAEMON_BIN`, otherwise `droverd` on `PATH`.
pub(super) fn spawn_daemon(
    config_arguments: &[OsString],
    binary_override: Option<&OsStr>,
) -> Result<Child, LifecycleError> {
    let binary = resolve_daemon_binary(binary_override);
    let mut command = Command::new(&binary);
    // argv[0] is the client's own name.
    command.args(config_arguments.iter().skip(1));
    command
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    command
        .spawn()
        .map_err(|source| LifecycleError::LaunchDaemon { binary, source })
}

fn resolve_daemon_binary(binary_override: Option<&OsStr>) -> OsString {
    binary_override
        .map(OsString::from)
        .or_else(|| env::var_os(DAEMON_BIN_ENV_VAR))
        .unwrap_or_else(|| OsString::from(DEFAULT_DAEMON_BIN))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_reports_the_overridden_binary() {
        let error = spawn_daemon(&[], Some(OsStr::new("/nonexistent/droverd")))
            .expect_err("missing binary should fail");
        match error {
            LifecycleError::LaunchDaemon { binary, .. } => {
                assert_eq!(binary, OsString::from("/nonexistent/droverd"));
            }
            other => panic!("expected LaunchDaemon, got: {other:?}"),
        }
    }

    #[test]
    fn override_wins() {
        let resolved = resolve_daemon_binary(Some(OsStr::new("/custom/droverd")));
        assert_eq!(resolved, OsString::from("/custom/droverd"));
    }

    #[test]
    fn falls_back_to_environment_or_default() {
        let resolved = resolve_daemon_binary(None);
        let expected =
            env::var_os(DAEMON_BIN_ENV_VAR).unwrap_or_else(|| OsString::from(DEFAULT_DAEMON_BIN));
        assert_eq!(resolved, expected);
    }
}
