//! Entrypoint for the `drover` client.
//!
//! Delegates to [`drover_cli::run`], which loads configuration, parses the
//! command line and talks to `droverd` over the configured socket.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    drover_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
