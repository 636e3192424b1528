use std::process::ExitCode;

fn main() -> ExitCode {
    match droverd::run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            // Telemetry may not be installed yet.
            eprintln!("droverd: {error}");
            ExitCode::FAILURE
        }
    }
}
