//! Translation of termination signals into the daemon's shutdown token.

use std::io;
use std::thread;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::PROCESS_TARGET;

/// Abstraction over shutdown notification mechanisms.
pub trait ShutdownSignal: Send + Sync {
    /// Arranges for `trigger` to be cancelled once shutdown should proceed.
    /// Returns immediately; the caller awaits the token.
    fn listen(&self, trigger: CancellationToken) -> Result<(), ShutdownError>;
}

/// Errors reported by shutdown signal listeners.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Shutdown listener that waits for termination signals on a dedicated
/// thread. Must be called from within the tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemShutdownSignal;

impl ShutdownSignal for SystemShutdownSignal {
    fn listen(&self, trigger: CancellationToken) -> Result<(), ShutdownError> {
        let mut signals = Signals::new([SIGTERM, SIGINT, SIGQUIT, SIGHUP])
            .map_err(|source| ShutdownError::Install { source })?;
        let handle = signals.handle();

        // Release the signal thread when shutdown comes from elsewhere (killMe).
        let released = trigger.clone();
        tokio::spawn(async move {
            released.cancelled().await;
            handle.close();
        });

        thread::Builder::new()
            .name("droverd-signals".to_owned())
            .spawn(move || {
                if let Some(signal) = signals.forever().next() {
                    info!(
                        target: PROCESS_TARGET,
                        signal,
                        "shutdown signal received"
                    );
                }
                trigger.cancel();
            })
            .map_err(|source| ShutdownError::Install { source })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn external_cancellation_releases_the_signal_thread() {
        let trigger = CancellationToken::new();
        SystemShutdownSignal
            .listen(trigger.clone())
            .unwrap_or_else(|error| panic!("listen: {error}"));
        trigger.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), trigger.cancelled())
            .await
            .unwrap_or_else(|_| panic!("token should be cancelled"));
    }
}
