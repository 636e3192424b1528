//! Worker groups share one daemon-owned listening socket.
//!
//! The socket is bound the first time an application with a `listen` address
//! is launched and handed to every sibling on [`LISTEN_FD`](super::LISTEN_FD).
//! It outlives individual workers, so replacements during a reload accept on
//! the same socket without a gap. It is released when the last record of the
//! application is deleted.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use socket2::{Domain, Socket, Type};
use tracing::{info, warn};

use super::command::spawn_child;
use super::{LAUNCHER_TARGET, LaunchRequest, Launcher, SpawnError, SpawnedChild};

const LISTEN_BACKLOG: i32 = 1024;

/// Spawns socket-sharing siblings.
#[derive(Debug, Default)]
pub struct WorkerGroupLauncher {
    sockets: Mutex<HashMap<String, Arc<Socket>>>,
}

impl WorkerGroupLauncher {
    /// Builds the launcher with no bound sockets.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn shared_socket(&self, name: &str, address: &str) -> Result<Arc<Socket>, SpawnError> {
        let mut sockets = self.sockets.lock().map_err(|_| SpawnError::Bind {
            address: address.to_owned(),
            source: std::io::Error::other("socket table poisoned"),
        })?;
        if let Some(socket) = sockets.get(name) {
            return Ok(Arc::clone(socket));
        }
        let socket = Arc::new(bind_shared(address)?);
        info!(
            target: LAUNCHER_TARGET,
            app = name,
            address,
            "bound shared worker-group socket"
        );
        sockets.insert(name.to_owned(), Arc::clone(&socket));
        Ok(socket)
    }

    #[cfg(test)]
    fn bound(&self) -> usize {
        self.sockets.lock().map(|sockets| sockets.len()).unwrap_or_default()
    }
}

#[async_trait]
impl Launcher for WorkerGroupLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<SpawnedChild, SpawnError> {
        let descriptor = &request.descriptor;
        let Some(address) = &descriptor.listen else {
            warn!(
                target: LAUNCHER_TARGET,
                app = %descriptor.name,
                "worker group without a listen address; siblings share no socket"
            );
            return spawn_child(request, None);
        };
        let socket = self.shared_socket(&descriptor.name, address)?;
        spawn_child(request, Some(socket.as_raw_fd()))
    }

    fn release(&self, name: &str) {
        if let Ok(mut sockets) = self.sockets.lock()
            && sockets.remove(name).is_some()
        {
            info!(target: LAUNCHER_TARGET, app = name, "released shared worker-group socket");
        }
    }
}

fn bind_shared(address: &str) -> Result<Socket, SpawnError> {
    let bind_error = |source| SpawnError::Bind {
        address: address.to_owned(),
        source,
    };
    let addr: SocketAddr = address
        .parse()
        .map_err(|_| bind_error(std::io::Error::from(std::io::ErrorKind::InvalidInput)))?;
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None).map_err(bind_error)?;
    socket.set_reuse_address(true).map_err(bind_error)?;
    socket.bind(&addr.into()).map_err(bind_error)?;
    socket.listen(LISTEN_BACKLOG).map_err(bind_error)?;
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_once_per_application() {
        let launcher = WorkerGroupLauncher::new();
        let first = launcher
            .shared_socket("api", "127.0.0.1:0")
            .unwrap_or_else(|error| panic!("bind: {error}"));
        let second = launcher
            .shared_socket("api", "127.0.0.1:0")
            .unwrap_or_else(|error| panic!("bind: {error}"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(launcher.bound(), 1);

        launcher.release("api");
        assert_eq!(launcher.bound(), 0);
    }

    #[test]
    fn rejects_unparseable_addresses() {
        let launcher = WorkerGroupLauncher::new();
        assert!(matches!(
            launcher.shared_socket("api", "nowhere"),
            Err(SpawnError::Bind { .. })
        ));
    }
}
