//! Socket reachability probes.

use std::io;
use std::net::TcpStream;
use std::time::Duration;

use drover_config::SocketEndpoint;

#[cfg(unix)]
use socket2::{Domain, SockAddr, Socket, Type};

use super::error::LifecycleError;
use crate::errors::is_absent_listener;
use crate::transport::resolve_tcp_address;

const SOCKET_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Fails when something already listens on the endpoint.
pub(super) fn ensure_socket_available(endpoint: &SocketEndpoint) -> Result<(), LifecycleError> {
    if socket_is_reachable(endpoint)? {
        return Err(LifecycleError::SocketInUse {
            endpoint: endpoint.to_string(),
        });
    }
    Ok(())
}

/// Reports whether a listener accepts connections on the endpoint.
///
/// Refused, missing and unassignable endpoints count as free; any other
/// probe failure is an error, since it says nothing about availability.
pub(super) fn socket_is_reachable(endpoint: &SocketEndpoint) -> Result<bool, LifecycleError> {
    match try_connect(endpoint) {
        Ok(()) => Ok(true),
        Err(error) if is_absent_listener(&error) => Ok(false),
        Err(source) => Err(LifecycleError::SocketProbe {
            endpoint: endpoint.to_string(),
            source,
        }),
    }
}

fn try_connect(endpoint: &SocketEndpoint) -> io::Result<()> {
    match endpoint {
        SocketEndpoint::Tcp { host, port } => {
            let address = resolve_tcp_address(host, *port)?;
            TcpStream::connect_timeout(&address, SOCKET_PROBE_TIMEOUT).map(|_| ())
        }
        SocketEndpoint::Unix { path } => connect_unix(path.as_str()),
    }
}

#[cfg(unix)]
fn connect_unix(path: &str) -> io::Result<()> {
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    let address = SockAddr::unix(path)?;
    socket.connect_timeout(&address, SOCKET_PROBE_TIMEOUT)
}

#[cfg(not(unix))]
fn connect_unix(_path: &str) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "unix sockets unsupported on this platform",
    ))
}
