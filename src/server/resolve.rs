//! Address resolution and listening sockets.

use crate::error::{Error, Result};

use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::os::fd::OwnedFd;

/// Resolves `host` and `service` (a port number) into socket address
/// candidates, in resolver order.
pub fn resolve(host: &str, service: &str) -> Result<Vec<SocketAddr>> {
    let port: u16 = service.parse().map_err(|_| Error::Sys {
        call: "getaddrinfo",
        source: io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unknown service {service:?}"),
        ),
    })?;

    let candidates: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|source| Error::Sys {
            call: "getaddrinfo",
            source,
        })?
        .collect();

    if candidates.is_empty() {
        return Err(Error::Sys {
            call: "getaddrinfo",
            source: io::Error::new(io::ErrorKind::NotFound, format!("no address for {host}")),
        });
    }

    Ok(candidates)
}

/// Binds `address` with `SO_REUSEADDR` and starts listening. Returns the
/// listening descriptor and the bound address (useful with port 0).
pub fn bind_and_listen(address: SocketAddr) -> Result<(OwnedFd, SocketAddr)> {
    let listener = TcpListener::bind(address).map_err(|source| Error::Sys {
        call: "bind",
        source,
    })?;

    let local = listener.local_addr().map_err(|source| Error::Sys {
        call: "getsockname",
        source,
    })?;

    Ok((OwnedFd::from(listener), local))
}
