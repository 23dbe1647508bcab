//! Bound UDP socket for the companion datagram server.

use std::io;

use mio::net::UdpSocket;
use socket2::{Domain, Protocol, Socket, Type};

use crate::net::error::BindError;
use crate::net::resolver::{AddressFamily, Endpoint};

/// Bind the first candidate that accepts a datagram socket.
///
/// Unlike the stream listener no reuse-address option is set and there is no
/// listen step.
pub fn bind_datagram(candidates: &[Endpoint]) -> Result<(UdpSocket, Endpoint), BindError> {
    if candidates.is_empty() {
        return Err(BindError::NoCandidates);
    }

    let mut last_err = None;
    for candidate in candidates {
        match bind_candidate(candidate) {
            Ok(socket) => {
                let bound = socket
                    .local_addr()
                    .ok()
                    .and_then(|addr| addr.as_socket())
                    .map(Endpoint::new)
                    .unwrap_or_else(|| candidate.clone());
                let std_socket: std::net::UdpSocket = socket.into();
                tracing::info!(address = %bound, "Datagram socket bound");
                return Ok((UdpSocket::from_std(std_socket), bound));
            }
            Err(e) => {
                tracing::debug!(endpoint = %candidate, error = %e, "Datagram candidate rejected");
                last_err = Some(e);
            }
        }
    }

    Err(BindError::Exhausted {
        attempted: candidates.len(),
        last: last_err.unwrap_or_else(|| io::Error::other("failed to bind any address")),
    })
}

fn bind_candidate(candidate: &Endpoint) -> io::Result<Socket> {
    let domain = match candidate.family() {
        AddressFamily::V4 => Domain::IPV4,
        AddressFamily::V6 => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.bind(&candidate.addr().into())?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}
