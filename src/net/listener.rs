//! Bound, listening TCP socket.
//!
//! # Responsibilities
//! - Try each candidate endpoint in order until one binds
//! - Set SO_REUSEADDR before binding
//! - Listen with the system maximum backlog unless configured otherwise
//! - Non-blocking accept for the readiness loop

use std::io;
use std::net::SocketAddr;

use mio::event::Source;
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Registry, Token};
use socket2::{Domain, Protocol, Socket, Type};

use crate::net::error::{AcceptError, BindError};
use crate::net::resolver::{AddressFamily, Endpoint};

/// Requested backlog when none is configured. Kernels clamp this to their own
/// maximum (`somaxconn`), which makes it the system maximum.
pub const SYSTEM_MAX_BACKLOG: i32 = i32::MAX;

/// Socket options applied while binding.
#[derive(Debug, Clone, Default)]
pub struct ListenOptions {
    /// `None` means the system maximum.
    pub backlog: Option<i32>,
    /// Restrict IPv6 candidates to IPv6 traffic.
    pub only_v6: bool,
}

/// The listening socket. Closing is idempotent.
#[derive(Debug)]
pub struct ListenerSocket {
    inner: Option<TcpListener>,
    endpoint: Endpoint,
}

impl ListenerSocket {
    /// Bind the first candidate that accepts, then listen on it.
    ///
    /// Candidates that fail socket creation, option setup or bind are closed
    /// and skipped. Once a bind succeeds no further candidates are tried.
    pub fn bind_and_listen(
        candidates: &[Endpoint],
        options: &ListenOptions,
    ) -> Result<Self, BindError> {
        if candidates.is_empty() {
            return Err(BindError::NoCandidates);
        }

        let mut last_err = None;
        for candidate in candidates {
            let socket = match bind_candidate(candidate, options) {
                Ok(socket) => socket,
                Err(e) => {
                    tracing::debug!(endpoint = %candidate, error = %e, "Bind candidate rejected");
                    last_err = Some(e);
                    continue;
                }
            };

            let backlog = options.backlog.unwrap_or(SYSTEM_MAX_BACKLOG);
            socket
                .listen(backlog)
                .and_then(|()| socket.set_nonblocking(true))
                .map_err(|source| BindError::Listen {
                    endpoint: candidate.clone(),
                    source,
                })?;

            // Port 0 candidates only learn their real port after bind.
            let bound = socket
                .local_addr()
                .ok()
                .and_then(|addr| addr.as_socket())
                .map(Endpoint::new)
                .unwrap_or_else(|| candidate.clone());

            tracing::info!(address = %bound, backlog, "Listener bound");

            let std_listener: std::net::TcpListener = socket.into();
            return Ok(Self {
                inner: Some(TcpListener::from_std(std_listener)),
                endpoint: bound,
            });
        }

        Err(BindError::Exhausted {
            attempted: candidates.len(),
            last: last_err.unwrap_or_else(|| io::Error::other("failed to bind any address")),
        })
    }

    /// Accept one pending connection.
    ///
    /// Returns `Ok(None)` once the accept queue is empty.
    pub fn accept(&mut self) -> Result<Option<(TcpStream, SocketAddr)>, AcceptError> {
        let listener = self.inner.as_ref().ok_or(AcceptError::Closed)?;
        loop {
            match listener.accept() {
                Ok(pair) => return Ok(Some(pair)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(AcceptError::Os(e)),
            }
        }
    }

    /// The endpoint actually bound, with the OS-assigned port filled in.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.addr()
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    /// Release the OS socket. Safe to call any number of times.
    pub fn close(&mut self) {
        if self.inner.take().is_some() {
            tracing::debug!(address = %self.endpoint, "Listener closed");
        }
    }

    fn open_mut(&mut self) -> io::Result<&mut TcpListener> {
        self.inner
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "listener is closed"))
    }
}

fn bind_candidate(candidate: &Endpoint, options: &ListenOptions) -> io::Result<Socket> {
    let domain = match candidate.family() {
        AddressFamily::V4 => Domain::IPV4,
        AddressFamily::V6 => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    if candidate.family() == AddressFamily::V6 {
        socket.set_only_v6(options.only_v6)?;
    }
    socket.bind(&candidate.addr().into())?;
    Ok(socket)
}

impl Source for ListenerSocket {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.open_mut()?.register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.open_mut()?.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.open_mut()?.deregister(registry)
    }
}

impl Drop for ListenerSocket {
    fn drop(&mut self) {
        self.close();
    }
}
