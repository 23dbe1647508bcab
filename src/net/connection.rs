//! The set of open socket handles polled by the event loop.
//!
//! # Responsibilities
//! - Own the listener and every accepted client handle
//! - Register and deregister handles with the readiness registry
//! - Hand out stable snapshots for each readiness round
//! - Close everything on shutdown, clients first
//!
//! Client membership only changes from the event loop's dispatch step. The
//! listener leaves the set only through [`ConnectionSet::close_all`].

use std::collections::BTreeMap;
use std::io::{self, Read};
use std::sync::atomic::{AtomicU64, Ordering};

use mio::event::Source;
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};

use crate::net::listener::ListenerSocket;
use crate::net::peer::PeerAddress;
use crate::observability::metrics;

/// Token reserved for the listener.
pub const LISTENER_TOKEN: Token = Token(0);

/// Global atomic counter for connection IDs.
/// Relaxed ordering is enough, only uniqueness matters.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a client connection, used in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Role of a member of the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Listener,
    Client,
}

/// An accepted client socket.
#[derive(Debug)]
pub struct ClientConnection {
    id: ConnectionId,
    stream: TcpStream,
    accepted_from: PeerAddress,
}

impl ClientConnection {
    pub fn new(stream: TcpStream, accepted_from: PeerAddress) -> Self {
        Self {
            id: ConnectionId::new(),
            stream,
            accepted_from,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Look up the peer's current address.
    ///
    /// Falls back to the address reported at accept time when the lookup
    /// fails (the peer may already have gone away).
    pub fn peer(&self) -> PeerAddress {
        match self.stream.peer_addr() {
            Ok(addr) => PeerAddress::from(addr),
            Err(e) => {
                tracing::debug!(
                    connection_id = %self.id,
                    error = %e,
                    "Peer address lookup failed, using accept-time address"
                );
                self.accepted_from.clone()
            }
        }
    }

    /// Read into `buf`, returning the byte count. Zero means orderly close.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Source for ClientConnection {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.stream.register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.stream.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.stream.deregister(registry)
    }
}

/// A member being added to the set.
#[derive(Debug)]
pub enum Handle {
    Listener(ListenerSocket),
    Client(ClientConnection),
}

/// Listener plus zero or more clients, all registered for read readiness.
#[derive(Debug)]
pub struct ConnectionSet {
    registry: Registry,
    listener: Option<ListenerSocket>,
    clients: BTreeMap<Token, ClientConnection>,
    next_token: usize,
}

impl ConnectionSet {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            listener: None,
            clients: BTreeMap::new(),
            next_token: LISTENER_TOKEN.0 + 1,
        }
    }

    /// Register a handle and take ownership of it.
    ///
    /// On failure the handle is dropped, which closes it.
    pub fn add(&mut self, handle: Handle) -> io::Result<Token> {
        match handle {
            Handle::Listener(mut listener) => {
                if self.listener.is_some() {
                    return Err(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        "connection set already has a listener",
                    ));
                }
                self.registry
                    .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
                self.listener = Some(listener);
                Ok(LISTENER_TOKEN)
            }
            Handle::Client(mut client) => {
                let token = Token(self.next_token);
                self.registry.register(&mut client, token, Interest::READABLE)?;
                self.next_token += 1;
                self.clients.insert(token, client);
                metrics::record_connection_opened();
                Ok(token)
            }
        }
    }

    /// Deregister and close a client. Returns `false` for unknown tokens and
    /// for the listener, which only [`close_all`](Self::close_all) may remove.
    pub fn remove(&mut self, token: Token) -> bool {
        match self.clients.remove(&token) {
            Some(mut client) => {
                if let Err(e) = self.registry.deregister(&mut client) {
                    tracing::trace!(connection_id = %client.id(), error = %e, "Deregister failed");
                }
                metrics::record_connection_closed();
                true
            }
            None => false,
        }
    }

    /// Stable, ordered copy of the member tokens: listener first, then clients
    /// in acceptance order.
    pub fn snapshot(&self) -> Vec<Token> {
        let mut tokens = Vec::with_capacity(self.clients.len() + 1);
        if self.listener.is_some() {
            tokens.push(LISTENER_TOKEN);
        }
        tokens.extend(self.clients.keys().copied());
        tokens
    }

    pub fn is_listener(&self, token: Token) -> bool {
        token == LISTENER_TOKEN && self.listener.is_some()
    }

    pub fn role(&self, token: Token) -> Option<Role> {
        if self.is_listener(token) {
            Some(Role::Listener)
        } else if self.clients.contains_key(&token) {
            Some(Role::Client)
        } else {
            None
        }
    }

    pub fn listener_mut(&mut self) -> Option<&mut ListenerSocket> {
        self.listener.as_mut()
    }

    pub fn client_mut(&mut self, token: Token) -> Option<&mut ClientConnection> {
        self.clients.get_mut(&token)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn has_listener(&self) -> bool {
        self.listener.is_some()
    }

    /// Close every handle, clients first and the listener last.
    ///
    /// Returns the number of clients closed.
    pub fn close_all(&mut self) -> usize {
        let tokens: Vec<Token> = self.clients.keys().copied().collect();
        let closed = tokens.len();
        for token in tokens {
            self.remove(token);
        }

        if let Some(mut listener) = self.listener.take() {
            if let Err(e) = self.registry.deregister(&mut listener) {
                tracing::trace!(error = %e, "Listener deregister failed");
            }
            listener.close();
        }
        closed
    }
}

impl Drop for ConnectionSet {
    fn drop(&mut self) {
        self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::listener::ListenOptions;
    use crate::net::resolver::resolve;
    use mio::Poll;

    fn set_with_listener() -> (Poll, ConnectionSet, std::net::SocketAddr) {
        let poll = Poll::new().unwrap();
        let mut set = ConnectionSet::new(poll.registry().try_clone().unwrap());
        let candidates = resolve(Some("127.0.0.1"), 0).unwrap();
        let listener = ListenerSocket::bind_and_listen(&candidates, &ListenOptions::default()).unwrap();
        let addr = listener.local_addr();
        assert_eq!(set.add(Handle::Listener(listener)).unwrap(), LISTENER_TOKEN);
        (poll, set, addr)
    }

    fn client_pair(addr: std::net::SocketAddr) -> (std::net::TcpStream, ClientConnection) {
        let remote = std::net::TcpStream::connect(addr).unwrap();
        let local = std::net::TcpStream::connect(addr).unwrap();
        local.set_nonblocking(true).unwrap();
        let peer = PeerAddress::from(local.peer_addr().unwrap());
        (remote, ClientConnection::new(TcpStream::from_std(local), peer))
    }

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert!(id2.as_u64() > id1.as_u64());
    }

    #[test]
    fn snapshot_lists_listener_first() {
        let (_poll, mut set, addr) = set_with_listener();
        let (_r1, c1) = client_pair(addr);
        let (_r2, c2) = client_pair(addr);

        let t1 = set.add(Handle::Client(c1)).unwrap();
        let t2 = set.add(Handle::Client(c2)).unwrap();

        assert_eq!(set.snapshot(), vec![LISTENER_TOKEN, t1, t2]);
        assert_eq!(set.client_count(), 2);
        assert!(set.is_listener(LISTENER_TOKEN));
        assert!(!set.is_listener(t1));
        assert_eq!(set.role(t2), Some(Role::Client));
        assert_eq!(set.role(Token(999)), None);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let (_poll, mut set, addr) = set_with_listener();
        let (_r, c) = client_pair(addr);
        let token = set.add(Handle::Client(c)).unwrap();

        let snapshot = set.snapshot();
        assert!(set.remove(token));
        assert_eq!(snapshot, vec![LISTENER_TOKEN, token]);
        assert_eq!(set.snapshot(), vec![LISTENER_TOKEN]);
    }

    #[test]
    fn listener_cannot_be_removed_individually() {
        let (_poll, mut set, _addr) = set_with_listener();
        assert!(!set.remove(LISTENER_TOKEN));
        assert!(set.has_listener());
    }

    #[test]
    fn second_listener_rejected() {
        let (_poll, mut set, _addr) = set_with_listener();
        let candidates = resolve(Some("127.0.0.1"), 0).unwrap();
        let extra = ListenerSocket::bind_and_listen(&candidates, &ListenOptions::default()).unwrap();
        let err = set.add(Handle::Listener(extra)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[test]
    fn tokens_are_not_reused() {
        let (_poll, mut set, addr) = set_with_listener();
        let (_r1, c1) = client_pair(addr);
        let t1 = set.add(Handle::Client(c1)).unwrap();
        set.remove(t1);

        let (_r2, c2) = client_pair(addr);
        let t2 = set.add(Handle::Client(c2)).unwrap();
        assert_ne!(t1, t2);
    }

    #[test]
    fn close_all_empties_the_set() {
        let (_poll, mut set, addr) = set_with_listener();
        let (_r1, c1) = client_pair(addr);
        let (_r2, c2) = client_pair(addr);
        set.add(Handle::Client(c1)).unwrap();
        set.add(Handle::Client(c2)).unwrap();

        assert_eq!(set.close_all(), 2);
        assert!(set.snapshot().is_empty());
        assert!(!set.has_listener());
        assert_eq!(set.close_all(), 0);
        assert!(std::net::TcpStream::connect(addr).is_err());
    }
}
