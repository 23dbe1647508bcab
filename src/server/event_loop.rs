//! Readiness-round event loop for the TCP server.
//!
//! # Rounds
//! ```text
//! lock → state Stopped? exit : snapshot() → unlock
//! wait_for_ready(snapshot)            (the only blocking point)
//! for each ready token, in OS order:
//!     listener → accept until empty, add clients
//!     client   → read ≤ 1024 bytes per call until WouldBlock,
//!                EOF/error → close + remove, data → hook (unlocked)
//! ```
//!
//! Handles whose per-round budget ran out are carried into the next round
//! with a zero timeout, since edge-triggered readiness will not report them
//! again.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use mio::{Token, Waker};

use crate::lifecycle::ServerState;
use crate::net::connection::{ClientConnection, ConnectionId, ConnectionSet, Handle, Role, LISTENER_TOKEN};
use crate::net::error::{AcceptError, PollError, ReadError};
use crate::net::peer::PeerAddress;
use crate::net::readiness::Readiness;
use crate::observability::metrics;
use crate::resilience::backoff::FailureStreak;
use crate::server::hook::{self, ProcessingHook};

/// Hard cap on a single read call.
pub const READ_BUFFER_SIZE: usize = 1024;

/// Reads per client per round before yielding to other handles.
const READS_PER_ROUND: usize = 16;

/// Accepts per round before yielding to clients.
const ACCEPTS_PER_ROUND: usize = 128;

/// State shared between the caller's thread and the loop thread.
pub(crate) struct Shared {
    inner: Mutex<Inner>,
    waker: Waker,
}

pub(crate) struct Inner {
    pub(crate) state: ServerState,
    pub(crate) connections: ConnectionSet,
}

impl Shared {
    /// A running server seeded with `connections`.
    pub(crate) fn new(connections: ConnectionSet, waker: Waker) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: ServerState::Running,
                connections,
            }),
            waker,
        }
    }

    /// Lock the state. A poisoned lock is recovered so teardown always runs.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.lock().state.is_running()
    }

    /// Flip to Stopped, close every handle and wake the pending wait.
    ///
    /// Returns the number of client connections closed.
    pub(crate) fn shutdown(&self) -> usize {
        let closed = {
            let mut inner = self.lock();
            inner.state = ServerState::Stopped;
            inner.connections.close_all()
        };
        if let Err(e) = self.waker.wake() {
            tracing::warn!(error = %e, "Failed to wake event loop");
        }
        closed
    }
}

enum ReadOutcome {
    /// The socket reported WouldBlock.
    Drained,
    /// The read budget ran out with data possibly left.
    Budget,
    /// Zero-length read.
    Closed,
    Failed(io::Error),
}

/// Bytes read from one client in one dispatch, delivered after unlocking.
struct Delivery {
    id: ConnectionId,
    peer: PeerAddress,
    chunks: Vec<Vec<u8>>,
}

pub(crate) struct EventLoop {
    shared: Arc<Shared>,
    readiness: Readiness,
    hook: Arc<dyn ProcessingHook>,
    buffer: [u8; READ_BUFFER_SIZE],
    deferred: Vec<Token>,
    accept_failures: FailureStreak,
    accept_retry_at: Option<Instant>,
    poll_failures: FailureStreak,
}

impl EventLoop {
    pub(crate) fn new(shared: Arc<Shared>, readiness: Readiness, hook: Arc<dyn ProcessingHook>) -> Self {
        Self {
            shared,
            readiness,
            hook,
            buffer: [0; READ_BUFFER_SIZE],
            deferred: Vec::new(),
            accept_failures: FailureStreak::new(10, 1_000),
            accept_retry_at: None,
            poll_failures: FailureStreak::new(5, 500),
        }
    }

    /// Run rounds until the state is Stopped.
    pub(crate) fn run(mut self) {
        tracing::debug!("Event loop running");

        loop {
            let snapshot = {
                let inner = self.shared.lock();
                if !inner.state.is_running() {
                    break;
                }
                inner.connections.snapshot()
            };

            let timeout = self.wait_timeout();
            let mut ready = match self.readiness.wait_for_ready(&snapshot, timeout) {
                Ok(ready) => {
                    self.poll_failures.reset();
                    ready
                }
                Err(e) => {
                    if self.recover_from_poll_error(&e) {
                        continue;
                    }
                    break;
                }
            };

            self.merge_deferred(&snapshot, &mut ready);
            for token in ready {
                self.dispatch(token);
            }
        }

        tracing::debug!("Event loop exited");
    }

    /// Back off after a failed wait. Returns `false` only when the server
    /// has been stopped; a running loop always retries.
    fn recover_from_poll_error(&mut self, err: &PollError) -> bool {
        metrics::record_poll_error("tcp");
        if !self.shared.is_running() {
            return false;
        }
        let delay = self.poll_failures.fail();
        tracing::warn!(
            error = %err,
            failures = self.poll_failures.failures(),
            retry_in_ms = delay.as_millis() as u64,
            "Readiness wait failed"
        );
        thread::sleep(delay);
        true
    }

    fn wait_timeout(&self) -> Option<Duration> {
        if !self.deferred.is_empty() {
            return Some(Duration::ZERO);
        }
        self.accept_retry_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Add carried-over handles (and a due accept retry) to this round.
    fn merge_deferred(&mut self, snapshot: &[Token], ready: &mut Vec<Token>) {
        if matches!(self.accept_retry_at, Some(at) if Instant::now() >= at) {
            self.accept_retry_at = None;
            self.deferred.push(LISTENER_TOKEN);
        }
        for token in self.deferred.drain(..) {
            if snapshot.binary_search(&token).is_ok() && !ready.contains(&token) {
                ready.push(token);
            }
        }
    }

    fn dispatch(&mut self, token: Token) {
        let shared = Arc::clone(&self.shared);
        let mut inner = shared.lock();
        if !inner.state.is_running() {
            return;
        }

        let role = inner.connections.role(token);
        match role {
            Some(Role::Listener) => self.accept_pending(&mut inner.connections),
            Some(Role::Client) => {
                let delivery = self.read_client(&mut inner.connections, token);
                drop(inner);
                if let Some(delivery) = delivery {
                    self.deliver(delivery);
                }
            }
            // Removed earlier in this round.
            None => {}
        }
    }

    fn accept_pending(&mut self, connections: &mut ConnectionSet) {
        for _ in 0..ACCEPTS_PER_ROUND {
            let Some(listener) = connections.listener_mut() else {
                return;
            };

            match listener.accept() {
                Ok(Some((stream, addr))) => {
                    self.accept_failures.reset();
                    let peer = PeerAddress::from(addr);
                    let client = ClientConnection::new(stream, peer.clone());
                    let id = client.id();
                    match connections.add(Handle::Client(client)) {
                        Ok(_) => tracing::info!(
                            connection_id = %id,
                            peer_addr = %peer.address,
                            peer_port = peer.port,
                            "New connection"
                        ),
                        Err(source) => {
                            let err = AcceptError::Register { peer, source };
                            tracing::warn!(error = %err, "Dropped new connection");
                            metrics::record_accept_error();
                        }
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    let delay = self.accept_failures.fail();
                    self.accept_retry_at = Some(Instant::now() + delay);
                    tracing::warn!(
                        error = %e,
                        failures = self.accept_failures.failures(),
                        retry_in_ms = delay.as_millis() as u64,
                        "Accept failed"
                    );
                    metrics::record_accept_error();
                    return;
                }
            }
        }

        self.deferred.push(LISTENER_TOKEN);
    }

    fn read_client(&mut self, connections: &mut ConnectionSet, token: Token) -> Option<Delivery> {
        let client = connections.client_mut(token)?;

        let mut chunks = Vec::new();
        let mut outcome = ReadOutcome::Budget;
        while chunks.len() < READS_PER_ROUND {
            match client.read(&mut self.buffer) {
                Ok(0) => {
                    outcome = ReadOutcome::Closed;
                    break;
                }
                Ok(n) => chunks.push(self.buffer[..n].to_vec()),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    outcome = ReadOutcome::Drained;
                    break;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    outcome = ReadOutcome::Failed(e);
                    break;
                }
            }
        }

        let id = client.id();
        let peer = client.peer();

        match outcome {
            ReadOutcome::Drained => {}
            ReadOutcome::Budget => self.deferred.push(token),
            ReadOutcome::Closed => {
                connections.remove(token);
                tracing::info!(
                    connection_id = %id,
                    peer_addr = %peer.address,
                    peer_port = peer.port,
                    "Connection closed"
                );
            }
            ReadOutcome::Failed(source) => {
                connections.remove(token);
                let err = ReadError {
                    peer: peer.clone(),
                    source,
                };
                tracing::warn!(connection_id = %id, error = %err, "Connection dropped");
                metrics::record_read_error("tcp");
            }
        }

        Some(Delivery { id, peer, chunks })
    }

    /// Hand each chunk to the hook in order. Chunks left over once a hook
    /// has stopped the server are discarded.
    fn deliver(&self, delivery: Delivery) {
        let Delivery { id, peer, chunks } = delivery;
        for (delivered, chunk) in chunks.iter().enumerate() {
            if !self.shared.is_running() {
                tracing::debug!(
                    connection_id = %id,
                    discarded = chunks.len() - delivered,
                    "Server stopped during delivery"
                );
                return;
            }
            tracing::debug!(
                connection_id = %id,
                peer_addr = %peer.address,
                peer_port = peer.port,
                bytes = chunk.len(),
                "Data received"
            );
            metrics::record_bytes_received("tcp", chunk.len());
            hook::invoke(self.hook.as_ref(), &peer, chunk);
        }
    }
}
