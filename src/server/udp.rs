//! Companion UDP server.
//!
//! Same lifecycle contract as the TCP server (idempotent start/stop, owned
//! worker joined on stop, waker-driven shutdown) without connection
//! multiplexing: one socket, one datagram per hook call. A hook calling
//! stop() on the receive thread only raises the stop flag.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use mio::net::UdpSocket;
use mio::{Interest, Token, Waker};

use crate::config::UdpConfig;
use crate::lifecycle::{BackgroundWorker, ServerState};
use crate::net::datagram::bind_datagram;
use crate::net::error::ReadError;
use crate::net::peer::PeerAddress;
use crate::net::readiness::Readiness;
use crate::net::resolver::resolve;
use crate::observability::metrics;
use crate::resilience::backoff::FailureStreak;
use crate::server::error::{ServerError, ServerResult};
use crate::server::event_loop::READ_BUFFER_SIZE;
use crate::server::hook::{self, ProcessingHook};

const SOCKET_TOKEN: Token = Token(0);

/// Datagrams per round before re-checking state.
const DATAGRAMS_PER_ROUND: usize = 64;

struct Running {
    stopping: Arc<AtomicBool>,
    waker: Waker,
    worker: BackgroundWorker,
    local_addr: SocketAddr,
}

impl Running {
    fn is_live(&self) -> bool {
        !self.stopping.load(Ordering::SeqCst)
    }
}

/// The receive thread and its stop flag, kept until that thread is joined.
struct LoopOwner {
    thread: ThreadId,
    stopping: Arc<AtomicBool>,
}

/// Datagram server delivering each received datagram to the hook.
pub struct UdpServer {
    config: UdpConfig,
    hook: Arc<dyn ProcessingHook>,
    lifecycle: Mutex<()>,
    running: Mutex<Option<Running>>,
    loop_owner: Mutex<Option<LoopOwner>>,
}

impl UdpServer {
    pub fn new(config: UdpConfig, hook: Arc<dyn ProcessingHook>) -> Self {
        Self {
            config,
            hook,
            lifecycle: Mutex::new(()),
            running: Mutex::new(None),
            loop_owner: Mutex::new(None),
        }
    }

    /// Bind and launch the receive loop. No-op when already running.
    pub fn start(&self) -> ServerResult<()> {
        let _lifecycle = self.lock_lifecycle();
        if self.lock_running().as_ref().is_some_and(Running::is_live) {
            return Ok(());
        }
        self.reap();

        let candidates = resolve(self.config.host.as_deref(), self.config.port)?;
        let (mut socket, bound) = bind_datagram(&candidates)?;

        let readiness = Readiness::new().map_err(ServerError::Readiness)?;
        readiness
            .registry()
            .and_then(|registry| registry.register(&mut socket, SOCKET_TOKEN, Interest::READABLE))
            .map_err(ServerError::Readiness)?;
        let waker = readiness.waker().map_err(ServerError::Readiness)?;

        let stopping = Arc::new(AtomicBool::new(false));
        let receiver = Receiver {
            socket,
            readiness,
            hook: Arc::clone(&self.hook),
            stopping: Arc::clone(&stopping),
            buffer: [0; READ_BUFFER_SIZE],
            pending: false,
            poll_failures: FailureStreak::new(5, 500),
            recv_failures: FailureStreak::new(5, 500),
        };
        let worker = BackgroundWorker::spawn("mux-udp-loop", move || receiver.run())
            .map_err(ServerError::Spawn)?;

        tracing::info!(address = %bound, "UDP server started");
        *self.lock_loop_owner() = Some(LoopOwner {
            thread: worker.thread_id(),
            stopping: Arc::clone(&stopping),
        });
        *self.lock_running() = Some(Running {
            stopping,
            waker,
            worker,
            local_addr: bound.addr(),
        });
        Ok(())
    }

    /// Wake the receive loop, wait for it to exit and release the socket.
    pub fn stop(&self) {
        if let Some(stopping) = self.stop_flag_if_loop_thread() {
            stopping.store(true, Ordering::SeqCst);
            tracing::info!("UDP server stopped from receive loop");
            return;
        }

        let _lifecycle = self.lock_lifecycle();
        let Some(running) = self.lock_running().take() else {
            return;
        };

        running.stopping.store(true, Ordering::SeqCst);
        if let Err(e) = running.waker.wake() {
            tracing::warn!(error = %e, "Failed to wake UDP loop");
        }
        running.worker.join();
        self.lock_loop_owner().take();
        tracing::info!("UDP server stopped");
    }

    /// Join a receive thread that a hook already stopped.
    fn reap(&self) {
        let stale = self.lock_running().take();
        if let Some(running) = stale {
            running.worker.join();
            self.lock_loop_owner().take();
        }
    }

    fn stop_flag_if_loop_thread(&self) -> Option<Arc<AtomicBool>> {
        let current = thread::current().id();
        self.lock_loop_owner()
            .as_ref()
            .filter(|owner| owner.thread == current)
            .map(|owner| Arc::clone(&owner.stopping))
    }

    pub fn state(&self) -> ServerState {
        if self.lock_running().as_ref().is_some_and(Running::is_live) {
            ServerState::Running
        } else {
            ServerState::Stopped
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock_running()
            .as_ref()
            .filter(|running| running.is_live())
            .map(|running| running.local_addr)
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_loop_owner(&self) -> MutexGuard<'_, Option<LoopOwner>> {
        self.loop_owner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for UdpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpServer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Drop for UdpServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The loop side; owns the socket, which closes when the loop returns.
struct Receiver {
    socket: UdpSocket,
    readiness: Readiness,
    hook: Arc<dyn ProcessingHook>,
    stopping: Arc<AtomicBool>,
    buffer: [u8; READ_BUFFER_SIZE],
    pending: bool,
    poll_failures: FailureStreak,
    recv_failures: FailureStreak,
}

impl Receiver {
    fn run(mut self) {
        while !self.stopping.load(Ordering::SeqCst) {
            let timeout = self.pending.then_some(Duration::ZERO);
            match self.readiness.wait_for_ready(&[SOCKET_TOKEN], timeout) {
                Ok(ready) => {
                    self.poll_failures.reset();
                    if self.pending || ready.contains(&SOCKET_TOKEN) {
                        self.drain();
                    }
                }
                Err(e) => {
                    metrics::record_poll_error("udp");
                    let delay = self.poll_failures.fail();
                    tracing::warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "UDP readiness wait failed");
                    thread::sleep(delay);
                }
            }
        }
        tracing::debug!("UDP loop exited");
    }

    fn drain(&mut self) {
        self.pending = true;
        for _ in 0..DATAGRAMS_PER_ROUND {
            if self.stopping.load(Ordering::SeqCst) {
                return;
            }
            match self.socket.recv_from(&mut self.buffer) {
                // An empty datagram carries no data for the hook.
                Ok((0, _)) => continue,
                Ok((n, addr)) => {
                    self.recv_failures.reset();
                    let peer = PeerAddress::from(addr);
                    tracing::debug!(
                        peer_addr = %peer.address,
                        peer_port = peer.port,
                        bytes = n,
                        "Datagram received"
                    );
                    metrics::record_datagram();
                    metrics::record_bytes_received("udp", n);
                    hook::invoke(self.hook.as_ref(), &peer, &self.buffer[..n]);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.pending = false;
                    return;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    let err = ReadError {
                        peer: PeerAddress::unknown(),
                        source,
                    };
                    let delay = self.recv_failures.fail();
                    tracing::warn!(error = %err, retry_in_ms = delay.as_millis() as u64, "Datagram receive failed");
                    metrics::record_read_error("udp");
                    // Stay pending: the error may have consumed the readiness edge.
                    thread::sleep(delay);
                    return;
                }
            }
        }
    }
}
