//! TCP server lifecycle.
//!
//! # Responsibilities
//! - start(): resolve → bind + listen → seed the connection set → spawn the loop
//! - stop(): mark Stopped → close every handle → wake the wait → join the loop
//! - Report bound address, state and client count
//!
//! # Design Decisions
//! - A lifecycle lock serializes start/stop; concurrent stops block until
//!   the first finishes, then return without doing anything
//! - stop() on the loop thread (from a hook) never takes the lifecycle lock,
//!   since an external stop() may hold it while joining that same thread.
//!   It only flips the shared state and closes the handles; the next
//!   stop(), start() or drop joins the exited worker
//! - Accessors only touch the running slot, so a hook may call them from
//!   the loop thread
//! - Startup errors are returned, the server stays Stopped
//! - Dropping a running server stops it

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use crate::config::ListenerConfig;
use crate::lifecycle::{BackgroundWorker, ServerState};
use crate::net::connection::{ConnectionSet, Handle};
use crate::net::listener::ListenerSocket;
use crate::net::readiness::Readiness;
use crate::net::resolver::resolve;
use crate::server::error::{ServerError, ServerResult};
use crate::server::event_loop::{EventLoop, Shared};
use crate::server::hook::ProcessingHook;

/// A running event loop and everything needed to tear it down.
struct Running {
    shared: Arc<Shared>,
    worker: BackgroundWorker,
    local_addr: SocketAddr,
}

impl Running {
    fn is_live(&self) -> bool {
        self.shared.is_running()
    }
}

/// Identifies the loop thread, kept until that thread has been joined.
struct LoopOwner {
    thread: ThreadId,
    shared: Arc<Shared>,
}

/// Multi-client TCP server driven by a single readiness loop on a
/// background thread.
pub struct TcpServer {
    config: ListenerConfig,
    name: String,
    hook: Arc<dyn ProcessingHook>,
    lifecycle: Mutex<()>,
    running: Mutex<Option<Running>>,
    loop_owner: Mutex<Option<LoopOwner>>,
}

impl TcpServer {
    pub fn new(config: ListenerConfig, hook: Arc<dyn ProcessingHook>) -> Self {
        Self {
            config,
            name: "mux-server".to_string(),
            hook,
            lifecycle: Mutex::new(()),
            running: Mutex::new(None),
            loop_owner: Mutex::new(None),
        }
    }

    /// Server on every local address at `port`, other settings defaulted.
    pub fn on_port(port: u16, hook: Arc<dyn ProcessingHook>) -> Self {
        Self::new(ListenerConfig::with_port(port), hook)
    }

    /// Name used in lifecycle diagnostics.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Bind and launch the event loop. No-op when already running.
    pub fn start(&self) -> ServerResult<()> {
        let _lifecycle = self.lock_lifecycle();
        if self.lock_running().as_ref().is_some_and(Running::is_live) {
            tracing::debug!(server = %self.name, "Start requested while running");
            return Ok(());
        }
        self.reap();

        let running = self.launch().inspect_err(|e| {
            tracing::error!(server = %self.name, error = %e, "Server failed to start");
        })?;

        tracing::info!(
            server = %self.name,
            address = %running.local_addr,
            "Server started"
        );
        *self.lock_loop_owner() = Some(LoopOwner {
            thread: running.worker.thread_id(),
            shared: Arc::clone(&running.shared),
        });
        *self.lock_running() = Some(running);
        Ok(())
    }

    fn launch(&self) -> ServerResult<Running> {
        let candidates = resolve(self.config.host.as_deref(), self.config.port)?;
        let listener = ListenerSocket::bind_and_listen(&candidates, &self.config.listen_options())?;
        let local_addr = listener.local_addr();

        let readiness = Readiness::new().map_err(ServerError::Readiness)?;
        let registry = readiness.registry().map_err(ServerError::Readiness)?;
        let waker = readiness.waker().map_err(ServerError::Readiness)?;

        let mut connections = ConnectionSet::new(registry);
        connections
            .add(Handle::Listener(listener))
            .map_err(ServerError::Readiness)?;

        let shared = Arc::new(Shared::new(connections, waker));
        let event_loop = EventLoop::new(Arc::clone(&shared), readiness, Arc::clone(&self.hook));
        let worker = BackgroundWorker::spawn("mux-tcp-loop", move || event_loop.run())
            .map_err(ServerError::Spawn)?;

        Ok(Running {
            shared,
            worker,
            local_addr,
        })
    }

    /// Close every connection and wait for the loop to exit. No-op when
    /// already stopped.
    ///
    /// Called from a hook on the loop thread, it closes everything and
    /// returns without waiting; the loop exits once the hook returns.
    pub fn stop(&self) {
        if let Some(shared) = self.shared_if_loop_thread() {
            let clients = shared.shutdown();
            tracing::info!(server = %self.name, clients_closed = clients, "Server stopped from event loop");
            return;
        }

        let _lifecycle = self.lock_lifecycle();
        let Some(running) = self.lock_running().take() else {
            return;
        };

        let clients = running.shared.shutdown();
        running.worker.join();
        self.lock_loop_owner().take();
        tracing::info!(server = %self.name, clients_closed = clients, "Server stopped");
    }

    /// Join a worker whose loop was stopped from inside a hook.
    fn reap(&self) {
        let stale = self.lock_running().take();
        if let Some(running) = stale {
            running.worker.join();
            self.lock_loop_owner().take();
            tracing::debug!(server = %self.name, "Reaped stopped event loop");
        }
    }

    fn shared_if_loop_thread(&self) -> Option<Arc<Shared>> {
        let current = thread::current().id();
        self.lock_loop_owner()
            .as_ref()
            .filter(|owner| owner.thread == current)
            .map(|owner| Arc::clone(&owner.shared))
    }

    pub fn state(&self) -> ServerState {
        match self.lock_running().as_ref() {
            Some(running) => running.shared.lock().state,
            None => ServerState::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// Address the listener is bound to while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock_running()
            .as_ref()
            .filter(|running| running.is_live())
            .map(|running| running.local_addr)
    }

    /// Clients currently in the connection set.
    pub fn client_count(&self) -> usize {
        self.lock_running()
            .as_ref()
            .map_or(0, |running| running.shared.lock().connections.client_count())
    }

    pub fn display_name(&self) -> &str {
        &self.name
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

impl std::fmt::Debug for TcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpServer")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.stop();
    }
}
