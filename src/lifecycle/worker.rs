//! Background execution context for an event loop.

use std::io;
use std::thread::{self, JoinHandle, ThreadId};

/// An owned worker thread that must be joined on teardown.
#[derive(Debug)]
pub struct BackgroundWorker {
    name: String,
    handle: JoinHandle<()>,
}

impl BackgroundWorker {
    /// Spawn `body` on a named thread.
    pub fn spawn<F>(name: &str, body: F) -> io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new().name(name.to_string()).spawn(body)?;
        tracing::debug!(worker = name, "Background worker spawned");
        Ok(Self {
            name: name.to_string(),
            handle,
        })
    }

    pub fn thread_id(&self) -> ThreadId {
        self.handle.thread().id()
    }

    pub fn is_current_thread(&self) -> bool {
        self.thread_id() == thread::current().id()
    }

    /// Wait for the worker to finish.
    ///
    /// When called from the worker itself (a hook stopping its own server)
    /// the thread is detached instead; it exits on its next state check.
    pub fn join(self) {
        if self.is_current_thread() {
            tracing::debug!(worker = %self.name, "Stop requested from worker thread, detaching");
            return;
        }
        if self.handle.join().is_err() {
            tracing::error!(worker = %self.name, "Background worker panicked");
        } else {
            tracing::debug!(worker = %self.name, "Background worker joined");
        }
    }
}
