//! Readiness wait over a snapshot of handles.
//!
//! Wraps `mio::Poll`. Every wait also listens on a waker so that shutdown can
//! unblock it after the handles it was waiting on have been closed; a closed
//! descriptor alone does not reliably wake epoll or kqueue.

use std::io;
use std::time::Duration;

use mio::{Events, Poll, Registry, Token, Waker};

use crate::net::error::PollError;

/// Token reserved for the shutdown waker.
pub const WAKE_TOKEN: Token = Token(usize::MAX);

const EVENT_CAPACITY: usize = 256;

/// The readiness primitive driving one event loop.
pub struct Readiness {
    poll: Poll,
    events: Events,
}

impl Readiness {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(EVENT_CAPACITY),
        })
    }

    /// An owned handle for registering sources from another owner.
    pub fn registry(&self) -> io::Result<Registry> {
        self.poll.registry().try_clone()
    }

    /// A waker whose `wake()` makes the current or next wait return.
    pub fn waker(&self) -> io::Result<Waker> {
        Waker::new(self.poll.registry(), WAKE_TOKEN)
    }

    /// Block until at least one of `candidates` is readable, the waker fires,
    /// or `timeout` elapses.
    ///
    /// Returns the ready subset of `candidates` in the order the OS reported
    /// it. Wakeups, timeouts and interrupted waits yield an empty subset.
    /// `candidates` must be sorted.
    pub fn wait_for_ready(
        &mut self,
        candidates: &[Token],
        timeout: Option<Duration>,
    ) -> Result<Vec<Token>, PollError> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Vec::new()),
            Err(e) => return Err(PollError(e)),
        }

        let mut ready = Vec::new();
        for event in self.events.iter() {
            let token = event.token();
            if token == WAKE_TOKEN {
                continue;
            }
            // Errors and hang-ups surface through the next read.
            let readable = event.is_readable() || event.is_read_closed() || event.is_error();
            if readable && candidates.binary_search(&token).is_ok() && !ready.contains(&token) {
                ready.push(token);
            }
        }
        Ok(ready)
    }
}

impl std::fmt::Debug for Readiness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Readiness").finish_non_exhaustive()
    }
}
