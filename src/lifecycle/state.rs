//! Server state machine.
//!
//! # State Transitions
//! ```text
//! Stopped → Running: start() (no-op when already Running)
//! Running → Stopped: stop()  (no-op when already Stopped)
//! ```

use std::fmt;

/// Whether a server's event loop should keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerState {
    #[default]
    Stopped,
    Running,
}

impl ServerState {
    pub fn is_running(self) -> bool {
        self == ServerState::Running
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerState::Stopped => write!(f, "stopped"),
            ServerState::Running => write!(f, "running"),
        }
    }
}
