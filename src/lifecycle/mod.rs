//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Start (server::tcp / server::udp):
//!     Resolve → Bind → Seed connection set → state = Running → spawn worker
//!
//! Stop:
//!     state = Stopped → close handles → wake the wait → join worker
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → binary calls stop() on every server
//! ```
//!
//! # Design Decisions
//! - stop() returns only after the worker has exited and every handle is closed
//! - start() and stop() are idempotent; concurrent stops serialize on one lock
//! - Startup failures are returned to the caller, never terminate the process

pub mod signals;
pub mod state;
pub mod worker;

pub use state::ServerState;
pub use worker::BackgroundWorker;
