//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! port (+ optional host)
//!     → resolver.rs (ordered candidate endpoints)
//!     → listener.rs (bind first candidate, SO_REUSEADDR, listen)
//!     → connection.rs (ConnectionSet: listener + accepted clients)
//!     → readiness.rs (wait on a snapshot of the set, plus the shutdown waker)
//!     → server::event_loop dispatch
//!
//! Datagrams:
//!     resolver.rs → datagram.rs (bind first candidate) → server::udp
//! ```
//!
//! # Design Decisions
//! - Handles are owned by the ConnectionSet; dropping one closes it
//! - Registration is edge-triggered (mio); readers drain until WouldBlock
//!   or until their per-round budget runs out
//! - Shutdown never relies on closed descriptors alone to wake a wait

pub mod connection;
pub mod datagram;
pub mod error;
pub mod listener;
pub mod peer;
pub mod readiness;
pub mod resolver;

pub use connection::{ClientConnection, ConnectionId, ConnectionSet, Handle, Role};
pub use error::{AcceptError, BindError, PollError, ReadError, ResolutionError};
pub use listener::{ListenOptions, ListenerSocket};
pub use peer::PeerAddress;
pub use readiness::Readiness;
pub use resolver::{resolve, AddressFamily, Endpoint};
