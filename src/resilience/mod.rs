//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Event loop failure (readiness wait, accept, datagram receive):
//!     → backoff.rs (consecutive-failure streak → delay before retrying)
//! ```
//!
//! # Design Decisions
//! - Loop failures are never escalated; they only slow the retry down
//! - A success resets the streak

pub mod backoff;
