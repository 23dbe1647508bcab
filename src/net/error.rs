//! Error types for the network layer.
//!
//! Only [`ResolutionError`] and [`BindError`] ever leave the crate through
//! `start()`. The rest are contained inside the event loop and surface as
//! diagnostics.

use std::io;

use thiserror::Error;

use crate::net::peer::PeerAddress;
use crate::net::resolver::Endpoint;

/// No usable local endpoint could be produced for a bind request.
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// The naming facility answered, but with nothing bindable.
    #[error("no local endpoint candidates for port {port}")]
    NoCandidates { port: u16 },

    /// The naming facility itself failed.
    #[error("failed to resolve {host}:{port}: {source}")]
    Lookup {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
}

/// Every candidate endpoint failed to bind, or the bound socket could not listen.
#[derive(Debug, Error)]
pub enum BindError {
    /// The candidate list was empty.
    #[error("no candidate endpoints to bind")]
    NoCandidates,

    /// Each candidate was tried and rejected.
    #[error("failed to bind any of {attempted} candidate endpoint(s): {last}")]
    Exhausted {
        attempted: usize,
        #[source]
        last: io::Error,
    },

    /// Bind succeeded but `listen` did not.
    #[error("listen on {endpoint} failed: {source}")]
    Listen {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },
}

/// A single accept attempt failed. Never fatal to the loop.
#[derive(Debug, Error)]
pub enum AcceptError {
    /// The listener was closed before the accept ran.
    #[error("listener is closed")]
    Closed,

    /// The OS refused the connection (descriptor exhaustion, aborted handshake, ...).
    #[error("accept failed: {0}")]
    Os(#[source] io::Error),

    /// The connection was accepted but could not join the readiness set.
    #[error("failed to register connection from {peer}: {source}")]
    Register {
        peer: PeerAddress,
        #[source]
        source: io::Error,
    },
}

/// The readiness wait failed. The loop logs it and retries the round.
#[derive(Debug, Error)]
#[error("readiness wait failed: {0}")]
pub struct PollError(#[source] pub io::Error);

/// Reading from a client failed. The affected connection is closed.
#[derive(Debug, Error)]
#[error("read from {peer} failed: {source}")]
pub struct ReadError {
    pub peer: PeerAddress,
    pub source: io::Error,
}
