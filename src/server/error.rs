//! Errors returned from `start()`.

use std::io;

use thiserror::Error;

use crate::net::error::{BindError, ResolutionError};

/// Why a server failed to start. The server stays stopped.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Bind(#[from] BindError),

    /// The readiness primitive or its waker could not be created.
    #[error("failed to set up readiness polling: {0}")]
    Readiness(#[source] io::Error),

    /// The background thread could not be spawned.
    #[error("failed to spawn event loop thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Result type for server startup.
pub type ServerResult<T> = Result<T, ServerError>;
