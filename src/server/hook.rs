//! The processing hook: where received bytes leave the server.

use std::panic::{self, AssertUnwindSafe};

use crate::net::peer::PeerAddress;

/// Receives raw bytes from client connections.
///
/// Runs inline on the event loop thread, so every other connection waits
/// while it runs. Implementations that need to do real work should hand the
/// bytes to their own worker, keeping per-connection order.
pub trait ProcessingHook: Send + Sync + 'static {
    /// Called once per successful read with exactly the bytes received.
    fn handle(&self, peer_address: &str, peer_port: u16, bytes: &[u8]);
}

impl<F> ProcessingHook for F
where
    F: Fn(&str, u16, &[u8]) + Send + Sync + 'static,
{
    fn handle(&self, peer_address: &str, peer_port: u16, bytes: &[u8]) {
        self(peer_address, peer_port, bytes)
    }
}

/// Call `hook`, containing any panic so the loop keeps serving.
///
/// Returns `false` if the hook panicked.
pub(crate) fn invoke(hook: &dyn ProcessingHook, peer: &PeerAddress, bytes: &[u8]) -> bool {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        hook.handle(&peer.address, peer.port, bytes)
    }));
    if outcome.is_err() {
        tracing::error!(peer = %peer, bytes = bytes.len(), "Processing hook panicked");
        return false;
    }
    true
}

/// Hook used by the binary: logs the payload size and a short preview.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHook;

const PREVIEW_BYTES: usize = 64;

impl LoggingHook {
    /// Lossy UTF-8 rendering of at most the first 64 bytes.
    pub fn preview(bytes: &[u8]) -> String {
        let head = &bytes[..bytes.len().min(PREVIEW_BYTES)];
        let mut text = String::from_utf8_lossy(head).into_owned();
        if bytes.len() > PREVIEW_BYTES {
            text.push_str("...");
        }
        text
    }
}

impl ProcessingHook for LoggingHook {
    fn handle(&self, peer_address: &str, peer_port: u16, bytes: &[u8]) {
        tracing::info!(
            peer_addr = peer_address,
            peer_port,
            bytes = bytes.len(),
            preview = %Self::preview(bytes),
            "Received data"
        );
    }
}
