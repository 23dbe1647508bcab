//! Server subsystem.
//!
//! # Data Flow
//! ```text
//! TcpServer::start (tcp.rs)
//!     → net::resolve → net::ListenerSocket → ConnectionSet seeded with listener
//!     → event_loop.rs on a BackgroundWorker
//!         → accept: add client to ConnectionSet
//!         → read:   bytes → hook.rs ProcessingHook
//! TcpServer::stop
//!     → Stopped + close all handles + wake → join
//!
//! UdpServer (udp.rs): same lifecycle, one datagram socket, datagrams → hook
//! ```

pub mod error;
mod event_loop;
pub mod hook;
pub mod tcp;
pub mod udp;

pub use error::{ServerError, ServerResult};
pub use event_loop::READ_BUFFER_SIZE;
pub use hook::{LoggingHook, ProcessingHook};
pub use tcp::TcpServer;
pub use udp::UdpServer;

use crate::config::IdentityConfig;

const FALLBACK_NAME: &str = "mux-server";

/// Name shown in lifecycle diagnostics: the configured name, else the OS
/// hostname, else a fixed fallback.
pub fn display_name(identity: &IdentityConfig) -> String {
    if let Some(name) = &identity.name {
        return name.clone();
    }
    match hostname::get() {
        Ok(name) => match name.into_string() {
            Ok(name) if !name.is_empty() => name,
            _ => FALLBACK_NAME.to_string(),
        },
        Err(e) => {
            tracing::debug!(error = %e, "Hostname lookup failed");
            FALLBACK_NAME.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_name_wins() {
        let identity = IdentityConfig {
            name: Some("edge-7".into()),
        };
        assert_eq!(display_name(&identity), "edge-7");
    }

    #[test]
    fn falls_back_to_something_printable() {
        let name = display_name(&IdentityConfig::default());
        assert!(!name.is_empty());
    }
}
