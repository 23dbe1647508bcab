//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files, and
//! every field has a default so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};

use crate::net::listener::ListenOptions;

/// Port used when none is configured.
pub const DEFAULT_PORT: u16 = 80;

/// Root configuration for the server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP listener settings.
    pub listener: ListenerConfig,

    /// Companion UDP server settings.
    pub udp: UdpConfig,

    /// Display identity.
    pub identity: IdentityConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

/// TCP listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Port to bind. `0` lets the OS pick.
    pub port: u16,

    /// Host to bind. Absent means every local address (IPv4 and IPv6 wildcard).
    pub host: Option<String>,

    /// Listen backlog. Absent means the system maximum.
    pub backlog: Option<i32>,

    /// Restrict IPv6 sockets to IPv6 traffic.
    pub only_v6: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            host: None,
            backlog: None,
            only_v6: false,
        }
    }
}

impl ListenerConfig {
    /// Listener on `port` with every other setting defaulted.
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    pub fn listen_options(&self) -> ListenOptions {
        ListenOptions {
            backlog: self.backlog,
            only_v6: self.only_v6,
        }
    }
}

/// Companion UDP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UdpConfig {
    /// Start the UDP server alongside the TCP server.
    pub enabled: bool,

    /// Port to bind. `0` lets the OS pick.
    pub port: u16,

    /// Host to bind. Absent means the wildcard addresses.
    pub host: Option<String>,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: DEFAULT_PORT,
            host: None,
        }
    }
}

/// Name shown in startup diagnostics.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct IdentityConfig {
    /// Explicit display name. Absent means the OS hostname.
    pub name: Option<String>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
