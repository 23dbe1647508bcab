//! Host and port → candidate local endpoints.
//!
//! # Responsibilities
//! - Produce the wildcard candidates (IPv4 then IPv6) for a port
//! - Resolve an explicit host through the OS naming facility
//! - Keep candidate order stable so binding is deterministic

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};

use crate::net::error::ResolutionError;

/// Address family of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::V4 => write!(f, "ipv4"),
            AddressFamily::V6 => write!(f, "ipv6"),
        }
    }
}

/// A resolved local address eligible for binding. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    addr: SocketAddr,
    display: Option<String>,
}

impl Endpoint {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, display: None }
    }

    /// Attach the name the endpoint was resolved from.
    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn family(&self) -> AddressFamily {
        match self.addr.ip() {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }

    pub fn display_address(&self) -> Option<&str> {
        self.display.as_deref()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.display {
            Some(name) => write!(f, "{} ({})", self.addr, name),
            None => write!(f, "{}", self.addr),
        }
    }
}

/// Resolve an optional host and a port into ordered candidates.
///
/// With no host, yields the IPv4 and IPv6 wildcard addresses for `port`, in
/// that order. With a host, asks the OS resolver and keeps its order, dropping
/// duplicates.
pub fn resolve(host: Option<&str>, port: u16) -> Result<Vec<Endpoint>, ResolutionError> {
    let candidates: Vec<Endpoint> = match host {
        None => vec![
            Endpoint::new(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)),
            Endpoint::new(SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port)),
        ],
        Some(host) => {
            let resolved = (host, port)
                .to_socket_addrs()
                .map_err(|source| ResolutionError::Lookup {
                    host: host.to_string(),
                    port,
                    source,
                })?;

            let mut seen: Vec<SocketAddr> = Vec::new();
            for addr in resolved {
                if !seen.contains(&addr) {
                    seen.push(addr);
                }
            }
            seen.into_iter()
                .map(|addr| Endpoint::new(addr).with_display(host))
                .collect()
        }
    };

    if candidates.is_empty() {
        return Err(ResolutionError::NoCandidates { port });
    }

    tracing::debug!(
        port,
        candidates = candidates.len(),
        "Resolved bind candidates"
    );
    Ok(candidates)
}
