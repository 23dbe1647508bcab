//! Numeric peer address rendering.

use std::fmt;
use std::net::SocketAddr;

/// Address and port of a remote peer, as shown in diagnostics and handed to
/// the processing hook.
///
/// An empty `address` with port `0` means the peer could not be determined.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PeerAddress {
    pub address: String,
    pub port: u16,
}

impl PeerAddress {
    /// Placeholder for a peer whose address is not known.
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn is_unknown(&self) -> bool {
        self.address.is_empty()
    }
}

impl From<SocketAddr> for PeerAddress {
    fn from(addr: SocketAddr) -> Self {
        Self {
            address: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unknown() {
            return write!(f, "<unknown>");
        }
        if self.address.contains(':') {
            write!(f, "[{}]:{}", self.address, self.port)
        } else {
            write!(f, "{}:{}", self.address, self.port)
        }
    }
}
