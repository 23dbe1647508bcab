//! Multi-client TCP server multiplexed over a single readiness loop.

pub mod config;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod server;

pub use config::schema::ServerConfig;
pub use lifecycle::ServerState;
pub use server::{ProcessingHook, ServerError, TcpServer, UdpServer};
