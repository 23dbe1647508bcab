//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → CLI overrides applied by the binary, validated again
//!     → handed by value to each server
//! ```
//!
//! # Design Decisions
//! - Config is immutable once a server has started
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    IdentityConfig, ListenerConfig, LogFormat, ObservabilityConfig, ServerConfig, UdpConfig,
    DEFAULT_PORT,
};
pub use validation::{validate_config, ValidationError};
