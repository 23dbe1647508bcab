//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Event loops produce:
//!     → tracing events (the diagnostic sink: start/stop, connections, data, errors)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout, pretty or JSON)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Loop-internal errors are only visible here; they never reach callers
//! - Metrics are cheap (atomic increments) and no-ops without a recorder

pub mod logging;
pub mod metrics;
