//! Prometheus metrics and structured logging for the telemetry relay.
//!
//! - Structured logging with tracing (JSON in production)
//! - Prometheus metrics for sources, frames and subscriber fan-out
//! - Text exposition for the `/metrics` endpoint

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
