//! Real-time athlete sensor telemetry relay.
//!
//! Orchestrates the relay components:
//! - Upstream source connections, one per configured team
//! - Relay loop: frame normalization, rolling maxima, delayed windows
//! - Subscriber fan-out and the control API

pub mod app;
pub mod config;
pub mod error;
pub mod relay;
pub mod supervisor;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use relay::RelayLoop;
pub use supervisor::{SourceSupervisor, SupervisorSettings};
