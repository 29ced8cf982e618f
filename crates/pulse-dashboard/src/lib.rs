//! pulse-dashboard - Subscriber fan-out and control API for the relay.
//!
//! - `SubscriberRegistry`: live downstream connections, dropped on failed send
//! - `Broadcaster`: per-team rosters merged into one snapshot and fanned out
//! - `RelayControl`: operations the control routes call into
//! - axum server with the control routes, `/ws`, `/status` and `/metrics`
//!
//! # Usage
//!
//! ```ignore
//! use pulse_dashboard::{bind, run_server, AppState, Broadcaster, DashboardConfig, SubscriberRegistry};
//!
//! let registry = Arc::new(SubscriberRegistry::new(config.subscriber_buffer));
//! let broadcaster = Arc::new(Broadcaster::new(registry));
//! let state = AppState::new(broadcaster, control, config.clone());
//! let listener = bind(&config).await?;
//! run_server(listener, state, shutdown_token).await?;
//! ```

mod broadcast;
mod config;
mod control;
mod registry;
mod server;

pub use broadcast::Broadcaster;
pub use config::DashboardConfig;
pub use control::{
    ConfigureSources, ControlError, ControlResponse, RelayControl, ResetTagRequest, StatusReport,
    StatusResponse, TeamSummary,
};
pub use registry::{Delivery, SubscriberId, SubscriberRegistry};
pub use server::{bind, create_router, run_server, AppState, ConnectionGuard, ConnectionLimiter};
