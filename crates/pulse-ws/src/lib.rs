//! Upstream WebSocket connections to sensor sources.
//!
//! One `SourceConnection` per configured team source:
//! - Connects with certificate verification disabled when policy says so
//! - Forwards every inbound frame to the relay loop as a `SourceEvent`
//! - Retries at a fixed interval while failing
//! - Gives up permanently once failures have lasted longer than the timeout
//! - Stops cooperatively when its cancellation token fires

pub mod connection;
pub mod error;
pub mod failure;
pub mod tls;

pub use connection::{
    ConnectionState, SourceConfig, SourceConnection, SourceEvent, SourceExit,
    DEFAULT_FAILURE_TIMEOUT, DEFAULT_RETRY_INTERVAL,
};
pub use error::{WsError, WsResult};
pub use failure::{FailureTracker, FailureVerdict};
