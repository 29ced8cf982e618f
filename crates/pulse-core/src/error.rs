//! Error types for pulse-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid team: {0}")]
    InvalidTeam(String),

    #[error("Invalid source url: {0}")]
    InvalidUrl(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
