//! Feed error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Invalid JSON data: {0}")]
    InvalidData(String),

    #[error("Invalid sensor entry: {0}")]
    InvalidEntry(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FeedError {
    /// Status tag reported for a discarded frame.
    pub fn status(&self) -> &'static str {
        match self {
            Self::InvalidData(_) => "invalid_data",
            Self::InvalidEntry(_) | Self::Json(_) => "error",
        }
    }
}

pub type FeedResult<T> = Result<T, FeedError>;
