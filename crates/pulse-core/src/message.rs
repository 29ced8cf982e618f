//! Messages pushed to downstream subscribers.

use crate::player::PlayerRecord;
use crate::source::Team;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outbound subscriber message, tagged by `status`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RelayMessage {
    /// Merged snapshot of every team's latest roster.
    Success {
        players: Vec<PlayerRecord>,
        timestamp: DateTime<Utc>,
    },
    /// A source failed and is being retried.
    NoResponse {
        team: Team,
        message: String,
        timestamp: DateTime<Utc>,
    },
    /// A source kept failing past the timeout and was abandoned.
    DisconnectedTimeout {
        team: Team,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl RelayMessage {
    pub fn snapshot(players: Vec<PlayerRecord>) -> Self {
        Self::Success {
            players,
            timestamp: Utc::now(),
        }
    }

    pub fn no_response(team: Team) -> Self {
        Self::NoResponse {
            team,
            message: format!("No response from {team} source"),
            timestamp: Utc::now(),
        }
    }

    pub fn disconnected_timeout(team: Team, timeout_secs: u64) -> Self {
        Self::DisconnectedTimeout {
            team,
            message: format!(
                "{team} disconnected automatically after {timeout_secs}s of failed connection attempts"
            ),
            timestamp: Utc::now(),
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::NoResponse { .. } => "no_response",
            Self::DisconnectedTimeout { .. } => "disconnected_timeout",
        }
    }
}
