//! Upstream source identity and health.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Source slot. Each team is fed by at most one upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Team {
    Team1,
    Team2,
}

impl Team {
    /// All slots in registration order.
    pub const ALL: [Team; 2] = [Team::Team1, Team::Team2];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Team1 => "team1",
            Self::Team2 => "team2",
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Team {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "team1" => Ok(Self::Team1),
            "team2" => Ok(Self::Team2),
            other => Err(CoreError::InvalidTeam(other.to_string())),
        }
    }
}

/// One configured upstream source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceBinding {
    pub url: String,
    pub team: Team,
}

impl SourceBinding {
    /// Create a binding, rejecting anything that is not a WebSocket URL.
    pub fn new(url: impl Into<String>, team: Team) -> Result<Self> {
        let url = url.into();
        let trimmed = url.trim();
        if !(trimmed.starts_with("ws://") || trimmed.starts_with("wss://")) {
            return Err(CoreError::InvalidUrl(url));
        }
        Ok(Self {
            url: trimmed.to_string(),
            team,
        })
    }
}

/// Health reported for a source, as exposed by the status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Connected,
    NoResponse,
    DisconnectedTimeout,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::NoResponse => "no_response",
            Self::DisconnectedTimeout => "disconnected_timeout",
        }
    }

    /// Terminal statuses are never left without a reconfiguration.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::DisconnectedTimeout)
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
