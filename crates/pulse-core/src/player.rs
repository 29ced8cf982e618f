//! Normalized per-player statistics.

use crate::source::Team;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sensor tag identifying one athlete. Assumed unique across both teams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(pub i64);

impl Tag {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl From<i64> for Tag {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One player's statistics as pushed to subscribers.
///
/// Field names are the wire names the dashboard reads. `max_speed_120_s` and
/// `max_speed_180_s` are fed by the 60 s and 120 s delayed windows respectively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub tag: Tag,
    pub team_name: String,
    pub jersey: Option<serde_json::Value>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Total distance in metres, rounded.
    pub distance_m: i64,
    /// Total distance in kilometres, one decimal.
    pub distance_km: f64,
    /// High-intensity running distance (zones 4 and 5).
    pub hir: f64,
    /// Current heart rate.
    pub hr: i64,
    /// Rolling maximum heart rate.
    pub max_hr: i64,
    /// Latest 60 s window peak speed in km/h.
    pub max_speed_60_s: f64,
    pub max_speed_120_s: f64,
    pub max_speed_180_s: f64,
    /// Rolling maximum speed in km/h (outlier gated).
    pub max_speed: f64,
    pub load: f64,
}

/// Players reported by one team's source in its latest frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamRoster {
    pub team: Team,
    pub players: Vec<PlayerRecord>,
}

impl TeamRoster {
    pub fn new(team: Team, players: Vec<PlayerRecord>) -> Self {
        Self { team, players }
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}
