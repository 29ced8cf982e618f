//! Frame normalization.
//!
//! Converts one raw upstream text frame into a team roster. Only frames of
//! the form `{"kind": "sensors", "payload": [...]}` yield players; any other
//! well-formed JSON passes through untouched for diagnostics.

use crate::error::{FeedError, FeedResult};
use crate::stats::RollingStatsStore;
use crate::windows::{DelayedWindows, WindowUpdate};
use pulse_core::{PlayerRecord, Tag, Team, TeamRoster};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, trace};

/// Metres per second to kilometres per hour.
const MPS_TO_KMH: f64 = 3.6;

/// Outcome of a successfully parsed frame.
#[derive(Debug, Clone)]
pub enum NormalizedFrame {
    /// Sensor frame. `roster.players` may be empty when no entry carried
    /// player info.
    Roster {
        roster: TeamRoster,
        rejected: RejectedReadings,
    },
    /// Well-formed JSON that is not a sensor frame.
    Passthrough {
        team: Team,
        source_url: String,
        original: Value,
    },
}

impl NormalizedFrame {
    /// Status tag of the parse outcome. Both variants parsed fine.
    pub fn status(&self) -> &'static str {
        "success"
    }

    /// Roster worth broadcasting, if any.
    pub fn players(&self) -> Option<&TeamRoster> {
        match self {
            Self::Roster { roster, .. } if !roster.is_empty() => Some(roster),
            _ => None,
        }
    }
}

/// Readings kept out of the rolling maxima by the outlier gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RejectedReadings {
    pub speed: u32,
    pub hr: u32,
}

/// Numeric sensor readings. Absent fields default to zero.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OnlineData {
    max_speed_60_s: f64,
    hr: f64,
    distance: f64,
    speed_z_4_dist: f64,
    speed_z_5_dist: f64,
    load: f64,
}

/// Normalizes frames against the shared stores.
pub struct FrameNormalizer {
    stats: Arc<RollingStatsStore>,
    windows: DelayedWindows,
}

impl FrameNormalizer {
    pub fn new(stats: Arc<RollingStatsStore>, windows: DelayedWindows) -> Self {
        Self { stats, windows }
    }

    pub fn stats(&self) -> &Arc<RollingStatsStore> {
        &self.stats
    }

    pub fn windows(&self) -> &DelayedWindows {
        &self.windows
    }

    pub fn has_pending_windows(&self) -> bool {
        self.windows.has_pending()
    }

    /// Wait for the next delayed-window timer and apply it.
    pub async fn next_window_update(&mut self) -> Option<WindowUpdate> {
        self.windows.next_fired().await
    }

    /// Normalize one raw frame from `source_url` feeding `team`.
    ///
    /// A broken entry fails the whole frame. Entries processed before it
    /// keep their side effects on the stores.
    pub fn normalize(
        &mut self,
        raw: &str,
        source_url: &str,
        team: Team,
    ) -> FeedResult<NormalizedFrame> {
        let data: Value =
            serde_json::from_str(raw).map_err(|e| FeedError::InvalidData(e.to_string()))?;

        let Value::Object(object) = data else {
            return Err(FeedError::InvalidEntry("frame is not a JSON object".to_string()));
        };

        let is_sensor_frame = object.get("kind").and_then(Value::as_str) == Some("sensors")
            && object.get("payload").is_some_and(Value::is_array);
        if !is_sensor_frame {
            trace!(%team, "Passing through non-sensor frame");
            return Ok(NormalizedFrame::Passthrough {
                team,
                source_url: source_url.to_string(),
                original: Value::Object(object),
            });
        }
        let entries = object
            .get("payload")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut players = Vec::with_capacity(entries.len());
        let mut rejected = RejectedReadings::default();

        for entry in entries {
            let Some(entry) = entry.as_object() else {
                return Err(FeedError::InvalidEntry("sensor entry is not an object".to_string()));
            };
            let Some(info) = entry.get("player_info").filter(|v| is_truthy(v)) else {
                continue;
            };
            players.push(self.normalize_entry(entry, info, &mut rejected)?);
        }

        debug!(
            %team,
            players = players.len(),
            speed_outliers = rejected.speed,
            hr_outliers = rejected.hr,
            "Sensor frame normalized"
        );

        Ok(NormalizedFrame::Roster {
            roster: TeamRoster::new(team, players),
            rejected,
        })
    }

    fn normalize_entry(
        &mut self,
        entry: &Map<String, Value>,
        info: &Value,
        rejected: &mut RejectedReadings,
    ) -> FeedResult<PlayerRecord> {
        let tag = parse_tag(entry.get("tag"))?;
        let online = match entry.get("online_data") {
            Some(v) => OnlineData::deserialize(v)?,
            None => return Err(FeedError::InvalidEntry(format!("tag {tag}: missing online_data"))),
        };

        let speed = round_to(online.max_speed_60_s * MPS_TO_KMH, 1);
        self.windows.schedule(tag, speed);

        let team_name = match entry.get("team_name") {
            Some(Value::String(name)) => name.clone(),
            Some(other) => other.to_string(),
            None => return Err(FeedError::InvalidEntry(format!("tag {tag}: missing team_name"))),
        };

        let hr = online.hr.round_ties_even();
        let max_hr = self.stats.update_hr(tag, hr);
        if !max_hr.accepted {
            rejected.hr += 1;
        }
        let windows = self.windows.get(tag);
        let max_speed = self.stats.update_speed(tag, speed);
        if !max_speed.accepted {
            rejected.speed += 1;
        }

        Ok(PlayerRecord {
            tag,
            team_name,
            jersey: info.get("jersey").cloned(),
            first_name: string_field(info, "f_name"),
            last_name: string_field(info, "l_name"),
            distance_m: online.distance.round_ties_even() as i64,
            distance_km: round_to(online.distance / 1000.0, 1),
            hir: round_to(online.speed_z_4_dist + online.speed_z_5_dist, 1),
            hr: hr as i64,
            max_hr: max_hr.value as i64,
            max_speed_60_s: speed,
            max_speed_120_s: windows.short,
            max_speed_180_s: windows.long,
            max_speed: max_speed.value,
            load: round_to(online.load, 1),
        })
    }
}

/// Round to `decimals` places, halves to even.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round_ties_even() / factor
}

fn parse_tag(value: Option<&Value>) -> FeedResult<Tag> {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Tag::new)
            .ok_or_else(|| FeedError::InvalidEntry(format!("non-integer tag {n}"))),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Tag::new)
            .map_err(|_| FeedError::InvalidEntry(format!("non-numeric tag {s:?}"))),
        Some(other) => Err(FeedError::InvalidEntry(format!("unsupported tag {other}"))),
        None => Err(FeedError::InvalidEntry("missing tag".to_string())),
    }
}

fn string_field(info: &Value, key: &str) -> Option<String> {
    info.get(key).and_then(Value::as_str).map(str::to_string)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
