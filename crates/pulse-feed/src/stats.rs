//! Rolling statistics store.
//!
//! Per-tag running maxima for speed and heart rate, shared process-wide
//! across both team sources. A reading above the plausibility threshold is
//! an outlier: it is reported as-is by the caller but never enters the
//! running maximum.

use dashmap::DashMap;
use pulse_core::Tag;
use tracing::debug;

/// Plausibility thresholds for the outlier gate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsThresholds {
    pub max_speed_kmh: f64,
    pub max_hr_bpm: f64,
}

impl Default for StatsThresholds {
    fn default() -> Self {
        Self {
            max_speed_kmh: 34.6,
            max_hr_bpm: 213.0,
        }
    }
}

/// Result of a gated update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gated {
    /// Running maximum after the update (0 if the tag has none yet).
    pub value: f64,
    /// False when the reading was rejected as an outlier.
    pub accepted: bool,
}

/// Per-tag rolling maxima.
#[derive(Debug, Default)]
pub struct RollingStatsStore {
    thresholds: StatsThresholds,
    speeds: DashMap<Tag, f64>,
    heart_rates: DashMap<Tag, f64>,
}

impl RollingStatsStore {
    pub fn new(thresholds: StatsThresholds) -> Self {
        Self {
            thresholds,
            speeds: DashMap::new(),
            heart_rates: DashMap::new(),
        }
    }

    pub fn thresholds(&self) -> StatsThresholds {
        self.thresholds
    }

    /// Fold a speed reading (km/h) into the tag's running maximum.
    pub fn update_speed(&self, tag: Tag, speed_kmh: f64) -> Gated {
        gated_update(&self.speeds, tag, speed_kmh, self.thresholds.max_speed_kmh)
    }

    /// Fold a heart-rate reading (bpm) into the tag's running maximum.
    pub fn update_hr(&self, tag: Tag, hr_bpm: f64) -> Gated {
        gated_update(&self.heart_rates, tag, hr_bpm, self.thresholds.max_hr_bpm)
    }

    pub fn max_speed(&self, tag: Tag) -> Option<f64> {
        self.speeds.get(&tag).map(|v| *v)
    }

    pub fn max_hr(&self, tag: Tag) -> Option<f64> {
        self.heart_rates.get(&tag).map(|v| *v)
    }

    /// Forget both maxima for one tag.
    pub fn reset_tag(&self, tag: Tag) {
        let speed = self.speeds.remove(&tag).is_some();
        let hr = self.heart_rates.remove(&tag).is_some();
        debug!(%tag, speed, hr, "Rolling maxima reset for tag");
    }

    /// Forget every tag.
    pub fn clear(&self) {
        self.speeds.clear();
        self.heart_rates.clear();
        debug!("Rolling maxima cleared");
    }

    /// Number of tags holding at least one maximum.
    pub fn len(&self) -> usize {
        let only_hr = self
            .heart_rates
            .iter()
            .filter(|e| !self.speeds.contains_key(e.key()))
            .count();
        self.speeds.len() + only_hr
    }

    pub fn is_empty(&self) -> bool {
        self.speeds.is_empty() && self.heart_rates.is_empty()
    }
}

fn gated_update(map: &DashMap<Tag, f64>, tag: Tag, reading: f64, limit: f64) -> Gated {
    if reading > limit {
        let value = map.get(&tag).map(|v| *v).unwrap_or(0.0);
        return Gated {
            value,
            accepted: false,
        };
    }

    let mut entry = map.entry(tag).or_insert(0.0);
    if reading > *entry {
        *entry = reading;
    }
    Gated {
        value: *entry,
        accepted: true,
    }
}
