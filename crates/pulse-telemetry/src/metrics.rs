//! Prometheus metrics for the telemetry relay.
//!
//! Covers:
//! - Upstream source health and failures
//! - Frame outcomes per team
//! - Subscriber count and fan-out drops
//! - Outlier readings kept out of the rolling maxima
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration failure
//! means duplicate metric names, which must crash at startup. These panics
//! only occur during static initialization, never at runtime.

use crate::error::TelemetryResult;
use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, register_int_gauge_vec,
    Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, TextEncoder,
};
use pulse_core::{SourceStatus, Team};

/// Frames received from upstream sources.
/// Labels: team, outcome (roster/empty/passthrough/invalid_data/error/stale)
pub static FRAMES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "pulse_frames_total",
        "Frames received from upstream sources",
        &["team", "outcome"]
    )
    .unwrap()
});

/// Current source status (1 = active, 0 = inactive).
/// Labels: team, status (connected/no_response/disconnected_timeout)
pub static SOURCE_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "pulse_source_status",
        "Current upstream source status (1=active, 0=inactive)",
        &["team", "status"]
    )
    .unwrap()
});

/// Failed connection attempts or dropped connections per source.
pub static SOURCE_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "pulse_source_failures_total",
        "Upstream source failures",
        &["team"]
    )
    .unwrap()
});

/// Live downstream subscribers.
pub static SUBSCRIBERS: Lazy<IntGauge> =
    Lazy::new(|| register_int_gauge!("pulse_subscribers", "Live downstream subscribers").unwrap());

/// Subscribers removed after a failed send.
pub static BROADCAST_DROPS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "pulse_broadcast_drops_total",
        "Subscribers dropped after a failed send"
    )
    .unwrap()
});

/// Broadcasts issued.
/// Labels: kind (success/no_response/disconnected_timeout)
pub static BROADCASTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "pulse_broadcasts_total",
        "Messages broadcast to subscribers",
        &["kind"]
    )
    .unwrap()
});

/// Readings kept out of the rolling maxima.
/// Labels: kind (speed/hr)
pub static OUTLIERS_REJECTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "pulse_outliers_rejected_total",
        "Sensor readings rejected by the outlier gate",
        &["kind"]
    )
    .unwrap()
});

const STATUSES: [SourceStatus; 3] = [
    SourceStatus::Connected,
    SourceStatus::NoResponse,
    SourceStatus::DisconnectedTimeout,
];

/// Metrics helper.
pub struct Metrics;

impl Metrics {
    /// Record one frame outcome.
    pub fn frame(team: Team, outcome: &str) {
        FRAMES_TOTAL
            .with_label_values(&[team.as_str(), outcome])
            .inc();
    }

    /// Set the active status for a team; all others go to 0.
    pub fn source_status(team: Team, status: SourceStatus) {
        for s in STATUSES {
            SOURCE_STATUS
                .with_label_values(&[team.as_str(), s.as_str()])
                .set(i64::from(s == status));
        }
    }

    /// Zero every status for a team after teardown.
    pub fn source_status_clear(team: Team) {
        for s in STATUSES {
            SOURCE_STATUS
                .with_label_values(&[team.as_str(), s.as_str()])
                .set(0);
        }
    }

    pub fn source_failure(team: Team) {
        SOURCE_FAILURES_TOTAL
            .with_label_values(&[team.as_str()])
            .inc();
    }

    pub fn subscribers(count: usize) {
        SUBSCRIBERS.set(count as i64);
    }

    pub fn broadcast_drops(count: usize) {
        BROADCAST_DROPS_TOTAL.inc_by(count as u64);
    }

    pub fn broadcast(kind: &str) {
        BROADCASTS_TOTAL.with_label_values(&[kind]).inc();
    }

    /// Record rejected readings of one kind.
    pub fn outliers_rejected(kind: &str, count: u32) {
        if count > 0 {
            OUTLIERS_REJECTED_TOTAL
                .with_label_values(&[kind])
                .inc_by(u64::from(count));
        }
    }

    /// Render the default registry in Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&prometheus::gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
