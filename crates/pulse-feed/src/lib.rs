//! Sensor frame normalization for the telemetry relay.
//!
//! Turns raw upstream frames into per-team rosters, keeping outlier-gated
//! rolling maxima per tag and the two delayed-window speed values.

pub mod error;
pub mod normalizer;
pub mod stats;
pub mod windows;

pub use error::{FeedError, FeedResult};
pub use normalizer::{FrameNormalizer, NormalizedFrame, RejectedReadings};
pub use stats::{Gated, RollingStatsStore, StatsThresholds};
pub use windows::{DelayedWindows, Window, WindowUpdate, WindowValues};
