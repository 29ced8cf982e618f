//! Application configuration.

use crate::error::AppResult;
use pulse_dashboard::{ConfigureSources, DashboardConfig};
use pulse_feed::StatsThresholds;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment override prefix, e.g. `PULSE__SERVER__PORT=9000`.
pub const ENV_PREFIX: &str = "PULSE";

/// Upstream source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Backoff between reconnection attempts (ms).
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// Continuous failure after which a source is abandoned (s).
    #[serde(default = "default_failure_timeout_secs")]
    pub failure_timeout_secs: u64,
    /// Skip certificate verification for `wss://` sources.
    #[serde(default = "default_accept_invalid_certs")]
    pub accept_invalid_certs: bool,
    /// Capacity of the source event channel feeding the relay loop.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Team 1 source to connect at startup.
    #[serde(default)]
    pub team1_url: Option<String>,
    /// Team 2 source to connect at startup.
    #[serde(default)]
    pub team2_url: Option<String>,
}

fn default_retry_interval_ms() -> u64 {
    5_000
}

fn default_failure_timeout_secs() -> u64 {
    300
}

fn default_accept_invalid_certs() -> bool {
    true
}

fn default_event_buffer() -> usize {
    1_024
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: default_retry_interval_ms(),
            failure_timeout_secs: default_failure_timeout_secs(),
            accept_invalid_certs: default_accept_invalid_certs(),
            event_buffer: default_event_buffer(),
            team1_url: None,
            team2_url: None,
        }
    }
}

impl SourcesConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn failure_timeout(&self) -> Duration {
        Duration::from_secs(self.failure_timeout_secs)
    }

    /// Startup sources, if any are configured.
    pub fn startup_request(&self) -> Option<ConfigureSources> {
        let url = self.team1_url.clone().unwrap_or_default();
        let url_2 = self.team2_url.clone().unwrap_or_default();
        if url.trim().is_empty() && url_2.trim().is_empty() {
            return None;
        }
        Some(ConfigureSources { url, url_2 })
    }
}

/// Outlier gate and delayed-window settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    #[serde(default = "default_max_plausible_speed_kmh")]
    pub max_plausible_speed_kmh: f64,
    #[serde(default = "default_max_plausible_hr_bpm")]
    pub max_plausible_hr_bpm: f64,
    /// Delay of the window reported as `max_speed_120_s`.
    #[serde(default = "default_window_short_secs")]
    pub window_short_secs: u64,
    /// Delay of the window reported as `max_speed_180_s`.
    #[serde(default = "default_window_long_secs")]
    pub window_long_secs: u64,
}

fn default_max_plausible_speed_kmh() -> f64 {
    34.6
}

fn default_max_plausible_hr_bpm() -> f64 {
    213.0
}

fn default_window_short_secs() -> u64 {
    60
}

fn default_window_long_secs() -> u64 {
    120
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            max_plausible_speed_kmh: default_max_plausible_speed_kmh(),
            max_plausible_hr_bpm: default_max_plausible_hr_bpm(),
            window_short_secs: default_window_short_secs(),
            window_long_secs: default_window_long_secs(),
        }
    }
}

impl StatsConfig {
    pub fn thresholds(&self) -> StatsThresholds {
        StatsThresholds {
            max_speed_kmh: self.max_plausible_speed_kmh,
            max_hr_bpm: self.max_plausible_hr_bpm,
        }
    }

    pub fn window_short(&self) -> Duration {
        Duration::from_secs(self.window_short_secs)
    }

    pub fn window_long(&self) -> Duration {
        Duration::from_secs(self.window_long_secs)
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_log_filter() -> String {
    "info,pulse=debug".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: DashboardConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub stats: StatsConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file, then apply `PULSE__` environment
    /// overrides (`__` separates nested keys).
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}
