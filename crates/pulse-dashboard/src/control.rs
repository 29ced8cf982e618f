//! Control surface seen by the HTTP layer.

use std::collections::BTreeMap;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use pulse_core::{SourceBinding, SourceStatus, Tag, Team};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Operations the relay exposes to the control API.
///
/// Implementations must not block: every call returns once state is updated
/// and any background work has been spawned.
#[cfg_attr(test, mockall::automock)]
pub trait RelayControl: Send + Sync {
    /// Tear down current sources and start one per binding. Returns the
    /// number of sources started.
    fn configure_sources(&self, bindings: Vec<SourceBinding>) -> usize;

    /// Tear down every source and clear the rolling maxima.
    fn disconnect_all(&self);

    fn reset_all_maxima(&self);

    fn reset_maxima_for_tag(&self, tag: Tag);

    fn status(&self) -> StatusReport;
}

/// Invalid control input. Nothing has been changed when this is returned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("At least one source URL is required")]
    NoSources,

    #[error("Invalid source URL for {team}: {url:?} (expected ws:// or wss://)")]
    InvalidUrl { team: Team, url: String },
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let body = ControlResponse {
            status: "error",
            message: self.to_string(),
            connected_count: None,
        };
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

/// Body of `POST /set_wss_url`. An empty or missing URL leaves that team
/// unconfigured.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigureSources {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub url_2: String,
}

impl ConfigureSources {
    /// Validate into at most one binding per team.
    pub fn bindings(&self) -> Result<Vec<SourceBinding>, ControlError> {
        let mut bindings = Vec::with_capacity(2);
        for (team, url) in [(Team::Team1, &self.url), (Team::Team2, &self.url_2)] {
            if url.trim().is_empty() {
                continue;
            }
            let binding = SourceBinding::new(url.as_str(), team).map_err(|_| {
                ControlError::InvalidUrl {
                    team,
                    url: url.clone(),
                }
            })?;
            bindings.push(binding);
        }

        if bindings.is_empty() {
            return Err(ControlError::NoSources);
        }
        Ok(bindings)
    }
}

/// Body of `POST /reset_max_values_tag`.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct ResetTagRequest {
    pub tag: Tag,
}

/// Envelope returned by every control route.
#[derive(Debug, Clone, Serialize)]
pub struct ControlResponse {
    pub status: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_count: Option<usize>,
}

impl ControlResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: "success",
            message: message.into(),
            connected_count: None,
        }
    }
}

/// Read-only view of configured sources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    pub bindings: Vec<SourceBinding>,
    /// Last reported status per URL. A URL with no outcome yet is absent.
    pub status: BTreeMap<String, SourceStatus>,
}

/// Per-team summary read by the bundled page.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TeamSummary {
    pub url: String,
    pub connected: bool,
}

/// Body of `GET /status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    /// Configured source URL per team.
    pub bindings: BTreeMap<Team, String>,
    pub status: BTreeMap<String, SourceStatus>,
    pub connected_urls: Vec<String>,
    pub team_mapping: BTreeMap<String, Team>,
    pub teams: BTreeMap<Team, TeamSummary>,
}

impl From<StatusReport> for StatusResponse {
    fn from(report: StatusReport) -> Self {
        let bindings = report
            .bindings
            .iter()
            .map(|b| (b.team, b.url.clone()))
            .collect();
        let connected_urls = report.bindings.iter().map(|b| b.url.clone()).collect();
        let team_mapping = report
            .bindings
            .iter()
            .map(|b| (b.url.clone(), b.team))
            .collect();
        let teams = report
            .bindings
            .iter()
            .map(|b| {
                let connected = report.status.get(&b.url) == Some(&SourceStatus::Connected);
                (
                    b.team,
                    TeamSummary {
                        url: b.url.clone(),
                        connected,
                    },
                )
            })
            .collect();

        Self {
            bindings,
            status: report.status,
            connected_urls,
            team_mapping,
            teams,
        }
    }
}
