//! Main application orchestration.
//!
//! Coordinates all components:
//! - Source supervisor and its per-team connection tasks
//! - Relay loop (normalization, rolling maxima, delayed windows)
//! - HTTP server with the control API and the subscriber socket

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::relay::RelayLoop;
use crate::supervisor::{SourceSupervisor, SupervisorSettings};
use pulse_core::SourceBinding;
use pulse_dashboard::{run_server, AppState, Broadcaster, RelayControl, SubscriberRegistry};
use pulse_feed::{DelayedWindows, FrameNormalizer, RollingStatsStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Time allowed for background tasks to stop after shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Main application.
pub struct Application {
    config: AppConfig,
    /// Sources connected before the server starts accepting requests.
    startup_sources: Vec<SourceBinding>,
    shutdown: CancellationToken,
}

impl Application {
    /// Create a new application, validating the configuration.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        if config.sources.event_buffer == 0 {
            return Err(AppError::Config("sources.event_buffer must be positive".to_string()));
        }
        if config.server.subscriber_buffer == 0 {
            return Err(AppError::Config("server.subscriber_buffer must be positive".to_string()));
        }

        let startup_sources = match config.sources.startup_request() {
            Some(request) => request.bindings()?,
            None => Vec::new(),
        };

        Ok(Self {
            config,
            startup_sources,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Token that stops `run` when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Bind the configured address and run until shutdown.
    pub async fn run(self) -> AppResult<()> {
        let listener = pulse_dashboard::bind(&self.config.server).await?;
        self.run_with_listener(listener).await
    }

    /// Run on an already bound listener until ctrl-c, the shutdown token, or
    /// a server failure.
    pub async fn run_with_listener(self, listener: TcpListener) -> AppResult<()> {
        let Self {
            config,
            startup_sources,
            shutdown,
        } = self;

        info!(addr = ?listener.local_addr().ok(), "Starting relay");

        let stats = Arc::new(RollingStatsStore::new(config.stats.thresholds()));
        let windows = DelayedWindows::new(config.stats.window_short(), config.stats.window_long());
        let normalizer = FrameNormalizer::new(Arc::clone(&stats), windows);

        let registry = Arc::new(SubscriberRegistry::new(config.server.subscriber_buffer));
        let broadcaster = Arc::new(Broadcaster::new(registry));

        let (event_tx, event_rx) = mpsc::channel(config.sources.event_buffer);
        let settings = SupervisorSettings {
            retry_interval: config.sources.retry_interval(),
            failure_timeout: config.sources.failure_timeout(),
            accept_invalid_certs: config.sources.accept_invalid_certs,
        };
        let supervisor = Arc::new(SourceSupervisor::new(
            settings,
            stats,
            Arc::clone(&broadcaster),
            event_tx,
        ));

        let relay = RelayLoop::new(
            normalizer,
            Arc::clone(&broadcaster),
            event_rx,
            settings.failure_timeout,
        );
        let relay_handle = tokio::spawn(relay.run(shutdown.clone()));

        if !startup_sources.is_empty() {
            let count = supervisor.configure_sources(startup_sources);
            info!(count, "Startup sources configured");
        }

        let control: Arc<dyn RelayControl> = supervisor.clone();
        let state = AppState::new(broadcaster, control, config.server.clone());
        let mut server_handle = tokio::spawn(run_server(listener, state, shutdown.clone()));

        let mut result = Ok(());
        let mut server_done = false;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
            }
            _ = shutdown.cancelled() => {
                info!("Shutdown requested");
            }
            joined = &mut server_handle => {
                server_done = true;
                match joined {
                    Ok(Ok(())) => warn!("Server stopped unexpectedly"),
                    Ok(Err(e)) => {
                        error!(error = %e, "Server failed");
                        result = Err(AppError::Io(e));
                    }
                    Err(e) => error!(error = %e, "Server task panicked"),
                }
            }
        }

        // Cleanup
        shutdown.cancel();
        supervisor.shutdown(SHUTDOWN_GRACE).await;

        if tokio::time::timeout(SHUTDOWN_GRACE, relay_handle).await.is_err() {
            warn!("Relay loop did not stop within grace period");
        }
        if !server_done {
            match tokio::time::timeout(SHUTDOWN_GRACE, server_handle).await {
                Ok(Ok(Err(e))) => warn!(error = %e, "Server error during shutdown"),
                Err(_) => warn!("Server did not stop within grace period"),
                _ => {}
            }
        }

        info!("Relay stopped");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_zero_buffers() {
        let mut config = AppConfig::default();
        config.sources.event_buffer = 0;
        assert!(matches!(Application::new(config), Err(AppError::Config(_))));

        let mut config = AppConfig::default();
        config.server.subscriber_buffer = 0;
        assert!(matches!(Application::new(config), Err(AppError::Config(_))));
    }

    #[test]
    fn test_new_validates_startup_sources() {
        let mut config = AppConfig::default();
        config.sources.team1_url = Some("http://a.example".to_string());
        assert!(matches!(Application::new(config), Err(AppError::Control(_))));

        let mut config = AppConfig::default();
        config.sources.team2_url = Some("wss://b.example/feed".to_string());
        let app = Application::new(config).unwrap();
        assert_eq!(app.startup_sources.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_token_stops_run() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let app = Application::new(AppConfig::default()).unwrap();
        let token = app.shutdown_token();

        let handle = tokio::spawn(app.run_with_listener(listener));
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
