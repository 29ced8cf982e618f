//! Source connection manager.
//!
//! Handles the lifecycle of one upstream sensor source: connect, forward
//! frames, retry at a fixed interval while failing, and give up once the
//! failures have lasted longer than the configured timeout.

use crate::error::{WsError, WsResult};
use crate::failure::{FailureTracker, FailureVerdict};
use crate::tls;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use pulse_core::{SourceBinding, SourceStatus, Team};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::{connect_async_tls_with_config, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Wait between reconnection attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// How long a source may keep failing before it is abandoned.
pub const DEFAULT_FAILURE_TIMEOUT: Duration = Duration::from_secs(300);

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Source URL and the team it feeds.
    pub binding: SourceBinding,
    /// Fixed backoff between attempts.
    pub retry_interval: Duration,
    /// Continuous-failure budget before giving up.
    pub failure_timeout: Duration,
    /// Skip certificate verification for `wss://` sources.
    pub accept_invalid_certs: bool,
    /// Configuration generation this connection belongs to.
    pub generation: u64,
}

impl SourceConfig {
    pub fn new(binding: SourceBinding) -> Self {
        Self {
            binding,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            failure_timeout: DEFAULT_FAILURE_TIMEOUT,
            accept_invalid_certs: true,
            generation: 0,
        }
    }
}

/// Connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Failing,
    /// Terminal: failures outlasted the timeout.
    TimedOut,
    /// Terminal: cancelled by a reconfiguration.
    Stopped,
}

/// Event forwarded to the relay loop.
#[derive(Debug, Clone)]
pub enum SourceEvent {
    Connected {
        generation: u64,
        team: Team,
        url: String,
    },
    Frame {
        generation: u64,
        team: Team,
        url: String,
        text: String,
    },
    NoResponse {
        generation: u64,
        team: Team,
        url: String,
        reason: String,
    },
    TimedOut {
        generation: u64,
        team: Team,
        url: String,
        elapsed: Duration,
    },
}

impl SourceEvent {
    pub fn generation(&self) -> u64 {
        match self {
            Self::Connected { generation, .. }
            | Self::Frame { generation, .. }
            | Self::NoResponse { generation, .. }
            | Self::TimedOut { generation, .. } => *generation,
        }
    }

    pub fn team(&self) -> Team {
        match self {
            Self::Connected { team, .. }
            | Self::Frame { team, .. }
            | Self::NoResponse { team, .. }
            | Self::TimedOut { team, .. } => *team,
        }
    }
}

/// Why `run` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceExit {
    Cancelled,
    TimedOut,
}

/// One upstream source connection.
pub struct SourceConnection {
    config: SourceConfig,
    state: RwLock<ConnectionState>,
    status: RwLock<Option<SourceStatus>>,
    event_tx: mpsc::Sender<SourceEvent>,
    /// Cancellation token for reconfiguration and shutdown.
    shutdown_token: CancellationToken,
}

impl SourceConnection {
    /// Create a new source connection.
    pub fn new(config: SourceConfig, event_tx: mpsc::Sender<SourceEvent>) -> Self {
        Self {
            config,
            state: RwLock::new(ConnectionState::Connecting),
            status: RwLock::new(None),
            event_tx,
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn binding(&self) -> &SourceBinding {
        &self.config.binding
    }

    pub fn team(&self) -> Team {
        self.config.binding.team
    }

    pub fn url(&self) -> &str {
        &self.config.binding.url
    }

    pub fn generation(&self) -> u64 {
        self.config.generation
    }

    /// Get current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Last status reported for this source, `None` before the first outcome.
    pub fn status(&self) -> Option<SourceStatus> {
        *self.status.read()
    }

    /// Signal cancellation.
    ///
    /// Observed at the next suspension point: the socket gets a Close frame
    /// and `run` returns `SourceExit::Cancelled`.
    pub fn shutdown(&self) {
        info!(team = %self.team(), url = %self.url(), "Source shutdown requested");
        self.shutdown_token.cancel();
    }

    /// Check if shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Run the connect / read / retry loop until cancelled or timed out.
    pub async fn run(&self) -> SourceExit {
        let mut failures = FailureTracker::new(self.config.failure_timeout);

        loop {
            if self.is_shutdown() {
                return self.stop("Shutdown requested, exiting connect loop");
            }

            *self.state.write() = ConnectionState::Connecting;

            let reason = match self.try_connect(&mut failures).await {
                // try_connect only returns Ok once cancelled
                Ok(()) => return self.stop("Source connection closed for shutdown"),
                Err(e) => e.to_string(),
            };

            if self.is_shutdown() {
                return self.stop("Shutdown requested after failure, not reconnecting");
            }

            match failures.record_failure(Instant::now()) {
                FailureVerdict::FirstFailure => {
                    warn!(team = %self.team(), url = %self.url(), %reason, "Source failed");
                }
                FailureVerdict::StillFailing { elapsed } => {
                    warn!(
                        team = %self.team(),
                        url = %self.url(),
                        %reason,
                        elapsed_secs = elapsed.as_secs(),
                        "Source still failing"
                    );
                }
                FailureVerdict::TimedOut { elapsed } => {
                    error!(
                        team = %self.team(),
                        url = %self.url(),
                        elapsed_secs = elapsed.as_secs(),
                        "Source failure timeout exceeded, giving up"
                    );
                    *self.state.write() = ConnectionState::TimedOut;
                    *self.status.write() = Some(SourceStatus::DisconnectedTimeout);
                    self.emit(SourceEvent::TimedOut {
                        generation: self.config.generation,
                        team: self.team(),
                        url: self.url().to_string(),
                        elapsed,
                    })
                    .await;
                    return SourceExit::TimedOut;
                }
            }

            *self.state.write() = ConnectionState::Failing;
            *self.status.write() = Some(SourceStatus::NoResponse);
            self.emit(SourceEvent::NoResponse {
                generation: self.config.generation,
                team: self.team(),
                url: self.url().to_string(),
                reason,
            })
            .await;

            debug!(
                team = %self.team(),
                delay_ms = self.config.retry_interval.as_millis() as u64,
                "Reconnecting"
            );

            // Wait for delay OR shutdown signal (cancellation-aware sleep)
            tokio::select! {
                () = tokio::time::sleep(self.config.retry_interval) => {}
                () = self.shutdown_token.cancelled() => {
                    return self.stop("Shutdown requested during backoff, exiting");
                }
            }
        }
    }

    fn stop(&self, why: &'static str) -> SourceExit {
        info!(team = %self.team(), url = %self.url(), "{why}");
        *self.state.write() = ConnectionState::Stopped;
        SourceExit::Cancelled
    }

    /// Connect and pump frames. Returns `Ok` only when cancelled.
    async fn try_connect(&self, failures: &mut FailureTracker) -> WsResult<()> {
        info!(team = %self.team(), url = %self.url(), "Connecting to source");

        let connector = tls::connector(self.config.accept_invalid_certs)?;
        let connect = connect_async_tls_with_config(self.url(), None, true, connector);

        let (ws_stream, _response) = tokio::select! {
            result = connect => result?,
            () = self.shutdown_token.cancelled() => return Ok(()),
        };
        let (mut write, mut read) = ws_stream.split();

        failures.record_success();
        *self.state.write() = ConnectionState::Connected;
        *self.status.write() = Some(SourceStatus::Connected);
        info!(team = %self.team(), url = %self.url(), "Source connected");
        self.emit(SourceEvent::Connected {
            generation: self.config.generation,
            team: self.team(),
            url: self.url().to_string(),
        })
        .await;

        loop {
            tokio::select! {
                () = self.shutdown_token.cancelled() => {
                    // Send WebSocket Close frame for graceful disconnect
                    if let Err(e) = write.send(Message::Close(None)).await {
                        warn!(?e, "Failed to send Close frame during shutdown");
                    }
                    return Ok(());
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.emit_frame(text).await;
                        }
                        Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                            Ok(text) => self.emit_frame(text).await,
                            Err(_) => debug!(team = %self.team(), "Dropping non-UTF-8 binary frame"),
                        },
                        Some(Ok(Message::Ping(data))) => {
                            debug!("Received ping, sending pong");
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (u16::from(f.code), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            warn!(team = %self.team(), code, %reason, "Source closed by server");
                            return Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Err(e)) => {
                            warn!(team = %self.team(), ?e, "Source read error");
                            return Err(e.into());
                        }
                        None => {
                            warn!(team = %self.team(), "Source stream ended");
                            return Err(WsError::StreamEnded);
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    async fn emit_frame(&self, text: String) {
        self.emit(SourceEvent::Frame {
            generation: self.config.generation,
            team: self.team(),
            url: self.url().to_string(),
            text,
        })
        .await;
    }

    async fn emit(&self, event: SourceEvent) {
        if self.event_tx.send(event).await.is_err() {
            warn!(team = %self.team(), "Source event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::Team;

    fn unreachable_config() -> SourceConfig {
        // Port 1 on loopback refuses immediately
        let binding = SourceBinding::new("ws://127.0.0.1:1", Team::Team1).unwrap();
        SourceConfig {
            accept_invalid_certs: false,
            generation: 3,
            ..SourceConfig::new(binding)
        }
    }

    #[test]
    fn test_default_config() {
        let binding = SourceBinding::new("wss://feed.example/ws", Team::Team2).unwrap();
        let config = SourceConfig::new(binding);
        assert_eq!(config.retry_interval, Duration::from_secs(5));
        assert_eq!(config.failure_timeout, Duration::from_secs(300));
        assert!(config.accept_invalid_certs);
    }

    #[test]
    fn test_initial_state() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = SourceConnection::new(unreachable_config(), tx);
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert_eq!(conn.status(), None);
        assert_eq!(conn.team(), Team::Team1);
        assert_eq!(conn.generation(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_failure_times_out_once() {
        let (tx, mut rx) = mpsc::channel(256);
        let conn = SourceConnection::new(unreachable_config(), tx);

        let exit = conn.run().await;
        assert_eq!(exit, SourceExit::TimedOut);
        assert_eq!(conn.state(), ConnectionState::TimedOut);
        assert_eq!(conn.status(), Some(SourceStatus::DisconnectedTimeout));
        drop(conn);

        let mut no_response = 0;
        let mut timed_out = Vec::new();
        while let Some(event) = rx.recv().await {
            assert_eq!(event.generation(), 3);
            match event {
                SourceEvent::NoResponse { .. } => no_response += 1,
                SourceEvent::TimedOut { elapsed, .. } => timed_out.push(elapsed),
                other => panic!("unexpected event: {other:?}"),
            }
        }

        assert_eq!(timed_out.len(), 1, "exactly one timeout event");
        assert!(timed_out[0] > DEFAULT_FAILURE_TIMEOUT);
        assert!(no_response > 1, "retried before giving up");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_backoff_stops() {
        let (tx, mut rx) = mpsc::channel(16);
        let conn = std::sync::Arc::new(SourceConnection::new(unreachable_config(), tx));

        let runner = conn.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        // First failure reported, task now sleeping in backoff
        let first = rx.recv().await.unwrap();
        assert!(matches!(first, SourceEvent::NoResponse { .. }));
        assert_eq!(conn.status(), Some(SourceStatus::NoResponse));

        conn.shutdown();
        let exit = handle.await.unwrap();
        assert_eq!(exit, SourceExit::Cancelled);
        assert_eq!(conn.state(), ConnectionState::Stopped);
    }

    #[tokio::test]
    async fn test_shutdown_before_run_returns_immediately() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = SourceConnection::new(unreachable_config(), tx);
        conn.shutdown();
        assert!(conn.is_shutdown());
        assert_eq!(conn.run().await, SourceExit::Cancelled);
    }
}
