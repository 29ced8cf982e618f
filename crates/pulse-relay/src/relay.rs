//! Relay loop.
//!
//! Single task that consumes source events in arrival order, normalizes
//! frames, updates the team rosters and pushes snapshots and status events
//! to subscribers. Delayed-window timers fire on the same task.

use std::sync::Arc;
use std::time::Duration;

use pulse_core::{RelayMessage, SourceStatus};
use pulse_dashboard::Broadcaster;
use pulse_feed::{FrameNormalizer, NormalizedFrame};
use pulse_telemetry::Metrics;
use pulse_ws::SourceEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

pub struct RelayLoop {
    normalizer: FrameNormalizer,
    broadcaster: Arc<Broadcaster>,
    events: mpsc::Receiver<SourceEvent>,
    failure_timeout: Duration,
}

impl RelayLoop {
    pub fn new(
        normalizer: FrameNormalizer,
        broadcaster: Arc<Broadcaster>,
        events: mpsc::Receiver<SourceEvent>,
        failure_timeout: Duration,
    ) -> Self {
        Self {
            normalizer,
            broadcaster,
            events,
            failure_timeout,
        }
    }

    /// Run until `shutdown` fires or every event sender is gone.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Relay loop started");
        let mut event_count = 0u64;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Relay loop shutdown requested");
                    break;
                }

                event = self.events.recv() => {
                    let Some(event) = event else {
                        info!("Source event channel closed");
                        break;
                    };
                    event_count += 1;
                    self.handle_event(event);
                }

                Some(update) = self.normalizer.next_window_update(), if self.normalizer.has_pending_windows() => {
                    trace!(
                        tag = %update.tag,
                        window = update.window.field_name(),
                        value = update.value,
                        "Delayed window updated"
                    );
                }
            }
        }

        info!(event_count, "Relay loop stopped");
    }

    fn handle_event(&mut self, event: SourceEvent) {
        let current = self.broadcaster.generation();
        if event.generation() != current {
            debug!(
                team = %event.team(),
                generation = event.generation(),
                current,
                "Dropping event from superseded source"
            );
            if matches!(event, SourceEvent::Frame { .. }) {
                Metrics::frame(event.team(), "stale");
            }
            return;
        }

        match event {
            SourceEvent::Connected { team, url, .. } => {
                info!(%team, %url, "Source connected");
                Metrics::source_status(team, SourceStatus::Connected);
            }
            SourceEvent::Frame {
                generation,
                team,
                url,
                text,
            } => self.handle_frame(generation, team, &url, &text),
            SourceEvent::NoResponse {
                team, url, reason, ..
            } => {
                warn!(%team, %url, %reason, "Source not responding");
                Metrics::source_failure(team);
                Metrics::source_status(team, SourceStatus::NoResponse);
                self.broadcaster.broadcast(&RelayMessage::no_response(team));
            }
            SourceEvent::TimedOut {
                team, url, elapsed, ..
            } => {
                warn!(%team, %url, elapsed_secs = elapsed.as_secs(), "Source abandoned after failure timeout");
                Metrics::source_status(team, SourceStatus::DisconnectedTimeout);
                self.broadcaster.broadcast(&RelayMessage::disconnected_timeout(
                    team,
                    self.failure_timeout.as_secs(),
                ));
            }
        }
    }

    fn handle_frame(&mut self, generation: u64, team: pulse_core::Team, url: &str, text: &str) {
        let frame = match self.normalizer.normalize(text, url, team) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(%team, %url, status = e.status(), error = %e, "Frame discarded");
                Metrics::frame(team, e.status());
                return;
            }
        };

        match frame {
            NormalizedFrame::Roster { roster, rejected } => {
                Metrics::outliers_rejected("speed", rejected.speed);
                Metrics::outliers_rejected("hr", rejected.hr);

                if roster.is_empty() {
                    trace!(%team, "Sensor frame without players");
                    Metrics::frame(team, "empty");
                    return;
                }
                if self.broadcaster.update_roster(generation, roster) {
                    let delivery = self.broadcaster.merge_and_broadcast();
                    trace!(%team, delivered = delivery.delivered, "Roster broadcast");
                    Metrics::frame(team, "roster");
                } else {
                    Metrics::frame(team, "stale");
                }
            }
            NormalizedFrame::Passthrough { original, .. } => {
                debug!(%team, %url, frame = %original, "Non-sensor frame");
                Metrics::frame(team, "passthrough");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::Team;
    use pulse_dashboard::SubscriberRegistry;
    use pulse_feed::{DelayedWindows, RollingStatsStore, StatsThresholds};
    use serde_json::{json, Value};

    struct Harness {
        tx: mpsc::Sender<SourceEvent>,
        rx: mpsc::Receiver<Arc<str>>,
        broadcaster: Arc<Broadcaster>,
        stats: Arc<RollingStatsStore>,
        shutdown: CancellationToken,
        handle: tokio::task::JoinHandle<()>,
    }

    fn start() -> Harness {
        let stats = Arc::new(RollingStatsStore::new(StatsThresholds::default()));
        let normalizer = FrameNormalizer::new(Arc::clone(&stats), DelayedWindows::default());
        let broadcaster = Arc::new(Broadcaster::new(Arc::new(SubscriberRegistry::new(16))));
        let (_id, rx) = broadcaster.registry().register();
        let (tx, events) = mpsc::channel(16);
        let shutdown = CancellationToken::new();

        let relay = RelayLoop::new(
            normalizer,
            Arc::clone(&broadcaster),
            events,
            Duration::from_secs(300),
        );
        let handle = tokio::spawn(relay.run(shutdown.clone()));

        Harness {
            tx,
            rx,
            broadcaster,
            stats,
            shutdown,
            handle,
        }
    }

    fn sensor_frame(tag: i64, speed_mps: f64) -> String {
        json!({
            "kind": "sensors",
            "payload": [{
                "tag": tag,
                "team_name": "Home",
                "player_info": {"jersey": 9, "f_name": "Ana", "l_name": "Silva"},
                "online_data": {"max_speed_60_s": speed_mps, "hr": 150.0, "distance": 1234.0}
            }]
        })
        .to_string()
    }

    fn frame_event(generation: u64, team: Team, text: String) -> SourceEvent {
        SourceEvent::Frame {
            generation,
            team,
            url: format!("ws://{team}.example/feed"),
            text,
        }
    }

    async fn next_json(rx: &mut mpsc::Receiver<Arc<str>>) -> Value {
        let payload = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("broadcast expected")
            .expect("registry open");
        serde_json::from_str(&payload).unwrap()
    }

    async fn assert_silent(rx: &mut mpsc::Receiver<Arc<str>>) {
        let result = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(result.is_err(), "unexpected broadcast");
    }

    #[tokio::test]
    async fn test_frame_is_normalized_and_broadcast() {
        let mut h = start();
        h.tx.send(frame_event(0, Team::Team1, sensor_frame(7, 5.0))).await.unwrap();

        let json = next_json(&mut h.rx).await;
        assert_eq!(json["status"], "success");
        assert_eq!(json["players"][0]["tag"], 7);
        assert_eq!(json["players"][0]["max_speed_60_s"], 18.0);
        assert_eq!(json["players"][0]["distance_km"], 1.2);
        assert_eq!(h.stats.max_speed(pulse_core::Tag::new(7)), Some(18.0));

        h.shutdown.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_both_teams_merged_in_arrival_order() {
        let mut h = start();
        h.tx.send(frame_event(0, Team::Team2, sensor_frame(20, 3.0))).await.unwrap();
        next_json(&mut h.rx).await;
        h.tx.send(frame_event(0, Team::Team1, sensor_frame(1, 3.0))).await.unwrap();

        let json = next_json(&mut h.rx).await;
        let tags: Vec<i64> = json["players"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["tag"].as_i64().unwrap())
            .collect();
        assert_eq!(tags, vec![20, 1]);

        h.shutdown.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_superseded_generation_is_ignored() {
        let mut h = start();
        let generation = h.broadcaster.clear_rosters();

        h.tx.send(frame_event(generation - 1, Team::Team1, sensor_frame(7, 5.0))).await.unwrap();
        assert_silent(&mut h.rx).await;
        assert!(h.broadcaster.snapshot().is_none());
        assert!(h.stats.is_empty());

        h.tx.send(frame_event(generation, Team::Team1, sensor_frame(7, 5.0))).await.unwrap();
        assert_eq!(next_json(&mut h.rx).await["players"][0]["tag"], 7);

        h.shutdown.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_frames_are_not_broadcast() {
        let mut h = start();
        h.tx.send(frame_event(0, Team::Team1, "not json".to_string())).await.unwrap();
        h.tx.send(frame_event(0, Team::Team1, r#"{"kind":"status","payload":{}}"#.to_string()))
            .await
            .unwrap();
        h.tx.send(frame_event(0, Team::Team1, r#"{"kind":"sensors","payload":[{"tag":1}]}"#.to_string()))
            .await
            .unwrap();
        // Entries without player info produce no roster
        h.tx.send(frame_event(
            0,
            Team::Team1,
            r#"{"kind":"sensors","payload":[{"tag":1,"player_info":null,"online_data":{}}]}"#.to_string(),
        ))
        .await
        .unwrap();

        assert_silent(&mut h.rx).await;
        assert!(h.broadcaster.snapshot().is_none());

        h.shutdown.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_status_events_are_broadcast() {
        let mut h = start();
        h.tx.send(SourceEvent::NoResponse {
            generation: 0,
            team: Team::Team2,
            url: "ws://b.example".to_string(),
            reason: "refused".to_string(),
        })
        .await
        .unwrap();
        let json = next_json(&mut h.rx).await;
        assert_eq!(json["status"], "no_response");
        assert_eq!(json["team"], "team2");

        h.tx.send(SourceEvent::TimedOut {
            generation: 0,
            team: Team::Team2,
            url: "ws://b.example".to_string(),
            elapsed: Duration::from_secs(301),
        })
        .await
        .unwrap();
        let json = next_json(&mut h.rx).await;
        assert_eq!(json["status"], "disconnected_timeout");
        assert!(json["message"].as_str().unwrap().contains("300"));

        h.shutdown.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_stops_when_senders_are_gone() {
        let h = start();
        drop(h.tx);
        tokio::time::timeout(Duration::from_secs(2), h.handle)
            .await
            .unwrap()
            .unwrap();
    }
}
