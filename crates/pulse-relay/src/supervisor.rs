//! Source supervisor.
//!
//! Owns the set of running source connections and implements the control
//! operations on top of it. Reconfiguration cancels every running source,
//! starts a new roster generation, and spawns one task per binding.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pulse_core::{SourceBinding, Tag};
use pulse_dashboard::{Broadcaster, RelayControl, StatusReport};
use pulse_feed::RollingStatsStore;
use pulse_telemetry::Metrics;
use pulse_ws::{SourceConfig, SourceConnection, SourceEvent, SourceExit};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Connection policy applied to every source.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorSettings {
    pub retry_interval: Duration,
    pub failure_timeout: Duration,
    pub accept_invalid_certs: bool,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            retry_interval: pulse_ws::DEFAULT_RETRY_INTERVAL,
            failure_timeout: pulse_ws::DEFAULT_FAILURE_TIMEOUT,
            accept_invalid_certs: true,
        }
    }
}

struct ActiveSource {
    connection: Arc<SourceConnection>,
    handle: JoinHandle<SourceExit>,
}

/// Supervises the upstream source tasks.
pub struct SourceSupervisor {
    settings: SupervisorSettings,
    stats: Arc<RollingStatsStore>,
    broadcaster: Arc<Broadcaster>,
    event_tx: mpsc::Sender<SourceEvent>,
    sources: Mutex<Vec<ActiveSource>>,
}

impl SourceSupervisor {
    pub fn new(
        settings: SupervisorSettings,
        stats: Arc<RollingStatsStore>,
        broadcaster: Arc<Broadcaster>,
        event_tx: mpsc::Sender<SourceEvent>,
    ) -> Self {
        Self {
            settings,
            stats,
            broadcaster,
            event_tx,
            sources: Mutex::new(Vec::new()),
        }
    }

    /// Connections of the current configuration.
    pub fn connections(&self) -> Vec<Arc<SourceConnection>> {
        self.sources
            .lock()
            .iter()
            .map(|s| Arc::clone(&s.connection))
            .collect()
    }

    /// Cancel every source and wait up to `grace` for the tasks to finish.
    pub async fn shutdown(&self, grace: Duration) {
        let sources: Vec<ActiveSource> = std::mem::take(&mut *self.sources.lock());
        for source in &sources {
            source.connection.shutdown();
        }
        for source in sources {
            let team = source.connection.team();
            match tokio::time::timeout(grace, source.handle).await {
                Ok(Ok(exit)) => debug!(%team, ?exit, "Source task finished"),
                Ok(Err(e)) => warn!(%team, error = %e, "Source task failed"),
                Err(_) => warn!(%team, "Source task did not stop within grace period"),
            }
        }
    }

    /// Cancel the running sources and start a new roster generation.
    fn teardown(&self, sources: &mut Vec<ActiveSource>) -> u64 {
        for source in sources.drain(..) {
            source.connection.shutdown();
            Metrics::source_status_clear(source.connection.team());
            // The task closes its socket at its next suspension point
            drop(source.handle);
        }
        self.broadcaster.clear_rosters()
    }

    fn spawn_source(&self, binding: SourceBinding, generation: u64) -> ActiveSource {
        let config = SourceConfig {
            binding,
            retry_interval: self.settings.retry_interval,
            failure_timeout: self.settings.failure_timeout,
            accept_invalid_certs: self.settings.accept_invalid_certs,
            generation,
        };
        let connection = Arc::new(SourceConnection::new(config, self.event_tx.clone()));

        let runner = Arc::clone(&connection);
        let handle = tokio::spawn(async move {
            let exit = runner.run().await;
            info!(team = %runner.team(), url = %runner.url(), ?exit, "Source task exited");
            exit
        });

        ActiveSource { connection, handle }
    }
}

impl RelayControl for SourceSupervisor {
    fn configure_sources(&self, bindings: Vec<SourceBinding>) -> usize {
        let mut sources = self.sources.lock();
        let generation = self.teardown(&mut sources);

        for binding in bindings {
            info!(team = %binding.team, url = %binding.url, generation, "Starting source");
            let source = self.spawn_source(binding, generation);
            sources.push(source);
        }

        info!(count = sources.len(), generation, "Sources configured");
        sources.len()
    }

    fn disconnect_all(&self) {
        let generation = self.teardown(&mut self.sources.lock());
        self.stats.clear();
        info!(generation, "All sources disconnected, rolling maxima cleared");
    }

    fn reset_all_maxima(&self) {
        self.stats.clear();
        info!("Rolling maxima reset");
    }

    fn reset_maxima_for_tag(&self, tag: Tag) {
        self.stats.reset_tag(tag);
        info!(%tag, "Rolling maxima reset for tag");
    }

    fn status(&self) -> StatusReport {
        let mut report = StatusReport::default();
        for source in self.sources.lock().iter() {
            let connection = &source.connection;
            report.bindings.push(connection.binding().clone());
            if let Some(status) = connection.status() {
                report.status.insert(connection.url().to_string(), status);
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::{PlayerRecord, Team, TeamRoster};
    use pulse_dashboard::SubscriberRegistry;
    use pulse_feed::StatsThresholds;

    struct Fixture {
        supervisor: SourceSupervisor,
        stats: Arc<RollingStatsStore>,
        broadcaster: Arc<Broadcaster>,
        _events: mpsc::Receiver<SourceEvent>,
    }

    fn fixture() -> Fixture {
        let stats = Arc::new(RollingStatsStore::new(StatsThresholds::default()));
        let broadcaster = Arc::new(Broadcaster::new(Arc::new(SubscriberRegistry::new(4))));
        let (tx, rx) = mpsc::channel(64);
        let supervisor = SourceSupervisor::new(
            SupervisorSettings::default(),
            Arc::clone(&stats),
            Arc::clone(&broadcaster),
            tx,
        );
        Fixture {
            supervisor,
            stats,
            broadcaster,
            _events: rx,
        }
    }

    fn bindings() -> Vec<SourceBinding> {
        vec![
            SourceBinding::new("ws://127.0.0.1:1/a", Team::Team1).unwrap(),
            SourceBinding::new("ws://127.0.0.1:1/b", Team::Team2).unwrap(),
        ]
    }

    fn roster(team: Team) -> TeamRoster {
        let player: PlayerRecord = serde_json::from_value(serde_json::json!({
            "tag": 1, "team_name": "Home", "jersey": null, "first_name": null,
            "last_name": null, "distance_m": 0, "distance_km": 0.0, "hir": 0.0,
            "hr": 0, "max_hr": 0, "max_speed_60_s": 0.0, "max_speed_120_s": 0.0,
            "max_speed_180_s": 0.0, "max_speed": 0.0, "load": 0.0
        }))
        .unwrap();
        TeamRoster::new(team, vec![player])
    }

    #[tokio::test]
    async fn test_configure_starts_one_task_per_binding() {
        let f = fixture();
        assert_eq!(f.supervisor.configure_sources(bindings()), 2);

        let report = f.supervisor.status();
        assert_eq!(report.bindings.len(), 2);
        assert_eq!(report.bindings[0].team, Team::Team1);
        assert_eq!(f.broadcaster.generation(), 1);
    }

    #[tokio::test]
    async fn test_reconfigure_cancels_superseded_sources() {
        let f = fixture();
        f.supervisor.configure_sources(bindings());
        let old = f.supervisor.connections();
        f.broadcaster.update_roster(1, roster(Team::Team1));
        f.stats.update_speed(Tag::new(1), 20.0);

        let single = vec![SourceBinding::new("ws://127.0.0.1:1/c", Team::Team1).unwrap()];
        assert_eq!(f.supervisor.configure_sources(single), 1);

        assert!(old.iter().all(|c| c.is_shutdown()));
        assert_eq!(f.supervisor.connections().len(), 1);
        assert_eq!(f.supervisor.connections()[0].generation(), 2);
        assert!(f.broadcaster.snapshot().is_none());
        // Reconfiguration leaves statistics alone
        assert_eq!(f.stats.max_speed(Tag::new(1)), Some(20.0));
    }

    #[tokio::test]
    async fn test_disconnect_all_clears_everything() {
        let f = fixture();
        f.supervisor.configure_sources(bindings());
        f.stats.update_speed(Tag::new(1), 20.0);

        f.supervisor.disconnect_all();

        let report = f.supervisor.status();
        assert!(report.bindings.is_empty());
        assert!(report.status.is_empty());
        assert!(f.stats.is_empty());
        assert!(f.supervisor.connections().is_empty());
    }

    #[tokio::test]
    async fn test_resets_touch_only_statistics() {
        let f = fixture();
        f.supervisor.configure_sources(bindings());
        f.stats.update_speed(Tag::new(1), 20.0);
        f.stats.update_speed(Tag::new(2), 25.0);

        f.supervisor.reset_maxima_for_tag(Tag::new(1));
        assert!(f.stats.max_speed(Tag::new(1)).is_none());
        assert_eq!(f.stats.max_speed(Tag::new(2)), Some(25.0));

        f.supervisor.reset_all_maxima();
        assert!(f.stats.is_empty());
        assert_eq!(f.supervisor.status().bindings.len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_stops_tasks() {
        let f = fixture();
        f.supervisor.configure_sources(bindings());
        let connections = f.supervisor.connections();

        f.supervisor.shutdown(Duration::from_secs(5)).await;
        assert!(connections.iter().all(|c| c.is_shutdown()));
        assert!(f.supervisor.connections().is_empty());
    }
}
