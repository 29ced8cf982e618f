//! Roster merge and fan-out.
//!
//! Holds the latest roster of each team in registration order and pushes
//! merged snapshots and source status events to every subscriber.
//!
//! Rosters are tagged with the configuration generation that produced them.
//! Clearing starts a new generation, and updates from an older one are
//! refused, so a superseded source can not repopulate a cleared roster.

use std::sync::Arc;

use parking_lot::RwLock;
use pulse_core::{PlayerRecord, RelayMessage, Team, TeamRoster};
use pulse_telemetry::Metrics;
use tracing::{debug, trace, warn};

use crate::registry::{Delivery, SubscriberId, SubscriberRegistry};

#[derive(Default)]
struct Rosters {
    generation: u64,
    /// Latest roster per team, in the order teams first reported.
    teams: Vec<TeamRoster>,
}

/// Fan-out broadcaster.
pub struct Broadcaster {
    registry: Arc<SubscriberRegistry>,
    rosters: RwLock<Rosters>,
}

impl Broadcaster {
    pub fn new(registry: Arc<SubscriberRegistry>) -> Self {
        Self {
            registry,
            rosters: RwLock::new(Rosters::default()),
        }
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    /// Serialize and send to every subscriber. Failing subscribers are dropped.
    pub fn broadcast(&self, message: &RelayMessage) -> Delivery {
        let payload: Arc<str> = match serde_json::to_string(message) {
            Ok(json) => Arc::from(json),
            Err(e) => {
                warn!(error = %e, kind = message.kind(), "Failed to serialize broadcast");
                return Delivery::default();
            }
        };

        let delivery = self.registry.broadcast(payload);
        Metrics::broadcast(message.kind());
        if delivery.dropped > 0 {
            Metrics::broadcast_drops(delivery.dropped);
            Metrics::subscribers(self.registry.len());
        }
        trace!(
            kind = message.kind(),
            delivered = delivery.delivered,
            dropped = delivery.dropped,
            "Broadcast sent"
        );
        delivery
    }

    /// Current configuration generation.
    pub fn generation(&self) -> u64 {
        self.rosters.read().generation
    }

    /// Replace a team's roster; a team seen for the first time goes last.
    ///
    /// Returns false, changing nothing, when `generation` is not current.
    pub fn update_roster(&self, generation: u64, roster: TeamRoster) -> bool {
        let mut rosters = self.rosters.write();
        if rosters.generation != generation {
            debug!(
                team = %roster.team,
                generation,
                current = rosters.generation,
                "Dropping roster from superseded generation"
            );
            return false;
        }
        match rosters.teams.iter_mut().find(|r| r.team == roster.team) {
            Some(slot) => *slot = roster,
            None => rosters.teams.push(roster),
        }
        true
    }

    /// Drop every team's roster and start a new generation, which is returned.
    pub fn clear_rosters(&self) -> u64 {
        let mut rosters = self.rosters.write();
        rosters.teams.clear();
        rosters.generation += 1;
        debug!(generation = rosters.generation, "Rosters cleared");
        rosters.generation
    }

    pub fn roster(&self, team: Team) -> Option<TeamRoster> {
        self.rosters
            .read()
            .teams
            .iter()
            .find(|r| r.team == team)
            .cloned()
    }

    /// All players across teams, concatenated in roster order.
    pub fn merged_players(&self) -> Vec<PlayerRecord> {
        self.rosters
            .read()
            .teams
            .iter()
            .flat_map(|r| r.players.iter().cloned())
            .collect()
    }

    /// Current merged snapshot, or `None` before any team has reported.
    pub fn snapshot(&self) -> Option<RelayMessage> {
        if self.rosters.read().teams.is_empty() {
            return None;
        }
        Some(RelayMessage::snapshot(self.merged_players()))
    }

    /// Broadcast the merged roster of every team.
    pub fn merge_and_broadcast(&self) -> Delivery {
        let message = RelayMessage::snapshot(self.merged_players());
        self.broadcast(&message)
    }

    /// Queue the current snapshot for one subscriber, if there is one.
    pub fn send_snapshot_to(&self, id: SubscriberId) -> bool {
        let Some(message) = self.snapshot() else {
            return false;
        };
        match serde_json::to_string(&message) {
            Ok(json) => self.registry.send_to(id, Arc::from(json)),
            Err(e) => {
                warn!(error = %e, "Failed to serialize snapshot");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::Tag;

    fn player(tag: i64, team_name: &str) -> PlayerRecord {
        PlayerRecord {
            tag: Tag::new(tag),
            team_name: team_name.to_string(),
            jersey: None,
            first_name: None,
            last_name: None,
            distance_m: 0,
            distance_km: 0.0,
            hir: 0.0,
            hr: 0,
            max_hr: 0,
            max_speed_60_s: 0.0,
            max_speed_120_s: 0.0,
            max_speed_180_s: 0.0,
            max_speed: 0.0,
            load: 0.0,
        }
    }

    fn broadcaster() -> Broadcaster {
        Broadcaster::new(Arc::new(SubscriberRegistry::new(8)))
    }

    fn tags(players: &[PlayerRecord]) -> Vec<i64> {
        players.iter().map(|p| p.tag.value()).collect()
    }

    #[test]
    fn test_merge_keeps_registration_order() {
        let b = broadcaster();
        b.update_roster(0, TeamRoster::new(Team::Team2, vec![player(20, "Away")]));
        b.update_roster(0, TeamRoster::new(Team::Team1, vec![player(1, "Home"), player(2, "Home")]));
        assert_eq!(tags(&b.merged_players()), vec![20, 1, 2]);

        // Replacing a roster keeps its slot
        b.update_roster(0, TeamRoster::new(Team::Team2, vec![player(21, "Away")]));
        assert_eq!(tags(&b.merged_players()), vec![21, 1, 2]);
    }

    #[test]
    fn test_snapshot_absent_until_first_roster() {
        let b = broadcaster();
        assert!(b.snapshot().is_none());

        b.update_roster(0, TeamRoster::new(Team::Team1, vec![player(1, "Home")]));
        assert!(matches!(b.snapshot(), Some(RelayMessage::Success { ref players, .. }) if players.len() == 1));

        b.clear_rosters();
        assert!(b.snapshot().is_none());
        assert!(b.roster(Team::Team1).is_none());
    }

    #[test]
    fn test_stale_generation_cannot_repopulate() {
        let b = broadcaster();
        assert_eq!(b.generation(), 0);
        assert!(b.update_roster(0, TeamRoster::new(Team::Team1, vec![player(1, "Home")])));

        let next = b.clear_rosters();
        assert_eq!(next, 1);
        assert!(!b.update_roster(0, TeamRoster::new(Team::Team1, vec![player(1, "Home")])));
        assert!(b.snapshot().is_none());

        assert!(b.update_roster(next, TeamRoster::new(Team::Team2, vec![player(9, "Away")])));
        assert_eq!(tags(&b.merged_players()), vec![9]);
    }

    #[tokio::test]
    async fn test_merge_and_broadcast_payload() {
        let b = broadcaster();
        let (_id, mut rx) = b.registry().register();
        b.update_roster(0, TeamRoster::new(Team::Team1, vec![player(7, "Home")]));

        let delivery = b.merge_and_broadcast();
        assert_eq!(delivery.delivered, 1);

        let payload = rx.recv().await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["players"][0]["tag"], 7);
    }

    #[tokio::test]
    async fn test_status_broadcast_drops_dead_subscriber() {
        let b = broadcaster();
        let (_dead, rx_dead) = b.registry().register();
        let (_live, mut rx_live) = b.registry().register();
        drop(rx_dead);

        let delivery = b.broadcast(&RelayMessage::no_response(Team::Team2));
        assert_eq!(delivery, Delivery { delivered: 1, dropped: 1 });
        assert_eq!(b.subscriber_count(), 1);

        let json: serde_json::Value = serde_json::from_str(&rx_live.recv().await.unwrap()).unwrap();
        assert_eq!(json["status"], "no_response");
        assert_eq!(json["team"], "team2");
    }

    #[tokio::test]
    async fn test_send_snapshot_to_single_subscriber() {
        let b = broadcaster();
        let (id, mut rx) = b.registry().register();
        assert!(!b.send_snapshot_to(id));

        b.update_roster(0, TeamRoster::new(Team::Team1, vec![player(3, "Home")]));
        assert!(b.send_snapshot_to(id));
        assert!(rx.recv().await.unwrap().contains("\"tag\":3"));
    }
}
