//! Inbound scene updates: ordering checks and the local snapshot cache.

use std::collections::HashMap;

use crate::scene::{DrawingElement, Origin, SceneSnapshot, ViewState};

/// A scene received from the server, before any checks.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteScene {
    pub elements: Vec<DrawingElement>,
    pub view_state: ViewState,
    pub timestamp: Option<u64>,
    pub origin: Origin,
}

/// What to do with a received scene.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundDecision {
    /// Replace the canvas with this snapshot.
    Apply(SceneSnapshot),
    /// Older than (or as old as) what was already applied.
    Stale { timestamp: u64, last_applied: u64 },
    /// Room state older than a scene this client has since published.
    Superseded { timestamp: u64, published: u64 },
    /// Repeated room-state delivery.
    Duplicate,
    /// No room is active.
    Ignored,
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InboundStats {
    pub applied: u64,
    pub stale: u64,
    pub superseded: u64,
    pub duplicates: u64,
    pub ignored: u64,
}

/// Decides which remote snapshots replace the local mirror.
///
/// Ordering is last-writer-wins on the sender's timestamp, tracked per room
/// over applied snapshots only. Local publishes are tracked apart from that and
/// only screen room state: a timed room-state older than this client's last
/// published scene predates it on the server and would undo it.
/// Every applied snapshot is cached so the canvas can be restored without a
/// round trip to the server.
#[derive(Debug)]
pub struct InboundReconciler {
    room_state_debounce_ms: u64,
    last_applied: HashMap<String, u64>,
    last_published: HashMap<String, u64>,
    last_room_state_at: Option<u64>,
    cache: HashMap<String, SceneSnapshot>,
    stats: InboundStats,
}

impl InboundReconciler {
    pub fn new(room_state_debounce_ms: u64) -> Self {
        Self {
            room_state_debounce_ms,
            last_applied: HashMap::new(),
            last_published: HashMap::new(),
            last_room_state_at: None,
            cache: HashMap::new(),
            stats: InboundStats::default(),
        }
    }

    pub fn stats(&self) -> InboundStats {
        self.stats
    }

    /// Timestamp of the last snapshot applied in `room_id`.
    pub fn last_applied(&self, room_id: &str) -> Option<u64> {
        self.last_applied.get(room_id).copied()
    }

    /// Last snapshot applied in `room_id`.
    pub fn cached(&self, room_id: &str) -> Option<&SceneSnapshot> {
        self.cache.get(room_id)
    }

    /// Check a remote scene against the ordering state of `room_id`.
    pub fn receive(&mut self, room_id: Option<&str>, scene: RemoteScene, now: u64) -> InboundDecision {
        let Some(room_id) = room_id else {
            log::debug!("Ignoring remote scene: not in a room");
            self.stats.ignored += 1;
            return InboundDecision::Ignored;
        };

        let is_room_state = matches!(scene.origin, Origin::RoomState { .. });
        let timestamp = match (scene.timestamp, is_room_state) {
            (Some(ts), _) => Some(ts),
            // Peer updates without a timestamp are ordered by arrival
            (None, false) => Some(now),
            (None, true) => None,
        };

        match timestamp {
            Some(ts) => {
                if is_room_state {
                    if let Some(published) = self.last_published.get(room_id).copied() {
                        if ts < published {
                            log::debug!(
                                "Discarding room-state in {} older than our last publish ({} < {})",
                                room_id,
                                ts,
                                published
                            );
                            self.stats.superseded += 1;
                            return InboundDecision::Superseded {
                                timestamp: ts,
                                published,
                            };
                        }
                    }
                }
                if let Some(last) = self.last_applied(room_id) {
                    if ts <= last {
                        log::debug!(
                            "Discarding stale update in {} (timestamp {} <= {})",
                            room_id,
                            ts,
                            last
                        );
                        self.stats.stale += 1;
                        return InboundDecision::Stale {
                            timestamp: ts,
                            last_applied: last,
                        };
                    }
                }
                self.last_applied.insert(room_id.to_string(), ts);
            }
            None => {
                if let Some(prev) = self.last_room_state_at {
                    if now.saturating_sub(prev) < self.room_state_debounce_ms {
                        log::debug!("Dropping duplicate room-state for {}", room_id);
                        self.stats.duplicates += 1;
                        return InboundDecision::Duplicate;
                    }
                }
            }
        }
        if is_room_state {
            self.last_room_state_at = Some(now);
        }

        let snapshot = SceneSnapshot {
            elements: scene.elements,
            view_state: scene.view_state,
            timestamp: timestamp.unwrap_or(now),
            origin: scene.origin,
        };
        log::debug!(
            "Applying {} elements in {} ({:?}, timestamp {})",
            snapshot.elements.len(),
            room_id,
            snapshot.origin,
            snapshot.timestamp
        );
        self.cache.insert(room_id.to_string(), snapshot.clone());
        self.stats.applied += 1;
        InboundDecision::Apply(snapshot)
    }

    /// A local snapshot stamped `timestamp` was published in `room_id`.
    ///
    /// Peer updates are unaffected; only older room state is screened out.
    pub fn note_published(&mut self, room_id: &str, timestamp: u64) {
        let last = self.last_published.entry(room_id.to_string()).or_insert(0);
        *last = (*last).max(timestamp);
    }

    /// Start `room_id` from a clean ordering baseline (explicit join).
    pub fn reset_room(&mut self, room_id: &str) {
        self.last_applied.remove(room_id);
        self.last_published.remove(room_id);
        self.last_room_state_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::element;

    fn peer(ts: Option<u64>, n: usize) -> RemoteScene {
        RemoteScene {
            elements: (0..n).map(|i| element(&format!("e{i}"), 1)).collect(),
            view_state: ViewState::default(),
            timestamp: ts,
            origin: Origin::Peer,
        }
    }

    fn room_state(ts: Option<u64>) -> RemoteScene {
        RemoteScene {
            origin: Origin::RoomState { initial_load: true },
            ..peer(ts, 2)
        }
    }

    #[test]
    fn test_out_of_order_timestamps() {
        let mut inbound = InboundReconciler::new(100);
        let applied: Vec<u64> = [5u64, 3, 8, 8, 7]
            .iter()
            .filter_map(|ts| match inbound.receive(Some("r1"), peer(Some(*ts), 1), 1000) {
                InboundDecision::Apply(s) => Some(s.timestamp),
                _ => None,
            })
            .collect();
        assert_eq!(applied, vec![5, 8]);
        assert_eq!(inbound.stats().stale, 3);
        assert_eq!(inbound.last_applied("r1"), Some(8));
    }

    #[test]
    fn test_ordering_is_per_room() {
        let mut inbound = InboundReconciler::new(100);
        assert!(matches!(inbound.receive(Some("r1"), peer(Some(50), 1), 0), InboundDecision::Apply(_)));
        assert!(matches!(inbound.receive(Some("r2"), peer(Some(10), 1), 0), InboundDecision::Apply(_)));
    }

    #[test]
    fn test_missing_timestamp_stamped_on_arrival() {
        let mut inbound = InboundReconciler::new(100);
        match inbound.receive(Some("r1"), peer(None, 1), 700) {
            InboundDecision::Apply(s) => assert_eq!(s.timestamp, 700),
            other => panic!("expected apply, got {:?}", other),
        }
        assert!(matches!(
            inbound.receive(Some("r1"), peer(Some(650), 1), 710),
            InboundDecision::Stale { timestamp: 650, last_applied: 700 }
        ));
    }

    #[test]
    fn test_untimed_room_state_applies_but_debounced() {
        let mut inbound = InboundReconciler::new(100);
        inbound.receive(Some("r1"), peer(Some(5000), 1), 1000);
        assert!(matches!(inbound.receive(Some("r1"), room_state(None), 1000), InboundDecision::Apply(_)));
        assert_eq!(inbound.receive(Some("r1"), room_state(None), 1050), InboundDecision::Duplicate);
        assert!(matches!(inbound.receive(Some("r1"), room_state(None), 1200), InboundDecision::Apply(_)));
        // Untimed room-state does not move the ordering baseline
        assert_eq!(inbound.last_applied("r1"), Some(5000));
    }

    #[test]
    fn test_timed_room_state_uses_ordering() {
        let mut inbound = InboundReconciler::new(100);
        assert!(matches!(inbound.receive(Some("r1"), room_state(Some(100)), 0), InboundDecision::Apply(_)));
        assert!(matches!(inbound.receive(Some("r1"), room_state(Some(100)), 500), InboundDecision::Stale { .. }));
    }

    #[test]
    fn test_local_publish_does_not_hide_newer_peer_updates() {
        let mut inbound = InboundReconciler::new(100);
        assert!(matches!(inbound.receive(Some("r1"), peer(Some(50), 1), 0), InboundDecision::Apply(_)));
        inbound.note_published("r1", 100);
        // Peer clock runs behind ours, but 80 is still newer than anything applied
        match inbound.receive(Some("r1"), peer(Some(80), 2), 10) {
            InboundDecision::Apply(s) => assert_eq!(s.timestamp, 80),
            other => panic!("expected apply, got {:?}", other),
        }
        assert_eq!(inbound.last_applied("r1"), Some(80));
        assert!(matches!(
            inbound.receive(Some("r1"), peer(Some(60), 1), 20),
            InboundDecision::Stale { timestamp: 60, last_applied: 80 }
        ));
    }

    #[test]
    fn test_room_state_older_than_publish_is_superseded() {
        let mut inbound = InboundReconciler::new(100);
        inbound.receive(Some("r1"), peer(Some(100), 1), 0);
        inbound.note_published("r1", 6000);
        inbound.note_published("r1", 50);
        // Server state replayed on rejoin predates the offline edit
        assert_eq!(
            inbound.receive(Some("r1"), room_state(Some(200)), 6100),
            InboundDecision::Superseded { timestamp: 200, published: 6000 }
        );
        assert_eq!(inbound.stats().superseded, 1);
        assert_eq!(inbound.last_applied("r1"), Some(100));

        // Room state that already holds the published scene applies
        assert!(matches!(inbound.receive(Some("r1"), room_state(Some(6000)), 6200), InboundDecision::Apply(_)));

        // A fresh join starts over
        inbound.reset_room("r1");
        assert!(matches!(inbound.receive(Some("r1"), room_state(Some(10)), 7000), InboundDecision::Apply(_)));
    }

    #[test]
    fn test_ignored_without_room() {
        let mut inbound = InboundReconciler::new(100);
        assert_eq!(inbound.receive(None, peer(Some(1), 1), 0), InboundDecision::Ignored);
        assert_eq!(inbound.stats().ignored, 1);
    }

    #[test]
    fn test_cache_and_reset() {
        let mut inbound = InboundReconciler::new(100);
        inbound.receive(Some("r1"), peer(Some(10), 3), 0);
        assert_eq!(inbound.cached("r1").map(|s| s.elements.len()), Some(3));
        assert!(inbound.cached("r2").is_none());

        inbound.reset_room("r1");
        assert!(matches!(inbound.receive(Some("r1"), peer(Some(2), 1), 0), InboundDecision::Apply(_)));
        assert_eq!(inbound.cached("r1").map(|s| s.elements.len()), Some(1));
    }
}
