//! Room registry: members, latest scene and the per-room broadcast channel.

use dashmap::DashMap;
use sketchsync_core::{DrawingElement, ServerMessage, UserInfo, ViewState};
use std::collections::HashMap;
use tokio::sync::broadcast;

/// Capacity of each room's broadcast channel.
pub const CHANNEL_CAPACITY: usize = 256;

/// A message fanned out to a room.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Sending connection, skipped on delivery. `None` reaches everyone.
    pub from: Option<String>,
    pub msg: ServerMessage,
}

impl Envelope {
    pub fn is_for(&self, conn_id: &str) -> bool {
        self.from.as_deref() != Some(conn_id)
    }
}

/// Latest scene of a room, replayed to joiners.
#[derive(Debug, Clone)]
struct StoredScene {
    elements: Vec<DrawingElement>,
    app_state: ViewState,
    timestamp: u64,
}

struct Room {
    tx: broadcast::Sender<Envelope>,
    /// Connection id -> user.
    members: HashMap<String, UserInfo>,
    latest: Option<StoredScene>,
}

impl Room {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            members: HashMap::new(),
            latest: None,
        }
    }

    fn room_state(&self) -> ServerMessage {
        match &self.latest {
            Some(scene) => ServerMessage::RoomState {
                elements: scene.elements.clone(),
                app_state: scene.app_state.clone(),
                is_initial_load: true,
                timestamp: Some(scene.timestamp),
            },
            None => ServerMessage::RoomState {
                elements: Vec::new(),
                app_state: ViewState::default(),
                is_initial_load: true,
                timestamp: None,
            },
        }
    }

    fn send(&self, from: Option<&str>, msg: ServerMessage) {
        // No receivers is not an error
        let _ = self.tx.send(Envelope {
            from: from.map(str::to_owned),
            msg,
        });
    }
}

/// Result of joining a room.
pub struct Joined {
    pub rx: broadcast::Receiver<Envelope>,
    /// Snapshot to send to the joiner.
    pub room_state: ServerMessage,
    pub count: usize,
}

/// All active rooms.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<String, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a room and announce it.
    pub fn join(&self, room_id: &str, conn_id: &str, user: &UserInfo) -> Joined {
        let mut room = self.rooms.entry(room_id.to_string()).or_insert_with(Room::new);
        room.members.insert(conn_id.to_string(), user.clone());
        let rx = room.tx.subscribe();
        let count = room.members.len();

        room.send(
            Some(conn_id),
            ServerMessage::UserJoined {
                user: user.clone(),
                user_id: user.id.clone(),
            },
        );
        room.send(None, ServerMessage::UserCount { count });

        Joined {
            rx,
            room_state: room.room_state(),
            count,
        }
    }

    /// Remove a connection from a room. Empty rooms are dropped.
    pub fn leave(&self, room_id: &str, conn_id: &str) -> Option<UserInfo> {
        let user = {
            let mut room = self.rooms.get_mut(room_id)?;
            let user = room.members.remove(conn_id)?;
            let count = room.members.len();
            if count > 0 {
                room.send(
                    Some(conn_id),
                    ServerMessage::UserLeft {
                        user_id: user.id.clone(),
                    },
                );
                room.send(None, ServerMessage::UserCount { count });
            }
            user
        };
        self.rooms.remove_if(room_id, |_, room| room.members.is_empty());
        Some(user)
    }

    /// Store a scene unless the room already holds a newer one.
    pub fn store_scene(
        &self,
        room_id: &str,
        elements: Vec<DrawingElement>,
        app_state: ViewState,
        timestamp: u64,
    ) -> bool {
        let Some(mut room) = self.rooms.get_mut(room_id) else {
            return false;
        };
        if matches!(&room.latest, Some(latest) if latest.timestamp > timestamp) {
            return false;
        }
        room.latest = Some(StoredScene {
            elements,
            app_state,
            timestamp,
        });
        true
    }

    /// Send `msg` to every member except `from`.
    pub fn relay(&self, room_id: &str, from: &str, msg: ServerMessage) {
        if let Some(room) = self.rooms.get(room_id) {
            room.send(Some(from), msg);
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn member_count(&self, room_id: &str) -> usize {
        self.rooms
            .get(room_id)
            .map(|room| room.members.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(id: &str) -> UserInfo {
        UserInfo::new(id, id.to_uppercase())
    }

    fn drain(rx: &mut broadcast::Receiver<Envelope>, conn_id: &str) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(env) = rx.try_recv() {
            if env.is_for(conn_id) {
                out.push(env.msg);
            }
        }
        out
    }

    #[tokio::test]
    async fn test_join_announces_and_counts() {
        let registry = RoomRegistry::new();
        let mut a = registry.join("r1", "c1", &user("a"));
        assert_eq!(a.count, 1);
        assert_eq!(drain(&mut a.rx, "c1"), vec![ServerMessage::UserCount { count: 1 }]);

        let mut b = registry.join("r1", "c2", &user("b"));
        assert_eq!(b.count, 2);
        assert_eq!(
            drain(&mut a.rx, "c1"),
            vec![
                ServerMessage::UserJoined { user: user("b"), user_id: "b".into() },
                ServerMessage::UserCount { count: 2 },
            ]
        );
        assert_eq!(drain(&mut b.rx, "c2"), vec![ServerMessage::UserCount { count: 2 }]);
    }

    #[tokio::test]
    async fn test_joiner_gets_latest_scene() {
        let registry = RoomRegistry::new();
        let joined = registry.join("r1", "c1", &user("a"));
        assert!(matches!(joined.room_state, ServerMessage::RoomState { timestamp: None, is_initial_load: true, .. }));

        let elements = vec![DrawingElement::new(json!({"id": "e1", "version": 1}))];
        assert!(registry.store_scene("r1", elements.clone(), ViewState::default(), 100));
        assert!(!registry.store_scene("r1", Vec::new(), ViewState::default(), 90));

        match registry.join("r1", "c2", &user("b")).room_state {
            ServerMessage::RoomState { elements: got, timestamp, .. } => {
                assert_eq!(got, elements);
                assert_eq!(timestamp, Some(100));
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_leave_drops_empty_room() {
        let registry = RoomRegistry::new();
        let mut a = registry.join("r1", "c1", &user("a"));
        registry.join("r1", "c2", &user("b"));
        drain(&mut a.rx, "c1");

        assert_eq!(registry.leave("r1", "c2"), Some(user("b")));
        assert_eq!(
            drain(&mut a.rx, "c1"),
            vec![
                ServerMessage::UserLeft { user_id: "b".into() },
                ServerMessage::UserCount { count: 1 },
            ]
        );
        assert_eq!(registry.leave("r1", "c2"), None);
        registry.leave("r1", "c1");
        assert_eq!(registry.room_count(), 0);
        assert!(!registry.store_scene("r1", Vec::new(), ViewState::default(), 1));
    }

    #[tokio::test]
    async fn test_relay_skips_sender() {
        let registry = RoomRegistry::new();
        let mut a = registry.join("r1", "c1", &user("a"));
        let mut b = registry.join("r1", "c2", &user("b"));
        drain(&mut a.rx, "c1");
        drain(&mut b.rx, "c2");

        registry.relay("r1", "c1", ServerMessage::UserTyping { user_name: "A".into(), is_typing: true });
        assert!(drain(&mut a.rx, "c1").is_empty());
        assert_eq!(drain(&mut b.rx, "c2").len(), 1);
    }
}
