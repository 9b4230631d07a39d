//! Wire protocol shared by the client engine and the relay server.
//!
//! Every frame is a JSON text message tagged by its event name:
//! ```json
//! { "type": "join-room", "roomId": "r1", "user": { "id": "u1", "name": "Ada" } }
//! { "type": "drawing-update", "roomId": "r1", "elements": [], "appState": {}, "timestamp": 1700000000000 }
//! { "type": "pointer-update", "roomId": "r1", "pointer": { "x": 10, "y": 20 }, "user": { ... } }
//! ```

use crate::scene::{DrawingElement, ViewState};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Identity of a participant, as handed over by the authentication flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Avatar reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

impl UserInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: None,
            picture: None,
        }
    }
}

/// Pointer position in logical (scene) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointerPosition {
    pub x: f64,
    pub y: f64,
}

/// Messages sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    JoinRoom {
        room_id: String,
        user: UserInfo,
    },
    LeaveRoom {
        room_id: String,
    },
    /// Full scene snapshot, never a diff.
    DrawingUpdate {
        room_id: String,
        elements: Vec<DrawingElement>,
        app_state: ViewState,
        timestamp: u64,
    },
    PointerUpdate {
        room_id: String,
        pointer: PointerPosition,
        user: UserInfo,
    },
    ChatMessage {
        room_id: String,
        message: String,
        user: UserInfo,
    },
    Typing {
        room_id: String,
        user: UserInfo,
        is_typing: bool,
    },
}

impl ClientMessage {
    /// Event name as it appears in the `type` tag.
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::JoinRoom { .. } => "join-room",
            ClientMessage::LeaveRoom { .. } => "leave-room",
            ClientMessage::DrawingUpdate { .. } => "drawing-update",
            ClientMessage::PointerUpdate { .. } => "pointer-update",
            ClientMessage::ChatMessage { .. } => "chat-message",
            ClientMessage::Typing { .. } => "typing",
        }
    }

    pub fn room_id(&self) -> &str {
        match self {
            ClientMessage::JoinRoom { room_id, .. }
            | ClientMessage::LeaveRoom { room_id }
            | ClientMessage::DrawingUpdate { room_id, .. }
            | ClientMessage::PointerUpdate { room_id, .. }
            | ClientMessage::ChatMessage { room_id, .. }
            | ClientMessage::Typing { room_id, .. } => room_id,
        }
    }
}

/// Messages received from the server.
///
/// Scene payloads default to empty when fields are missing, null or mistyped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Authoritative full snapshot, sent on join.
    RoomState {
        #[serde(default, deserialize_with = "lenient_elements")]
        elements: Vec<DrawingElement>,
        #[serde(default)]
        app_state: ViewState,
        #[serde(default)]
        is_initial_load: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
    /// A peer's full snapshot.
    DrawingUpdate {
        #[serde(default, deserialize_with = "lenient_elements")]
        elements: Vec<DrawingElement>,
        #[serde(default)]
        app_state: ViewState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
    UserJoined {
        user: UserInfo,
        user_id: String,
    },
    UserLeft {
        user_id: String,
    },
    UserCount {
        count: usize,
    },
    PointerUpdate {
        user_id: String,
        pointer: PointerPosition,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user: Option<UserInfo>,
    },
    ChatMessage {
        message: String,
        user: UserInfo,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
    UserTyping {
        user_name: String,
        is_typing: bool,
    },
    Error {
        message: String,
    },
}

fn lenient_elements<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<DrawingElement>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items.into_iter().map(DrawingElement::new).collect(),
        Value::Null => Vec::new(),
        _ => {
            log::warn!("Malformed elements payload, using an empty scene");
            Vec::new()
        }
    })
}

/// Encode a client message as a JSON text frame.
pub fn encode(msg: &ClientMessage) -> serde_json::Result<String> {
    serde_json::to_string(msg)
}

/// Decode a server text frame.
pub fn decode(text: &str) -> serde_json::Result<ServerMessage> {
    serde_json::from_str(text)
}

/// Decode a client text frame (server side).
pub fn decode_client(text: &str) -> serde_json::Result<ClientMessage> {
    serde_json::from_str(text)
}
