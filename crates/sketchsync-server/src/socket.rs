//! Per-connection protocol handling.

use crate::rooms::{Envelope, RoomRegistry};
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use sketchsync_core::protocol::{self, ClientMessage, ServerMessage, UserInfo};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// State of one connected client.
pub struct Peer {
    id: String,
    room: Option<(String, UserInfo)>,
    rx: Option<broadcast::Receiver<Envelope>>,
}

impl Peer {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            room: None,
            rx: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room.as_ref().map(|(room, _)| room.as_str())
    }

    /// Apply a client message. Returns a reply addressed to this peer only.
    pub fn handle(&mut self, registry: &RoomRegistry, msg: ClientMessage) -> Option<ServerMessage> {
        if let ClientMessage::JoinRoom { room_id, user } = msg {
            if self.room_id().is_some_and(|current| current != room_id) {
                self.leave(registry);
            }
            let joined = registry.join(&room_id, &self.id, &user);
            info!("{} ({}) joined room {} ({} members)", user.name, self.id, room_id, joined.count);
            self.rx = Some(joined.rx);
            self.room = Some((room_id, user));
            return Some(joined.room_state);
        }

        // Everything else must target the room this peer is in
        let Some((room_id, user)) = self.room.clone() else {
            debug!("{} sent {} outside a room", self.id, msg.event_name());
            return None;
        };
        if msg.room_id() != room_id {
            warn!("{} sent {} for {} while in {}", self.id, msg.event_name(), msg.room_id(), room_id);
            return None;
        }

        match msg {
            ClientMessage::JoinRoom { .. } => {}
            ClientMessage::LeaveRoom { .. } => self.leave(registry),
            ClientMessage::DrawingUpdate { elements, app_state, timestamp, .. } => {
                if !registry.store_scene(&room_id, elements.clone(), app_state.clone(), timestamp) {
                    debug!("Scene from {} at {} is older than the stored one", self.id, timestamp);
                }
                registry.relay(
                    &room_id,
                    &self.id,
                    ServerMessage::DrawingUpdate {
                        elements,
                        app_state,
                        timestamp: Some(timestamp),
                    },
                );
            }
            ClientMessage::PointerUpdate { pointer, .. } => {
                registry.relay(
                    &room_id,
                    &self.id,
                    ServerMessage::PointerUpdate {
                        user_id: user.id.clone(),
                        pointer,
                        user: Some(user),
                    },
                );
            }
            ClientMessage::ChatMessage { message, user, .. } => {
                registry.relay(
                    &room_id,
                    &self.id,
                    ServerMessage::ChatMessage {
                        message,
                        user,
                        timestamp: Some(now_ms()),
                    },
                );
            }
            ClientMessage::Typing { user, is_typing, .. } => {
                registry.relay(
                    &room_id,
                    &self.id,
                    ServerMessage::UserTyping {
                        user_name: user.name,
                        is_typing,
                    },
                );
            }
        }
        None
    }

    /// Leave the current room, if any.
    pub fn leave(&mut self, registry: &RoomRegistry) {
        if let Some((room_id, user)) = self.room.take() {
            registry.leave(&room_id, &self.id);
            info!(
                "{} ({}) left room {} ({} remaining)",
                user.name,
                self.id,
                room_id,
                registry.member_count(&room_id)
            );
        }
        self.rx = None;
    }

    /// Next broadcast addressed to this peer.
    async fn next_broadcast(&mut self) -> Option<ServerMessage> {
        loop {
            let rx = self.rx.as_mut()?;
            match rx.recv().await {
                Ok(env) if env.is_for(&self.id) => return Some(env.msg),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("{} lagged behind by {} messages", self.id, n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

fn encode(msg: &ServerMessage) -> Option<Message> {
    match serde_json::to_string(msg) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            warn!("Failed to encode server message: {}", e);
            None
        }
    }
}

/// Handle a WebSocket connection
pub async fn handle_socket(socket: WebSocket, registry: Arc<RoomRegistry>) {
    let mut peer = Peer::new(Uuid::new_v4().to_string());
    info!("New connection: {}", peer.id());

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            // Handle incoming messages from client
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match protocol::decode_client(&text) {
                            Ok(client_msg) => peer.handle(&registry, client_msg),
                            Err(e) => {
                                warn!("Invalid message from {}: {}", peer.id(), e);
                                Some(ServerMessage::Error {
                                    message: format!("Invalid message: {}", e),
                                })
                            }
                        };
                        if let Some(frame) = reply.as_ref().and_then(encode) {
                            if sender.send(frame).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // Ignore binary and ping/pong
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", peer.id(), e);
                        break;
                    }
                }
            }

            // Handle broadcast messages from room
            msg = async {
                match peer.room_id() {
                    Some(_) => peer.next_broadcast().await,
                    None => std::future::pending::<Option<ServerMessage>>().await,
                }
            } => {
                if let Some(frame) = msg.as_ref().and_then(encode) {
                    if sender.send(frame).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    // Disconnect counts as leave
    peer.leave(&registry);
    info!("Connection closed: {} ({} active rooms)", peer.id(), registry.room_count());
}
