//! Room membership: exactly one active room, remembered for rejoin.

use crate::connection::{require_transport, ConnectionManager, Delivery};
use crate::error::SyncResult;
use crate::protocol::{ClientMessage, UserInfo};
use crate::transport::Transport;

/// Tracks the active room and the identity used to join it.
///
/// The active pair doubles as the remembered pair: the connection manager
/// re-emits its join after every reconnect.
#[derive(Debug, Default)]
pub struct RoomSession {
    active: Option<(String, UserInfo)>,
    user_count: usize,
}

impl RoomSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn room_id(&self) -> Option<&str> {
        self.active.as_ref().map(|(room, _)| room.as_str())
    }

    pub fn user(&self) -> Option<&UserInfo> {
        self.active.as_ref().map(|(_, user)| user)
    }

    pub fn is_in_room(&self) -> bool {
        self.active.is_some()
    }

    /// Participant count as last reported by the server.
    pub fn user_count(&self) -> usize {
        self.user_count
    }

    /// Replace the displayed count; the server's figure is authoritative.
    pub fn set_user_count(&mut self, count: usize) {
        self.user_count = count;
    }

    /// Join `room_id` as `user`, leaving any other room first.
    ///
    /// Returns `false` when the same room is already joined with the same
    /// identity (nothing is sent).
    pub fn join<T: Transport>(
        &mut self,
        conn: &mut ConnectionManager<T>,
        room_id: &str,
        user: &UserInfo,
    ) -> SyncResult<bool> {
        require_transport(conn)?;

        if let Some((current, current_user)) = &self.active {
            if current == room_id && current_user == user {
                log::debug!("Already in room {}", room_id);
                return Ok(false);
            }
            if current != room_id {
                self.leave(conn);
            }
        }

        let join = ClientMessage::JoinRoom {
            room_id: room_id.to_string(),
            user: user.clone(),
        };
        self.active = Some((room_id.to_string(), user.clone()));
        conn.set_rejoin(Some(join.clone()));

        match conn.send(join) {
            Delivery::Sent => log::info!("Joined room {} as {}", room_id, user.name),
            _ => log::info!("Join of room {} queued until connected", room_id),
        }
        Ok(true)
    }

    /// Leave the active room. No-op when not in a room.
    ///
    /// The leave is only emitted on a live connection; the remembered pair is
    /// cleared regardless.
    pub fn leave<T: Transport>(&mut self, conn: &mut ConnectionManager<T>) -> bool {
        let Some((room_id, _)) = self.active.take() else {
            return false;
        };
        conn.set_rejoin(None);
        self.user_count = 0;
        let leave = ClientMessage::LeaveRoom {
            room_id: room_id.clone(),
        };
        if conn.send_volatile(&leave) == Delivery::Sent {
            log::info!("Left room {}", room_id);
        } else {
            log::info!("Left room {} locally (not connected)", room_id);
        }
        true
    }
}
