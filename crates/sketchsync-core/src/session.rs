//! The sync session: one user's connection to the collaboration server.
//!
//! A [`SyncSession`] owns every piece of the engine and is driven by the host
//! calling [`SyncSession::tick`] from its event loop. It routes transport
//! messages, canvas change notifications and timers to the component that
//! handles them.

use kurbo::Point;

use crate::canvas::CanvasSurface;
use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::connection::{ConnectionEvent, ConnectionManager, ConnectionState, Delivery};
use crate::error::SyncResult;
use crate::guard::EchoGuard;
use crate::inbound::{InboundDecision, InboundReconciler, InboundStats, RemoteScene};
use crate::outbound::{OutboundGate, OutboundReconciler, OutboundStats};
use crate::presence::PresenceBroadcaster;
use crate::protocol::{ClientMessage, ServerMessage, UserInfo};
use crate::room::RoomSession;
use crate::scene::{Origin, SceneSnapshot, ViewState};
use crate::transport::Transport;
use crate::typing::TypingCoordinator;
use crate::viewport::Viewport;

/// Something the host may want to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected,
    Reconnecting { attempt: u32, delay_ms: u64 },
    /// Reconnect attempts exhausted; call `connect()` to retry.
    ConnectionFailed { attempts: u32 },
    /// A remote snapshot replaced the canvas.
    SceneApplied { origin: Origin, elements: usize, timestamp: u64 },
    /// A local snapshot was handed to the connection.
    SceneSent { elements: usize, timestamp: u64 },
    StaleUpdateDiscarded { timestamp: u64, last_applied: u64 },
    /// Room state predating a scene this client already published was skipped.
    RoomStateSuperseded { timestamp: u64, published: u64 },
    UserJoined(UserInfo),
    UserLeft { user_id: String },
    UserCountChanged(usize),
    /// Cursors evicted after going silent.
    CursorsExpired(Vec<String>),
    /// Remote cursor screen positions were recomputed; redraw them.
    CursorsRefreshed,
    ChatMessage { message: String, user: UserInfo, timestamp: Option<u64> },
    TypingChanged { user_name: String, is_typing: bool },
    ServerError(String),
}

/// A user's synchronization session.
pub struct SyncSession<T: Transport, C: CanvasSurface> {
    user: UserInfo,
    clock: Box<dyn Clock>,
    config: SyncConfig,
    conn: ConnectionManager<T>,
    room: RoomSession,
    outbound: OutboundReconciler,
    inbound: InboundReconciler,
    guard: EchoGuard,
    presence: PresenceBroadcaster,
    typing: TypingCoordinator,
    canvas: C,
}

impl<T: Transport, C: CanvasSurface> SyncSession<T, C> {
    /// Create a session for `user`. Nothing is opened until `connect()`.
    pub fn new(user: UserInfo, transport: T, canvas: C, config: SyncConfig) -> SyncResult<Self> {
        config.validate()?;
        log::info!("Creating sync session for {} ({})", user.name, user.id);
        Ok(Self {
            clock: Box::new(SystemClock),
            conn: ConnectionManager::new(transport, config.reconnect.clone()),
            room: RoomSession::new(),
            outbound: OutboundReconciler::new(config.drawing_throttle_ms, config.fingerprint_prefix),
            inbound: InboundReconciler::new(config.room_state_debounce_ms),
            guard: EchoGuard::new(config.settle_ms),
            presence: PresenceBroadcaster::new(
                user.id.clone(),
                config.pointer_interval_ms,
                config.presence_ttl_ms,
                config.presence_sweep_ms,
                config.cursor_refresh_ms,
            ),
            typing: TypingCoordinator::new(config.typing_idle_ms),
            user,
            config,
            canvas,
        })
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn user(&self) -> &UserInfo {
        &self.user
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room.room_id()
    }

    pub fn user_count(&self) -> usize {
        self.room.user_count()
    }

    pub fn presence(&self) -> &PresenceBroadcaster {
        &self.presence
    }

    pub fn typers(&self) -> impl Iterator<Item = &str> {
        self.typing.typers()
    }

    pub fn canvas(&self) -> &C {
        &self.canvas
    }

    pub fn canvas_mut(&mut self) -> &mut C {
        &mut self.canvas
    }

    pub fn connection(&self) -> &ConnectionManager<T> {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut ConnectionManager<T> {
        &mut self.conn
    }

    pub fn inbound_stats(&self) -> InboundStats {
        self.inbound.stats()
    }

    pub fn outbound_stats(&self) -> OutboundStats {
        self.outbound.stats()
    }

    /// Whether canvas changes are currently treated as echoes.
    pub fn is_echo_guarded(&self) -> bool {
        self.guard.is_set(self.clock.now_ms())
    }

    /// Current viewport of the local canvas.
    pub fn viewport(&self) -> Viewport {
        Viewport::from(&ViewState::from_raw(&self.canvas.view_state()))
    }

    /// Connect to the configured endpoint.
    pub fn connect(&mut self) -> SyncResult<ConnectionState> {
        let endpoint = self.config.endpoint.clone();
        self.conn.connect(&endpoint)
    }

    /// Leave the room, close the transport and forget all shared state.
    pub fn disconnect(&mut self) {
        self.room.leave(&mut self.conn);
        self.conn.disconnect();
        self.reset_room_state();
        self.guard.clear();
    }

    /// End the session.
    pub fn logout(mut self) {
        log::info!("Logging out {}", self.user.name);
        self.disconnect();
    }

    /// Join `room_id`, leaving the current room if it differs.
    pub fn join_room(&mut self, room_id: &str) -> SyncResult<bool> {
        let previous = self.room.room_id().map(str::to_owned);
        let joined = self.room.join(&mut self.conn, room_id, &self.user)?;
        if joined {
            if previous.is_some() {
                self.reset_room_state();
            }
            self.inbound.reset_room(room_id);
        }
        Ok(joined)
    }

    pub fn leave_room(&mut self) -> bool {
        let left = self.room.leave(&mut self.conn);
        if left {
            self.reset_room_state();
        }
        left
    }

    fn reset_room_state(&mut self) {
        self.outbound.reset();
        self.presence.clear();
        self.typing.clear();
    }

    /// Report the local pointer at `screen` (canvas pixels).
    pub fn pointer_moved(&mut self, screen: Point) -> Delivery {
        let Some(room_id) = self.room.room_id() else {
            return Delivery::Dropped;
        };
        let now = self.clock.now_ms();
        let viewport = self.viewport();
        let Some(pointer) = self.presence.local_pointer(screen, &viewport, now) else {
            return Delivery::Dropped;
        };
        let msg = ClientMessage::PointerUpdate {
            room_id: room_id.to_string(),
            pointer,
            user: self.user.clone(),
        };
        self.conn.send_volatile(&msg)
    }

    /// A key was pressed in the chat input.
    pub fn chat_keystroke(&mut self) -> Delivery {
        if !self.room.is_in_room() {
            return Delivery::Dropped;
        }
        let now = self.clock.now_ms();
        if self.typing.keystroke(now) {
            self.send_typing(true)
        } else {
            Delivery::Dropped
        }
    }

    /// Send a chat message to the room. Queued while offline.
    pub fn send_chat(&mut self, message: &str) -> Delivery {
        let message = message.trim();
        let Some(room_id) = self.room.room_id().map(str::to_owned) else {
            log::debug!("Not in a room, chat message dropped");
            return Delivery::Dropped;
        };
        if message.is_empty() {
            return Delivery::Dropped;
        }
        if self.typing.message_sent() {
            self.send_typing(false);
        }
        self.conn.send(ClientMessage::ChatMessage {
            room_id,
            message: message.to_string(),
            user: self.user.clone(),
        })
    }

    fn send_typing(&mut self, is_typing: bool) -> Delivery {
        let Some(room_id) = self.room.room_id() else {
            return Delivery::Dropped;
        };
        let msg = ClientMessage::Typing {
            room_id: room_id.to_string(),
            user: self.user.clone(),
            is_typing,
        };
        self.conn.send_volatile(&msg)
    }

    /// Re-apply the last snapshot received for the active room.
    pub fn restore_canvas(&mut self) -> bool {
        let Some(snapshot) = self
            .room
            .room_id()
            .and_then(|room_id| self.inbound.cached(room_id))
            .cloned()
        else {
            return false;
        };
        log::info!("Restoring {} cached elements", snapshot.elements.len());
        let now = self.clock.now_ms();
        self.apply_snapshot(&snapshot, now);
        true
    }

    fn apply_snapshot(&mut self, snapshot: &SceneSnapshot, now: u64) {
        self.guard.arm(now);
        self.canvas
            .replace_scene(&snapshot.elements, &snapshot.view_state);
        self.outbound
            .note_remote_applied(snapshot.fingerprint(self.config.fingerprint_prefix));
    }

    fn gate(&self, now: u64) -> OutboundGate {
        OutboundGate {
            echo_guarded: self.guard.is_set(now),
            in_room: self.room.is_in_room(),
            connected: self.conn.is_connected(),
        }
    }

    /// Process everything that is due: transport events, canvas changes,
    /// throttled sends and timers.
    pub fn tick(&mut self) -> Vec<SessionEvent> {
        let now = self.clock.now_ms();
        let mut events = Vec::new();

        for event in self.conn.poll(now) {
            match event {
                ConnectionEvent::Connected => events.push(SessionEvent::Connected),
                ConnectionEvent::Reconnecting { attempt, delay_ms } => {
                    events.push(SessionEvent::Reconnecting { attempt, delay_ms })
                }
                ConnectionEvent::Failed { attempts } => {
                    events.push(SessionEvent::ConnectionFailed { attempts })
                }
                ConnectionEvent::Message(msg) => self.handle_message(msg, now, &mut events),
            }
        }

        for change in self.canvas.take_changes() {
            let gate = self.gate(now);
            self.outbound
                .record(change.elements, &change.view_state, now, gate);
        }
        self.guard.tick(now);

        let gate = self.gate(now);
        if let Some(snapshot) = self.outbound.poll(now, gate) {
            self.publish(snapshot, &mut events);
        }

        let viewport = self.viewport();
        let presence = self.presence.tick(now, &viewport);
        if !presence.expired.is_empty() {
            events.push(SessionEvent::CursorsExpired(presence.expired));
        }
        if presence.refreshed && !self.presence.is_empty() {
            events.push(SessionEvent::CursorsRefreshed);
        }

        if self.typing.tick(now) {
            self.send_typing(false);
        }

        events
    }

    fn publish(&mut self, snapshot: SceneSnapshot, events: &mut Vec<SessionEvent>) {
        let Some(room_id) = self.room.room_id().map(str::to_owned) else {
            return;
        };
        self.inbound.note_published(&room_id, snapshot.timestamp);
        events.push(SessionEvent::SceneSent {
            elements: snapshot.elements.len(),
            timestamp: snapshot.timestamp,
        });
        log::debug!(
            "Sending {} elements to {} (timestamp {})",
            snapshot.elements.len(),
            room_id,
            snapshot.timestamp
        );
        self.conn.send(ClientMessage::DrawingUpdate {
            room_id,
            elements: snapshot.elements,
            app_state: snapshot.view_state,
            timestamp: snapshot.timestamp,
        });
    }

    fn handle_message(&mut self, msg: ServerMessage, now: u64, events: &mut Vec<SessionEvent>) {
        match msg {
            ServerMessage::RoomState { elements, app_state, is_initial_load, timestamp } => {
                let scene = RemoteScene {
                    elements,
                    view_state: app_state,
                    timestamp,
                    origin: Origin::RoomState { initial_load: is_initial_load },
                };
                self.receive_scene(scene, now, events);
            }
            ServerMessage::DrawingUpdate { elements, app_state, timestamp } => {
                let scene = RemoteScene {
                    elements,
                    view_state: app_state,
                    timestamp,
                    origin: Origin::Peer,
                };
                self.receive_scene(scene, now, events);
            }
            ServerMessage::UserJoined { user, user_id } => {
                log::info!("{} ({}) joined", user.name, user_id);
                events.push(SessionEvent::UserJoined(user));
            }
            ServerMessage::UserLeft { user_id } => {
                log::info!("{} left", user_id);
                self.presence.remove(&user_id);
                events.push(SessionEvent::UserLeft { user_id });
            }
            ServerMessage::UserCount { count } => {
                self.room.set_user_count(count);
                events.push(SessionEvent::UserCountChanged(count));
            }
            ServerMessage::PointerUpdate { user_id, pointer, user } => {
                if self.room.is_in_room() {
                    let viewport = self.viewport();
                    self.presence
                        .on_remote(&user_id, pointer, user.as_ref(), &viewport, now);
                }
            }
            ServerMessage::ChatMessage { message, user, timestamp } => {
                events.push(SessionEvent::ChatMessage { message, user, timestamp });
            }
            ServerMessage::UserTyping { user_name, is_typing } => {
                if self.typing.on_remote(&user_name, is_typing) {
                    events.push(SessionEvent::TypingChanged { user_name, is_typing });
                }
            }
            ServerMessage::Error { message } => {
                log::warn!("Server error: {}", message);
                events.push(SessionEvent::ServerError(message));
            }
        }
    }

    fn receive_scene(&mut self, scene: RemoteScene, now: u64, events: &mut Vec<SessionEvent>) {
        match self.inbound.receive(self.room.room_id(), scene, now) {
            InboundDecision::Apply(snapshot) => {
                self.apply_snapshot(&snapshot, now);
                events.push(SessionEvent::SceneApplied {
                    origin: snapshot.origin,
                    elements: snapshot.elements.len(),
                    timestamp: snapshot.timestamp,
                });
            }
            InboundDecision::Stale { timestamp, last_applied } => {
                events.push(SessionEvent::StaleUpdateDiscarded { timestamp, last_applied });
            }
            InboundDecision::Superseded { timestamp, published } => {
                events.push(SessionEvent::RoomStateSuperseded { timestamp, published });
            }
            InboundDecision::Duplicate | InboundDecision::Ignored => {}
        }
    }
}
