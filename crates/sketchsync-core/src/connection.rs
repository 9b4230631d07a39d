//! Connection lifecycle: connect, bounded reconnect, outbound queue, teardown.

use std::collections::VecDeque;

use crate::config::ReconnectPolicy;
use crate::error::{SyncError, SyncResult};
use crate::protocol::{self, ClientMessage, ServerMessage};
use crate::transport::{validate_endpoint, Transport, TransportEvent};

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Reconnect attempts exhausted. Only an explicit `connect()` leaves this state.
    Failed,
}

/// What happened to an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Queued,
    Dropped,
}

/// Events produced while polling the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Transport opened; rejoin and queue flush already happened.
    Connected,
    /// Transport lost; a retry is scheduled.
    Reconnecting { attempt: u32, delay_ms: u64 },
    /// Retries exhausted.
    Failed { attempts: u32 },
    /// Decoded server message.
    Message(ServerMessage),
}

/// Owns the transport and everything needed to keep it alive.
pub struct ConnectionManager<T: Transport> {
    transport: T,
    endpoint: Option<String>,
    state: ConnectionState,
    policy: ReconnectPolicy,
    /// Failed attempts since the last successful open.
    attempts: u32,
    reconnect_at: Option<u64>,
    queue: VecDeque<ClientMessage>,
    /// Join re-emitted ahead of the queue after every (re)connect.
    rejoin: Option<ClientMessage>,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(transport: T, policy: ReconnectPolicy) -> Self {
        Self {
            transport,
            endpoint: None,
            state: ConnectionState::Disconnected,
            policy,
            attempts: 0,
            reconnect_at: None,
            queue: VecDeque::new(),
            rejoin: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Whether `connect()` has been called since the last `disconnect()`.
    pub fn has_transport(&self) -> bool {
        self.endpoint.is_some()
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Open a connection to `endpoint`.
    ///
    /// Idempotent: an existing connection (or attempt in progress) to the same
    /// endpoint is kept as is.
    pub fn connect(&mut self, endpoint: &str) -> SyncResult<ConnectionState> {
        validate_endpoint(endpoint)?;

        let same_endpoint = self.endpoint.as_deref() == Some(endpoint);
        if same_endpoint
            && matches!(self.state, ConnectionState::Connected | ConnectionState::Connecting)
        {
            return Ok(self.state);
        }

        if self.endpoint.is_some() {
            self.transport.close();
        }
        self.endpoint = Some(endpoint.to_string());
        self.attempts = 0;
        self.reconnect_at = None;
        self.state = ConnectionState::Connecting;
        log::info!("Connecting to {}", endpoint);

        if let Err(e) = self.transport.open(endpoint) {
            self.state = ConnectionState::Disconnected;
            self.endpoint = None;
            return Err(e);
        }
        Ok(self.state)
    }

    /// Tear down the transport and drop everything queued.
    pub fn disconnect(&mut self) {
        if self.endpoint.take().is_some() {
            self.transport.close();
            log::info!("Disconnected ({} queued messages dropped)", self.queue.len());
        }
        self.queue.clear();
        self.rejoin = None;
        self.attempts = 0;
        self.reconnect_at = None;
        self.state = ConnectionState::Disconnected;
    }

    /// Set (or clear) the join message re-emitted on every (re)connect.
    pub fn set_rejoin(&mut self, join: Option<ClientMessage>) {
        self.rejoin = join;
    }

    pub fn rejoin(&self) -> Option<&ClientMessage> {
        self.rejoin.as_ref()
    }

    /// Send now if connected, otherwise queue for the next connect.
    ///
    /// Messages left queued by an earlier failed send go out first, so a
    /// failure never reorders the stream.
    pub fn send(&mut self, msg: ClientMessage) -> Delivery {
        if self.is_connected() && self.flush_queue(false) {
            match self.transmit(&msg) {
                Ok(()) => return Delivery::Sent,
                Err(e) => log::warn!("Send of {} failed, queueing: {}", msg.event_name(), e),
            }
        }
        log::debug!("Queueing {} ({} already queued)", msg.event_name(), self.queue.len());
        self.queue.push_back(msg);
        Delivery::Queued
    }

    /// Send only if connected; never queued.
    pub fn send_volatile(&mut self, msg: &ClientMessage) -> Delivery {
        if !self.is_connected() {
            return Delivery::Dropped;
        }
        match self.transmit(msg) {
            Ok(()) => Delivery::Sent,
            Err(e) => {
                log::debug!("Dropping volatile {}: {}", msg.event_name(), e);
                Delivery::Dropped
            }
        }
    }

    fn transmit(&mut self, msg: &ClientMessage) -> SyncResult<()> {
        let json = protocol::encode(msg)?;
        self.transport.send(&json)
    }

    /// Drain transport events and run the reconnect timer.
    pub fn poll(&mut self, now: u64) -> Vec<ConnectionEvent> {
        let mut out = Vec::new();

        for event in self.transport.poll_events() {
            match event {
                TransportEvent::Opened => {
                    if self.state != ConnectionState::Connecting {
                        continue;
                    }
                    log::info!("Connected after {} failed attempts", self.attempts);
                    self.state = ConnectionState::Connected;
                    self.attempts = 0;
                    self.reconnect_at = None;
                    self.restore();
                    out.push(ConnectionEvent::Connected);
                }
                TransportEvent::Message(text) => match protocol::decode(&text) {
                    Ok(msg) => out.push(ConnectionEvent::Message(msg)),
                    Err(e) => log::warn!("Failed to parse server message: {} ({})", e, text),
                },
                TransportEvent::Closed => self.on_lost("connection closed", now, &mut out),
                TransportEvent::Error(message) => self.on_lost(&message, now, &mut out),
            }
        }

        if let Some(at) = self.reconnect_at {
            if now >= at {
                self.reconnect_at = None;
                self.retry(now, &mut out);
            }
        }

        out
    }

    /// Rejoin first, then flush the queue in FIFO order.
    fn restore(&mut self) {
        if let Some(join) = self.rejoin.clone() {
            log::info!("Rejoining room {}", join.room_id());
            if let Err(e) = self.transmit(&join) {
                log::warn!("Rejoin failed: {}", e);
            }
        }

        self.flush_queue(true);
    }

    /// Send queued messages in FIFO order. Returns whether the queue drained.
    ///
    /// With `skip_joins`, queued joins are dropped: after a reconnect,
    /// membership comes from the rejoin alone, never from stale queued joins.
    fn flush_queue(&mut self, skip_joins: bool) -> bool {
        while let Some(msg) = self.queue.pop_front() {
            if skip_joins && matches!(msg, ClientMessage::JoinRoom { .. }) {
                log::debug!("Skipping queued join for {}", msg.room_id());
                continue;
            }
            if let Err(e) = self.transmit(&msg) {
                log::warn!("Flush interrupted ({} left): {}", self.queue.len() + 1, e);
                self.queue.push_front(msg);
                return false;
            }
        }
        true
    }

    fn on_lost(&mut self, reason: &str, now: u64, out: &mut Vec<ConnectionEvent>) {
        // Only the first report of a loss counts; a failed socket may emit both error and close
        if !matches!(self.state, ConnectionState::Connected | ConnectionState::Connecting) {
            return;
        }
        log::warn!("Connection lost: {}", reason);
        self.state = ConnectionState::Disconnected;
        self.schedule_retry(now, out);
    }

    fn schedule_retry(&mut self, now: u64, out: &mut Vec<ConnectionEvent>) {
        self.attempts += 1;
        if self.attempts > self.policy.max_attempts {
            log::error!("Giving up after {} reconnect attempts", self.policy.max_attempts);
            self.state = ConnectionState::Failed;
            self.reconnect_at = None;
            self.transport.close();
            out.push(ConnectionEvent::Failed {
                attempts: self.policy.max_attempts,
            });
            return;
        }
        let delay_ms = self.policy.delay_for(self.attempts);
        log::info!("Reconnect attempt {} in {} ms", self.attempts, delay_ms);
        self.reconnect_at = Some(now + delay_ms);
        out.push(ConnectionEvent::Reconnecting {
            attempt: self.attempts,
            delay_ms,
        });
    }

    fn retry(&mut self, now: u64, out: &mut Vec<ConnectionEvent>) {
        let Some(endpoint) = self.endpoint.clone() else {
            return;
        };
        self.state = ConnectionState::Connecting;
        if let Err(e) = self.transport.open(&endpoint) {
            log::error!("Reconnect to {} failed: {}", endpoint, e);
            self.state = ConnectionState::Disconnected;
            self.schedule_retry(now, out);
        }
    }
}

/// Error unless `connect()` has been called.
pub(crate) fn require_transport<T: Transport>(conn: &ConnectionManager<T>) -> SyncResult<()> {
    if conn.has_transport() {
        Ok(())
    } else {
        Err(SyncError::NoTransport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::UserInfo;
    use crate::test_helpers::MockTransport;

    const URL: &str = "ws://localhost:3030/ws";

    fn join(room: &str) -> ClientMessage {
        ClientMessage::JoinRoom {
            room_id: room.into(),
            user: UserInfo::new("u1", "Ada"),
        }
    }

    fn chat(text: &str) -> ClientMessage {
        ClientMessage::ChatMessage {
            room_id: "r1".into(),
            message: text.into(),
            user: UserInfo::new("u1", "Ada"),
        }
    }

    fn connected() -> ConnectionManager<MockTransport> {
        let mut conn = ConnectionManager::new(MockTransport::new(), ReconnectPolicy::default());
        conn.connect(URL).unwrap();
        conn.transport_mut().push(TransportEvent::Opened);
        assert_eq!(conn.poll(0), vec![ConnectionEvent::Connected]);
        conn
    }

    #[test]
    fn test_connect_is_idempotent() {
        let mut conn = connected();
        assert_eq!(conn.connect(URL).unwrap(), ConnectionState::Connected);
        assert_eq!(conn.transport().opens.len(), 1);
    }

    #[test]
    fn test_connect_rejects_bad_endpoint() {
        let mut conn = ConnectionManager::new(MockTransport::new(), ReconnectPolicy::default());
        assert!(matches!(conn.connect("http://nope"), Err(SyncError::InvalidEndpoint(_))));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(require_transport(&conn).is_err());
    }

    #[test]
    fn test_messages_queue_while_disconnected() {
        let mut conn = ConnectionManager::new(MockTransport::new(), ReconnectPolicy::default());
        conn.connect(URL).unwrap();
        assert_eq!(conn.send(chat("one")), Delivery::Queued);
        assert_eq!(conn.send(chat("two")), Delivery::Queued);
        assert_eq!(conn.send_volatile(&chat("volatile")), Delivery::Dropped);
        assert!(conn.transport().sent.is_empty());

        conn.transport_mut().push(TransportEvent::Opened);
        conn.poll(10);
        assert_eq!(conn.transport().sent_events(), vec!["chat-message", "chat-message"]);
        assert_eq!(conn.transport().sent_json()[0]["message"], "one");
        assert_eq!(conn.transport().sent_json()[1]["message"], "two");
        assert_eq!(conn.queued(), 0);
    }

    #[test]
    fn test_rejoin_precedes_queue_flush() {
        let mut conn = connected();
        conn.set_rejoin(Some(join("r1")));
        conn.transport_mut().push(TransportEvent::Closed);
        conn.poll(100);
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        conn.send(join("stale-room"));
        conn.send(chat("first"));
        conn.send(chat("second"));

        conn.poll(1100);
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert_eq!(conn.transport().opens.len(), 2);

        conn.transport_mut().push(TransportEvent::Opened);
        conn.poll(1150);
        let sent = conn.transport().sent_json();
        assert_eq!(conn.transport().sent_events(), vec!["join-room", "chat-message", "chat-message"]);
        assert_eq!(sent[0]["roomId"], "r1");
        assert_eq!(sent[1]["message"], "first");
        assert_eq!(sent[2]["message"], "second");
    }

    #[test]
    fn test_failed_send_is_queued_and_sent_first() {
        let mut conn = connected();
        conn.transport_mut().send_budget = Some(0);
        assert_eq!(conn.send(chat("one")), Delivery::Queued);
        assert_eq!(conn.queued(), 1);
        assert_eq!(conn.state(), ConnectionState::Connected);

        // Still failing: the new message lines up behind the old one
        assert_eq!(conn.send(chat("two")), Delivery::Queued);
        assert_eq!(conn.queued(), 2);

        conn.transport_mut().send_budget = None;
        assert_eq!(conn.send(chat("three")), Delivery::Sent);
        let sent = conn.transport().sent_json();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0]["message"], "one");
        assert_eq!(sent[1]["message"], "two");
        assert_eq!(sent[2]["message"], "three");
        assert_eq!(conn.queued(), 0);
    }

    #[test]
    fn test_interrupted_flush_keeps_fifo_order() {
        let mut conn = ConnectionManager::new(MockTransport::new(), ReconnectPolicy::default());
        conn.connect(URL).unwrap();
        conn.set_rejoin(Some(join("r1")));
        for text in ["one", "two", "three"] {
            conn.send(chat(text));
        }

        // Rejoin and "one" go out, then the socket starts refusing
        conn.transport_mut().send_budget = Some(2);
        conn.transport_mut().push(TransportEvent::Opened);
        conn.poll(10);
        assert_eq!(conn.transport().sent_events(), vec!["join-room", "chat-message"]);
        assert_eq!(conn.queued(), 2);

        conn.transport_mut().send_budget = None;
        assert_eq!(conn.send(chat("four")), Delivery::Sent);
        let messages: Vec<_> = conn
            .transport()
            .sent_json()
            .iter()
            .skip(1)
            .map(|f| f["message"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(messages, vec!["one", "two", "three", "four"]);
    }

    #[test]
    fn test_failed_join_while_connected_is_retried() {
        let mut conn = connected();
        conn.transport_mut().send_budget = Some(0);
        assert_eq!(conn.send(join("r1")), Delivery::Queued);
        conn.transport_mut().send_budget = None;
        conn.send(chat("hi"));
        assert_eq!(conn.transport().sent_events(), vec!["join-room", "chat-message"]);
    }

    #[test]
    fn test_backoff_then_failed() {
        let mut conn = connected();
        conn.transport_mut().push(TransportEvent::Closed);
        let events = conn.poll(0);
        assert_eq!(events, vec![ConnectionEvent::Reconnecting { attempt: 1, delay_ms: 1000 }]);

        let mut now = 0;
        let mut delays = vec![1000];
        loop {
            now += *delays.last().unwrap();
            conn.poll(now);
            assert_eq!(conn.state(), ConnectionState::Connecting);
            conn.transport_mut().push(TransportEvent::Error("refused".into()));
            // Some sockets report both an error and a close for one failure
            conn.transport_mut().push(TransportEvent::Closed);
            match conn.poll(now).as_slice() {
                [ConnectionEvent::Reconnecting { delay_ms, .. }] => delays.push(*delay_ms),
                [ConnectionEvent::Failed { attempts }] => {
                    assert_eq!(*attempts, 5);
                    break;
                }
                other => panic!("unexpected events: {:?}", other),
            }
        }
        assert_eq!(delays, vec![1000, 2000, 4000, 5000, 5000]);
        assert_eq!(conn.state(), ConnectionState::Failed);

        // No further automatic retries
        let opens = conn.transport().opens.len();
        conn.poll(now + 60_000);
        assert_eq!(conn.transport().opens.len(), opens);

        // Explicit connect is a manual retry
        assert_eq!(conn.connect(URL).unwrap(), ConnectionState::Connecting);
        assert_eq!(conn.attempts(), 0);
    }

    #[test]
    fn test_successful_reconnect_resets_attempts() {
        let mut conn = connected();
        conn.transport_mut().push(TransportEvent::Closed);
        conn.poll(0);
        conn.poll(1000);
        conn.transport_mut().push(TransportEvent::Opened);
        assert_eq!(conn.poll(1010), vec![ConnectionEvent::Connected]);
        assert_eq!(conn.attempts(), 0);
    }

    #[test]
    fn test_disconnect_clears_queue() {
        let mut conn = ConnectionManager::new(MockTransport::new(), ReconnectPolicy::default());
        conn.connect(URL).unwrap();
        conn.send(chat("lost"));
        conn.set_rejoin(Some(join("r1")));
        conn.disconnect();
        assert_eq!(conn.queued(), 0);
        assert!(conn.rejoin().is_none());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.transport().closes, 1);
    }

    #[test]
    fn test_malformed_frame_is_dropped() {
        let mut conn = connected();
        conn.transport_mut().push(TransportEvent::Message("{oops".into()));
        conn.transport_mut().push(TransportEvent::Message(r#"{"type":"user-count","count":2}"#.into()));
        assert_eq!(
            conn.poll(5),
            vec![ConnectionEvent::Message(ServerMessage::UserCount { count: 2 })]
        );
    }
}
