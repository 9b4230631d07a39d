//! Shared fixtures for unit tests.

use crate::transport::{Transport, TransportEvent};
use crate::error::{SyncError, SyncResult};
use serde_json::Value;

/// In-memory transport: records what is sent, replays injected events.
#[derive(Debug, Default)]
pub struct MockTransport {
    pub opens: Vec<String>,
    pub closes: usize,
    pub sent: Vec<String>,
    /// Sends accepted before every further send fails; `None` never fails.
    pub send_budget: Option<usize>,
    pending: Vec<TransportEvent>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event for the next `poll_events()`.
    pub fn push(&mut self, event: TransportEvent) {
        self.pending.push(event);
    }

    /// Queue a server frame given as JSON.
    pub fn push_json(&mut self, value: Value) {
        self.pending.push(TransportEvent::Message(value.to_string()));
    }

    pub fn sent_json(&self) -> Vec<Value> {
        self.sent
            .iter()
            .map(|s| serde_json::from_str(s).unwrap())
            .collect()
    }

    pub fn sent_events(&self) -> Vec<String> {
        self.sent_json()
            .iter()
            .map(|v| v["type"].as_str().unwrap().to_string())
            .collect()
    }

    pub fn clear_sent(&mut self) {
        self.sent.clear();
    }
}

impl Transport for MockTransport {
    fn open(&mut self, url: &str) -> SyncResult<()> {
        self.opens.push(url.to_string());
        Ok(())
    }

    fn close(&mut self) {
        self.closes += 1;
        self.pending.clear();
    }

    fn send(&mut self, text: &str) -> SyncResult<()> {
        match self.send_budget {
            Some(0) => return Err(SyncError::Transport("mock send failure".into())),
            Some(n) => self.send_budget = Some(n - 1),
            None => {}
        }
        self.sent.push(text.to_string());
        Ok(())
    }

    fn poll_events(&mut self) -> Vec<TransportEvent> {
        std::mem::take(&mut self.pending)
    }
}
