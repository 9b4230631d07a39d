//! Remote cursors: throttled pointer broadcast and liveness expiry.

use std::collections::BTreeMap;

use kurbo::Point;

use crate::protocol::{PointerPosition, UserInfo};
use crate::viewport::Viewport;

/// Cursor colors assigned to collaborators.
pub const CURSOR_PALETTE: [&str; 12] = [
    "#1e88e5", "#43a047", "#fb8c00", "#e53935", "#8e24aa", "#00acc1", "#f57c00", "#7b1fa2",
    "#00897b", "#d32f2f", "#5e35b1", "#c2185b",
];

/// Stable cursor color for a user id.
pub fn cursor_color(user_id: &str) -> &'static str {
    let hash = user_id.encode_utf16().fold(0i32, |hash, unit| {
        i32::from(unit).wrapping_add(hash.wrapping_shl(5).wrapping_sub(hash))
    });
    CURSOR_PALETTE[(hash.unsigned_abs() as usize) % CURSOR_PALETTE.len()]
}

/// A collaborator's last known cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceEntry {
    pub user_id: String,
    pub name: String,
    pub picture: Option<String>,
    /// Pointer in scene coordinates, as received.
    pub pointer: PointerPosition,
    /// Pointer in this viewer's screen coordinates.
    pub screen: Point,
    pub last_seen: u64,
    pub color: &'static str,
}

/// Result of a presence timer pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceTick {
    /// Users evicted for inactivity.
    pub expired: Vec<String>,
    /// Whether screen positions were recomputed.
    pub refreshed: bool,
}

/// Tracks remote cursors and rate-limits the local one.
#[derive(Debug)]
pub struct PresenceBroadcaster {
    local_user_id: String,
    pointer_interval_ms: u64,
    ttl_ms: u64,
    sweep_ms: u64,
    refresh_ms: u64,
    last_pointer_sent: Option<u64>,
    next_sweep: Option<u64>,
    next_refresh: Option<u64>,
    entries: BTreeMap<String, PresenceEntry>,
}

impl PresenceBroadcaster {
    pub fn new(
        local_user_id: impl Into<String>,
        pointer_interval_ms: u64,
        ttl_ms: u64,
        sweep_ms: u64,
        refresh_ms: u64,
    ) -> Self {
        Self {
            local_user_id: local_user_id.into(),
            pointer_interval_ms,
            ttl_ms,
            sweep_ms,
            refresh_ms,
            last_pointer_sent: None,
            next_sweep: None,
            next_refresh: None,
            entries: BTreeMap::new(),
        }
    }

    /// Convert a local pointer move for sending, or `None` if inside the
    /// throttle window.
    pub fn local_pointer(
        &mut self,
        screen: Point,
        viewport: &Viewport,
        now: u64,
    ) -> Option<PointerPosition> {
        if let Some(last) = self.last_pointer_sent {
            if now.saturating_sub(last) < self.pointer_interval_ms {
                return None;
            }
        }
        self.last_pointer_sent = Some(now);
        Some(viewport.pointer_from_screen(screen))
    }

    /// Record a remote pointer. Returns `true` if this is a new collaborator.
    pub fn on_remote(
        &mut self,
        user_id: &str,
        pointer: PointerPosition,
        user: Option<&UserInfo>,
        viewport: &Viewport,
        now: u64,
    ) -> bool {
        if user_id == self.local_user_id {
            return false;
        }
        let screen = viewport.scene_to_screen(Point::new(pointer.x, pointer.y));
        match self.entries.get_mut(user_id) {
            Some(entry) => {
                entry.pointer = pointer;
                entry.screen = screen;
                entry.last_seen = now;
                if let Some(user) = user {
                    entry.name = user.name.clone();
                    entry.picture = user.picture.clone();
                }
                false
            }
            None => {
                log::debug!("Cursor appeared for {}", user_id);
                self.entries.insert(
                    user_id.to_string(),
                    PresenceEntry {
                        user_id: user_id.to_string(),
                        name: user.map(|u| u.name.clone()).unwrap_or_default(),
                        picture: user.and_then(|u| u.picture.clone()),
                        pointer,
                        screen,
                        last_seen: now,
                        color: cursor_color(user_id),
                    },
                );
                true
            }
        }
    }

    /// Drop a collaborator immediately (they left the room).
    pub fn remove(&mut self, user_id: &str) -> bool {
        self.entries.remove(user_id).is_some()
    }

    /// Run the sweep and refresh timers.
    pub fn tick(&mut self, now: u64, viewport: &Viewport) -> PresenceTick {
        let mut result = PresenceTick::default();

        if *self.next_sweep.get_or_insert(now + self.sweep_ms) <= now {
            self.next_sweep = Some(now + self.sweep_ms);
            let ttl = self.ttl_ms;
            self.entries.retain(|id, entry| {
                let alive = now.saturating_sub(entry.last_seen) <= ttl;
                if !alive {
                    log::debug!("Cursor of {} expired", id);
                    result.expired.push(id.clone());
                }
                alive
            });
        }

        if *self.next_refresh.get_or_insert(now + self.refresh_ms) <= now {
            self.next_refresh = Some(now + self.refresh_ms);
            let transform = viewport.transform();
            for entry in self.entries.values_mut() {
                entry.screen = transform * Point::new(entry.pointer.x, entry.pointer.y);
            }
            result.refreshed = true;
        }

        result
    }

    pub fn get(&self, user_id: &str) -> Option<&PresenceEntry> {
        self.entries.get(user_id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &PresenceEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.last_pointer_sent = None;
        self.next_sweep = None;
        self.next_refresh = None;
    }
}
