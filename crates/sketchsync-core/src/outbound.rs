//! Outbound scene updates: filter, throttle and deduplicate local edits.

use crate::scene::{DrawingElement, Fingerprint, Origin, SceneSnapshot, ViewState};
use serde_json::Value;

/// Conditions checked before a local change may be published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboundGate {
    /// A remote apply is settling; changes are echoes.
    pub echo_guarded: bool,
    pub in_room: bool,
    pub connected: bool,
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboundStats {
    pub emitted: u64,
    /// Changes dropped by the echo guard or because no room was active.
    pub discarded: u64,
    /// Flushes skipped because the fingerprint had not changed.
    pub unchanged: u64,
}

#[derive(Debug, Clone)]
struct PendingScene {
    elements: Vec<DrawingElement>,
    view_state: ViewState,
}

/// Collapses bursts of local canvas changes into trailing-edge emissions.
///
/// The first change of a burst arms a flush `interval_ms` later; later changes
/// only replace the pending scene, so the final state of the burst is what
/// gets sent.
#[derive(Debug)]
pub struct OutboundReconciler {
    interval_ms: u64,
    prefix_len: usize,
    pending: Option<PendingScene>,
    flush_at: Option<u64>,
    last_fingerprint: Option<Fingerprint>,
    stats: OutboundStats,
}

impl OutboundReconciler {
    pub fn new(interval_ms: u64, prefix_len: usize) -> Self {
        Self {
            interval_ms,
            prefix_len,
            pending: None,
            flush_at: None,
            last_fingerprint: None,
            stats: OutboundStats::default(),
        }
    }

    pub fn stats(&self) -> OutboundStats {
        self.stats
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Record a canvas change. Returns whether it was accepted for sending.
    pub fn record(
        &mut self,
        elements: Vec<DrawingElement>,
        raw_view_state: &Value,
        now: u64,
        gate: OutboundGate,
    ) -> bool {
        if gate.echo_guarded || !gate.in_room {
            log::trace!(
                "Discarding local change (echo_guarded={}, in_room={})",
                gate.echo_guarded,
                gate.in_room
            );
            self.stats.discarded += 1;
            return false;
        }
        self.pending = Some(PendingScene {
            elements,
            view_state: ViewState::from_raw(raw_view_state),
        });
        self.flush_at.get_or_insert(now + self.interval_ms);
        true
    }

    /// Emit the pending scene if its flush is due.
    ///
    /// While disconnected the scene stays parked and goes out on the first
    /// poll after the connection is back.
    pub fn poll(&mut self, now: u64, gate: OutboundGate) -> Option<SceneSnapshot> {
        match self.flush_at {
            Some(at) if now >= at => {}
            _ => return None,
        }
        if gate.echo_guarded || !gate.in_room {
            self.pending = None;
            self.flush_at = None;
            self.stats.discarded += 1;
            return None;
        }
        if !gate.connected {
            return None;
        }
        self.flush_at = None;
        let pending = self.pending.take()?;

        let fingerprint = Fingerprint::of(&pending.elements, self.prefix_len);
        if self.last_fingerprint.as_ref() == Some(&fingerprint) {
            log::trace!("Scene unchanged since last emission, skipping");
            self.stats.unchanged += 1;
            return None;
        }
        self.last_fingerprint = Some(fingerprint);
        self.stats.emitted += 1;

        Some(SceneSnapshot {
            elements: pending.elements,
            view_state: pending.view_state,
            timestamp: now,
            origin: Origin::Local,
        })
    }

    /// A remote snapshot replaced the canvas: drop the stale pending scene
    /// and treat the remote content as already published.
    pub fn note_remote_applied(&mut self, fingerprint: Fingerprint) {
        if self.pending.take().is_some() {
            log::debug!("Dropping pending local scene superseded by remote snapshot");
        }
        self.flush_at = None;
        self.last_fingerprint = Some(fingerprint);
    }

    /// Forget everything (room left or session disconnected).
    pub fn reset(&mut self) {
        self.pending = None;
        self.flush_at = None;
        self.last_fingerprint = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::element;
    use serde_json::json;

    const OPEN: OutboundGate = OutboundGate {
        echo_guarded: false,
        in_room: true,
        connected: true,
    };

    fn scene(n: usize, version: u64) -> Vec<DrawingElement> {
        (0..n).map(|i| element(&format!("e{i}"), version)).collect()
    }

    #[test]
    fn test_burst_collapses_to_final_state() {
        let mut out = OutboundReconciler::new(100, 8);
        for (i, t) in [0u64, 10, 30, 60, 95].iter().enumerate() {
            assert!(out.record(scene(i + 1, 1), &json!({}), *t, OPEN));
            assert!(out.poll(*t, OPEN).is_none());
        }
        let snap = out.poll(100, OPEN).expect("trailing emission");
        assert_eq!(snap.elements.len(), 5);
        assert_eq!(snap.timestamp, 100);
        assert_eq!(snap.origin, Origin::Local);
        assert!(out.poll(500, OPEN).is_none());
        assert_eq!(out.stats().emitted, 1);
    }

    #[test]
    fn test_emissions_spaced_by_interval() {
        let mut out = OutboundReconciler::new(100, 8);
        out.record(scene(1, 1), &json!({}), 0, OPEN);
        assert!(out.poll(100, OPEN).is_some());
        out.record(scene(2, 1), &json!({}), 100, OPEN);
        assert!(out.poll(150, OPEN).is_none());
        assert!(out.poll(200, OPEN).is_some());
    }

    #[test]
    fn test_unchanged_fingerprint_suppressed() {
        let mut out = OutboundReconciler::new(100, 8);
        out.record(scene(3, 1), &json!({}), 0, OPEN);
        assert!(out.poll(100, OPEN).is_some());
        out.record(scene(3, 1), &json!({"scrollX": 40}), 120, OPEN);
        assert!(out.poll(220, OPEN).is_none());
        assert_eq!(out.stats().unchanged, 1);
    }

    #[test]
    fn test_guarded_and_roomless_changes_discarded() {
        let mut out = OutboundReconciler::new(100, 8);
        let guarded = OutboundGate { echo_guarded: true, ..OPEN };
        let no_room = OutboundGate { in_room: false, ..OPEN };
        assert!(!out.record(scene(1, 1), &json!({}), 0, guarded));
        assert!(!out.record(scene(1, 1), &json!({}), 0, no_room));
        assert!(!out.has_pending());
        assert!(out.poll(1000, OPEN).is_none());
        assert_eq!(out.stats().discarded, 2);
    }

    #[test]
    fn test_parked_while_disconnected() {
        let mut out = OutboundReconciler::new(100, 8);
        let offline = OutboundGate { connected: false, ..OPEN };
        out.record(scene(1, 1), &json!({}), 0, offline);
        out.record(scene(2, 1), &json!({}), 50, offline);
        assert!(out.poll(100, offline).is_none());
        assert!(out.poll(5000, offline).is_none());
        let snap = out.poll(6000, OPEN).expect("parked scene sent after reconnect");
        assert_eq!(snap.elements.len(), 2);
        assert_eq!(snap.timestamp, 6000);
    }

    #[test]
    fn test_remote_apply_supersedes_pending_and_marks_published() {
        let mut out = OutboundReconciler::new(100, 8);
        out.record(scene(1, 1), &json!({}), 0, OPEN);
        let remote = scene(4, 2);
        out.note_remote_applied(Fingerprint::of(&remote, 8));
        assert!(out.poll(100, OPEN).is_none());

        // The canvas re-emits the applied scene after the settle window
        out.record(remote, &json!({}), 400, OPEN);
        assert!(out.poll(500, OPEN).is_none());
    }

    #[test]
    fn test_view_state_projected_before_send() {
        let mut out = OutboundReconciler::new(100, 8);
        out.record(
            scene(1, 1),
            &json!({"zoom": {"value": 1.5}, "collaborators": {"x": {}}, "viewBackgroundColor": "#fff"}),
            0,
            OPEN,
        );
        let snap = out.poll(100, OPEN).unwrap();
        assert_eq!(snap.view_state.zoom, 1.5);
        assert_eq!(snap.view_state.view_background_color.as_deref(), Some("#fff"));
    }
}
