//! Reentrancy guard between applying remote scenes and publishing local ones.

/// Marks the window in which canvas change events are echoes of a remote apply.
///
/// Armed when a remote snapshot is written into the canvas and released once
/// the settle delay has elapsed, absorbing the canvas's re-render cascade.
/// The content check in the outbound reconciler catches echoes that arrive
/// later than that.
#[derive(Debug, Clone)]
pub struct EchoGuard {
    settle_ms: u64,
    until: Option<u64>,
}

impl EchoGuard {
    pub fn new(settle_ms: u64) -> Self {
        Self {
            settle_ms,
            until: None,
        }
    }

    /// Set the guard for a remote apply happening at `now`.
    pub fn arm(&mut self, now: u64) {
        self.until = Some(now + self.settle_ms);
    }

    pub fn is_set(&self, now: u64) -> bool {
        matches!(self.until, Some(until) if now < until)
    }

    /// Release the guard once the settle delay has passed.
    pub fn tick(&mut self, now: u64) {
        if matches!(self.until, Some(until) if now >= until) {
            self.until = None;
        }
    }

    pub fn clear(&mut self) {
        self.until = None;
    }
}
