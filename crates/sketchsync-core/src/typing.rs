//! Typing indicators for the room chat.

use std::collections::BTreeSet;

/// Debounces the local typing state and tracks who else is typing.
///
/// Methods returning `bool` report whether the corresponding `typing`
/// message has to be sent.
#[derive(Debug)]
pub struct TypingCoordinator {
    idle_ms: u64,
    typing: bool,
    stop_at: Option<u64>,
    typers: BTreeSet<String>,
}

impl TypingCoordinator {
    pub fn new(idle_ms: u64) -> Self {
        Self {
            idle_ms,
            typing: false,
            stop_at: None,
            typers: BTreeSet::new(),
        }
    }

    pub fn is_typing(&self) -> bool {
        self.typing
    }

    /// A key was pressed in the chat input. `true` means send `typing(true)`.
    pub fn keystroke(&mut self, now: u64) -> bool {
        self.stop_at = Some(now + self.idle_ms);
        if self.typing {
            return false;
        }
        self.typing = true;
        true
    }

    /// A chat message was sent. `true` means send `typing(false)`.
    pub fn message_sent(&mut self) -> bool {
        self.stop_at = None;
        std::mem::replace(&mut self.typing, false)
    }

    /// `true` once the idle delay after the last keystroke has elapsed.
    pub fn tick(&mut self, now: u64) -> bool {
        match self.stop_at {
            Some(at) if now >= at => self.message_sent(),
            _ => false,
        }
    }

    /// Apply a remote typing event. Returns whether the set changed.
    pub fn on_remote(&mut self, user_name: &str, is_typing: bool) -> bool {
        if is_typing {
            self.typers.insert(user_name.to_string())
        } else {
            self.typers.remove(user_name)
        }
    }

    /// Display names of collaborators currently typing.
    pub fn typers(&self) -> impl Iterator<Item = &str> {
        self.typers.iter().map(String::as_str)
    }

    /// Forget local and remote state without emitting anything.
    pub fn clear(&mut self) {
        self.typing = false;
        self.stop_at = None;
        self.typers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_once_then_stop_after_idle() {
        let mut typing = TypingCoordinator::new(2000);
        assert!(typing.keystroke(0));
        assert!(!typing.keystroke(500));
        assert!(!typing.keystroke(1500));
        assert!(!typing.tick(3000));
        assert!(typing.tick(3500));
        assert!(!typing.is_typing());
        assert!(!typing.tick(10_000));
        assert!(typing.keystroke(11_000));
    }

    #[test]
    fn test_send_stops_immediately() {
        let mut typing = TypingCoordinator::new(2000);
        typing.keystroke(0);
        assert!(typing.message_sent());
        assert!(!typing.message_sent());
        assert!(!typing.tick(5000));
    }

    #[test]
    fn test_remote_typers_have_no_expiry() {
        let mut typing = TypingCoordinator::new(2000);
        assert!(typing.on_remote("Bob", true));
        assert!(!typing.on_remote("Bob", true));
        assert!(typing.on_remote("Eve", true));
        typing.tick(1_000_000);
        assert_eq!(typing.typers().collect::<Vec<_>>(), vec!["Bob", "Eve"]);
        assert!(typing.on_remote("Bob", false));
        assert!(!typing.on_remote("Bob", false));
        assert_eq!(typing.typers().collect::<Vec<_>>(), vec!["Eve"]);
    }
}
