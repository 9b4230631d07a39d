//! Engine configuration.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default relay endpoint (matches the relay server's default bind address).
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:3030/ws";

/// Environment variable overriding [`SyncConfig::endpoint`].
pub const ENDPOINT_ENV: &str = "SKETCHSYNC_ENDPOINT";

/// Reconnection backoff policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub initial_delay_ms: u64,
    /// Upper bound for the doubling delay.
    pub max_delay_ms: u64,
    /// Retries allowed before the connection is declared failed.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 5000,
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> u64 {
        let exp = attempt.saturating_sub(1).min(31);
        self.initial_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms)
    }
}

/// Tunables for the synchronization engine.
///
/// All durations are in milliseconds. Every field has a default, so a config
/// file only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// WebSocket endpoint of the relay server.
    pub endpoint: String,
    /// Minimum spacing between outbound scene emissions.
    pub drawing_throttle_ms: u64,
    /// How long the echo guard stays set after a remote snapshot is applied.
    pub settle_ms: u64,
    /// Room-state messages closer together than this are treated as duplicates.
    pub room_state_debounce_ms: u64,
    /// Minimum spacing between outbound pointer updates.
    pub pointer_interval_ms: u64,
    /// Presence entries older than this are evicted.
    pub presence_ttl_ms: u64,
    /// Interval of the presence eviction sweep.
    pub presence_sweep_ms: u64,
    /// Interval of the remote cursor screen-position refresh.
    pub cursor_refresh_ms: u64,
    /// Idle time after the last keystroke before `typing(false)` is sent.
    pub typing_idle_ms: u64,
    /// Number of leading elements whose identity enters the scene fingerprint.
    pub fingerprint_prefix: usize,
    pub reconnect: ReconnectPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            drawing_throttle_ms: 100,
            settle_ms: 200,
            room_state_debounce_ms: 100,
            pointer_interval_ms: 50,
            presence_ttl_ms: 2000,
            presence_sweep_ms: 1000,
            cursor_refresh_ms: 100,
            typing_idle_ms: 2000,
            fingerprint_prefix: 8,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl SyncConfig {
    /// Parse a JSON config and validate it.
    pub fn from_json(json: &str) -> SyncResult<Self> {
        let config: SyncConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        log::info!("Loaded sync config from {}", path.display());
        Self::from_json(&json)
    }

    /// Apply overrides from the process environment.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(endpoint) = std::env::var(ENDPOINT_ENV) {
            if !endpoint.trim().is_empty() {
                self.endpoint = endpoint;
            }
        }
        self
    }

    /// Reject values that would make the engine spin or never connect.
    pub fn validate(&self) -> SyncResult<()> {
        if self.drawing_throttle_ms == 0 {
            return Err(SyncError::Config("drawing_throttle_ms must be > 0".into()));
        }
        if self.presence_sweep_ms == 0 || self.cursor_refresh_ms == 0 {
            return Err(SyncError::Config("presence timers must be > 0".into()));
        }
        if self.reconnect.max_attempts == 0 {
            return Err(SyncError::Config("reconnect.max_attempts must be > 0".into()));
        }
        if self.reconnect.initial_delay_ms > self.reconnect.max_delay_ms {
            return Err(SyncError::Config(format!(
                "reconnect.initial_delay_ms ({}) exceeds max_delay_ms ({})",
                self.reconnect.initial_delay_ms, self.reconnect.max_delay_ms
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.drawing_throttle_ms, 100);
        assert_eq!(config.settle_ms, 200);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = SyncConfig::from_json(r#"{"settle_ms": 350, "reconnect": {"max_attempts": 3}}"#).unwrap();
        assert_eq!(config.settle_ms, 350);
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.initial_delay_ms, 1000);
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = SyncConfig::from_json(r#"{"drawing_throttle_ms": 0}"#).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));

        let err = SyncConfig::from_json(r#"{"reconnect": {"initial_delay_ms": 9000}}"#).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"endpoint": "wss://example.test/ws"}}"#).unwrap();
        let config = SyncConfig::load(file.path()).unwrap();
        assert_eq!(config.endpoint, "wss://example.test/ws");
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(1), 1000);
        assert_eq!(policy.delay_for(2), 2000);
        assert_eq!(policy.delay_for(3), 4000);
        assert_eq!(policy.delay_for(4), 5000);
        assert_eq!(policy.delay_for(40), 5000);
    }
}
