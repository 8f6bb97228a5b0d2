//! Peer-session configuration.
//!
//! Configuration is loaded from environment variables with defaults for
//! every field. Unparseable numeric values fall back to the default.

use common::types::RoomId;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default coordinator mailbox capacity.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Default presentation event broadcast capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 128;

/// Default time a call may stay pending before it is abandoned.
pub const DEFAULT_PENDING_CALL_TIMEOUT_SECONDS: u64 = 30;

/// Default interval between pending-call checks.
pub const DEFAULT_PENDING_CHECK_INTERVAL_SECONDS: u64 = 5;

/// Default maximum chat message length, in characters.
pub const DEFAULT_CHAT_MAX_LEN: usize = 2000;

/// Default room joined by the demo binary.
pub const DEFAULT_ROOM_ID: &str = "test";

/// Peer-session configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Coordinator mailbox capacity (default: 256).
    pub mailbox_capacity: usize,

    /// Presentation event broadcast capacity (default: 128).
    pub event_capacity: usize,

    /// How long a call may stay `Pending` before it is abandoned.
    /// Zero disables abandonment.
    pub pending_call_timeout: Duration,

    /// How often pending calls are checked against the timeout.
    pub pending_check_interval: Duration,

    /// Maximum chat message length in characters.
    pub chat_max_len: usize,

    /// Room joined by the demo binary.
    pub room_id: RoomId,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            pending_call_timeout: Duration::from_secs(DEFAULT_PENDING_CALL_TIMEOUT_SECONDS),
            pending_check_interval: Duration::from_secs(DEFAULT_PENDING_CHECK_INTERVAL_SECONDS),
            chat_max_len: DEFAULT_CHAT_MAX_LEN,
            room_id: RoomId::new(DEFAULT_ROOM_ID),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Period of the pending-call check. A zero interval falls back to
    /// the default.
    #[must_use]
    pub fn pending_check_period(&self) -> Duration {
        if self.pending_check_interval.is_zero() {
            Duration::from_secs(DEFAULT_PENDING_CHECK_INTERVAL_SECONDS)
        } else {
            self.pending_check_interval
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mailbox_capacity = vars
            .get("PEER_SESSION_MAILBOX_CAPACITY")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAILBOX_CAPACITY);

        // tokio channels panic on a zero capacity
        if mailbox_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "PEER_SESSION_MAILBOX_CAPACITY must be greater than zero".to_string(),
            ));
        }

        let event_capacity = vars
            .get("PEER_SESSION_EVENT_CAPACITY")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_EVENT_CAPACITY);

        if event_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "PEER_SESSION_EVENT_CAPACITY must be greater than zero".to_string(),
            ));
        }

        let pending_call_timeout_seconds = vars
            .get("PEER_SESSION_PENDING_CALL_TIMEOUT_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PENDING_CALL_TIMEOUT_SECONDS);

        let pending_check_interval_seconds = vars
            .get("PEER_SESSION_PENDING_CHECK_INTERVAL_SECONDS")
            .and_then(|s| s.parse().ok())
            .filter(|secs: &u64| *secs > 0)
            .unwrap_or(DEFAULT_PENDING_CHECK_INTERVAL_SECONDS);

        let chat_max_len = vars
            .get("PEER_SESSION_CHAT_MAX_LEN")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CHAT_MAX_LEN);

        let room_id = vars
            .get("PEER_SESSION_ROOM_ID")
            .filter(|s| !s.trim().is_empty())
            .map_or_else(|| RoomId::new(DEFAULT_ROOM_ID), |s| RoomId::new(s.trim()));

        Ok(Config {
            mailbox_capacity,
            event_capacity,
            pending_call_timeout: Duration::from_secs(pending_call_timeout_seconds),
            pending_check_interval: Duration::from_secs(pending_check_interval_seconds),
            chat_max_len,
            room_id,
        })
    }
}
