use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of the remote session endpoint to attach to.
///
/// The wire protocol uses a numeric id; `UNSET` is the sentinel carried
/// while no target has been chosen. Connecting to the sentinel fails fast
/// without touching the network.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SessionTarget(pub i64);

impl SessionTarget {
    pub const UNSET: SessionTarget = SessionTarget(-1);

    pub fn is_unset(&self) -> bool {
        *self == Self::UNSET
    }
}

impl fmt::Display for SessionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unset() {
            write!(f, "unset")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub target: SessionTarget,
    pub connected_at: DateTime<Utc>,
}

/// Observable state of the single logical session connection.
///
/// Owned exclusively by the `ConnectionManager`; transitions are the only
/// way the value changes.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected(ConnectionInfo),
    Disconnected,
    #[serde(rename_all = "camelCase")]
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        cause: Option<String>,
    },
}

impl ConnectionState {
    pub fn error(message: impl Into<String>) -> Self {
        ConnectionState::Error {
            message: message.into(),
            cause: None,
        }
    }

    pub fn error_caused_by(message: impl Into<String>, cause: impl ToString) -> Self {
        ConnectionState::Error {
            message: message.into(),
            cause: Some(cause.to_string()),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected(_))
    }
}

/// Bounded-attempt exponential backoff policy for connection establishment.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay to wait after the k-th failed attempt (k starting at 0):
    /// `initial * 2^k`, capped at `max_delay`.
    pub fn delay_after(&self, failed_attempts: u32) -> Duration {
        let doubled = self
            .initial_delay
            .saturating_mul(1u32.checked_shl(failed_attempts).unwrap_or(u32::MAX));
        doubled.min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}
