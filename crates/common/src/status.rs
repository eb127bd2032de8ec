//! Connection status exposed to consumers of a [`StreamConnection`](crate::StreamConnection).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Lifecycle state of the streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Error => write!(f, "error"),
        }
    }
}

/// Snapshot of the connection state plus a diagnostic for the `Error` state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub status: ConnectionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::disconnected()
    }
}

impl ConnectionStatus {
    pub fn connecting() -> Self {
        Self {
            status: ConnectionState::Connecting,
            error: None,
        }
    }

    pub fn connected() -> Self {
        Self {
            status: ConnectionState::Connected,
            error: None,
        }
    }

    pub fn disconnected() -> Self {
        Self {
            status: ConnectionState::Disconnected,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ConnectionState::Error,
            error: Some(message.into()),
        }
    }

    /// True while a transport is open or being opened.
    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            ConnectionState::Connecting | ConnectionState::Connected
        )
    }
}

/// Message reported once an automatic reconnection policy gives up.
pub const MAX_RECONNECT_ATTEMPTS_MESSAGE: &str = "Max reconnection attempts reached";

/// What to do after a session ends on its own (server close or transport error).
///
/// The default is [`ReconnectPolicy::Disabled`]: the status stays at
/// `disconnected`/`error` until someone calls `connect()` again.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReconnectPolicy {
    #[default]
    Disabled,
    /// Retry with delay `min(initial_delay * 2^attempt, max_delay)`, attempt starting at 1.
    ExponentialBackoff {
        initial_delay: Duration,
        max_delay: Duration,
        max_attempts: u32,
    },
}

impl ReconnectPolicy {
    /// Backoff with a 1s base doubling per attempt, capped at 30s.
    pub fn backoff(max_attempts: u32) -> Self {
        ReconnectPolicy::ExponentialBackoff {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, ReconnectPolicy::Disabled)
    }

    /// Delay before retry number `attempt` (1-based), or None when no retry should happen.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        match self {
            ReconnectPolicy::Disabled => None,
            ReconnectPolicy::ExponentialBackoff {
                initial_delay,
                max_delay,
                max_attempts,
            } => {
                if attempt == 0 || attempt > *max_attempts {
                    return None;
                }
                let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
                Some(initial_delay.saturating_mul(factor).min(*max_delay))
            }
        }
    }
}
