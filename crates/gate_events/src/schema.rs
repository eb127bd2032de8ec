//! Canonical gate access event definitions.

use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Kind of gate event. Drives gate state transitions.
///
/// Kinds this crate does not know are kept as [`EventType::Other`] so bus
/// consumers still see them; gate controllers ignore them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    AccessGranted,
    AccessDenied,
    ExitCompleted,
    TestBroadcast,
    Other(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::Other(kind) => kind,
            known => known.metric_label(),
        }
    }

    /// Bounded label for metrics; every unknown kind maps to `other`.
    pub fn metric_label(&self) -> &'static str {
        match self {
            EventType::AccessGranted => "access_granted",
            EventType::AccessDenied => "access_denied",
            EventType::ExitCompleted => "exit_completed",
            EventType::TestBroadcast => "test_broadcast",
            EventType::Other(_) => "other",
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, EventType::Other(_))
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        match s {
            "access_granted" => EventType::AccessGranted,
            "access_denied" => EventType::AccessDenied,
            "exit_completed" => EventType::ExitCompleted,
            "test_broadcast" => EventType::TestBroadcast,
            other => EventType::Other(other.to_string()),
        }
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        match EventType::from(s.as_str()) {
            EventType::Other(_) => EventType::Other(s),
            known => known,
        }
    }
}

impl From<EventType> for String {
    fn from(event_type: EventType) -> Self {
        match event_type {
            EventType::Other(kind) => kind,
            known => known.metric_label().to_string(),
        }
    }
}

impl FromStr for EventType {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(EventType::from(s))
    }
}

/// Wallet transaction identifier; the backend sends either form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransactionId {
    Number(i64),
    Text(String),
}

/// Outcome details attached to an access event.
///
/// A loose union of access-decision and wallet-transaction facts: every field
/// is independently optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_granted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    /// Face match similarity in 0..1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_db_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_completed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_deducted: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_wallet_balance: Option<f64>,
}

/// Normalized gate access event as published on the bus.
///
/// `gate_id` and `camera_id` are guaranteed non-empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateAccessEvent {
    pub event_type: EventType,
    /// Routing key.
    pub gate_id: String,
    pub camera_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_result: Option<AccessResult>,
    #[serde(default)]
    pub message: String,
    /// ISO 8601; receipt time when the backend omitted it.
    pub timestamp: String,
    /// Present when the event came through the webhook/test path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_id: Option<String>,
}

impl GateAccessEvent {
    pub fn is_for_gate(&self, gate_id: &str) -> bool {
        self.gate_id == gate_id
    }
}
