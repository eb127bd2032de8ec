//! Inbound frame parsing and validation.
//!
//! A frame is accepted when it is a JSON object carrying a string `event_type`
//! and non-empty `gate_id` and `camera_id`. Everything else is optional and
//! tolerated when malformed: a field of the wrong type is dropped from the
//! event (or the timestamp re-stamped) rather than rejecting the frame.

use crate::error::{NormalizeError, Result};
use crate::schema::{AccessResult, EventType, GateAccessEvent};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct RawGateEvent {
    #[serde(default)]
    event_type: Option<String>,
    #[serde(default)]
    gate_id: Option<Value>,
    #[serde(default)]
    camera_id: Option<Value>,
    #[serde(default)]
    user_id: Option<Value>,
    #[serde(default)]
    access_result: Option<Value>,
    #[serde(default)]
    message: Option<Value>,
    #[serde(default)]
    timestamp: Option<Value>,
    #[serde(default)]
    webhook_id: Option<Value>,
}

/// Identifiers arrive as strings, occasionally as bare numbers.
fn identifier(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// String value of an optional field. Any other JSON type is dropped with a warning.
fn optional_string(value: Option<Value>, field: &str, gate_id: &str) -> Option<String> {
    match value? {
        Value::String(s) => Some(s),
        Value::Null => None,
        other => {
            warn!("Ignoring non-string {} for gate {}: {}", field, gate_id, other);
            None
        }
    }
}

/// RFC 3339 timestamp with millisecond precision, e.g. `2024-01-01T00:00:00.000Z`.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse and validate one frame, stamping missing timestamps with `received_at`.
pub fn normalize_frame(payload: &str, received_at: DateTime<Utc>) -> Result<GateAccessEvent> {
    let value: Value = serde_json::from_str(payload)?;
    if !value.is_object() {
        return Err(NormalizeError::NotAnObject);
    }
    let raw: RawGateEvent = serde_json::from_value(value)?;

    let event_type = raw
        .event_type
        .filter(|s| !s.is_empty())
        .ok_or(NormalizeError::MissingField("event_type"))?;
    let gate_id = identifier(raw.gate_id).ok_or(NormalizeError::MissingField("gate_id"))?;
    let camera_id = identifier(raw.camera_id).ok_or(NormalizeError::MissingField("camera_id"))?;
    let event_type = EventType::from(event_type);
    if !event_type.is_known() {
        debug!("Unrecognized event_type {} for gate {}", event_type, gate_id);
    }

    let access_result = match raw.access_result {
        None | Some(Value::Null) => None,
        Some(value) => match serde_json::from_value::<AccessResult>(value) {
            Ok(result) => Some(result),
            Err(e) => {
                warn!("Ignoring malformed access_result for gate {}: {}", gate_id, e);
                None
            }
        },
    };

    let user_id = match raw.user_id {
        None | Some(Value::Null) => None,
        Some(value) => {
            let id = value.as_i64();
            if id.is_none() {
                warn!("Ignoring non-integer user_id for gate {}: {}", gate_id, value);
            }
            id
        }
    };

    let timestamp = optional_string(raw.timestamp, "timestamp", &gate_id)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| format_timestamp(received_at));
    let message = optional_string(raw.message, "message", &gate_id).unwrap_or_default();
    let webhook_id = optional_string(raw.webhook_id, "webhook_id", &gate_id);

    Ok(GateAccessEvent {
        event_type,
        gate_id,
        camera_id,
        user_id,
        access_result,
        message,
        timestamp,
        webhook_id,
    })
}

/// [`normalize_frame`] stamped with the current time.
pub fn parse_frame(payload: &str) -> Result<GateAccessEvent> {
    normalize_frame(payload, Utc::now())
}
