//! Gate access events: schema, frame normalization and the stream handler
//! that publishes them on the event bus.
//!
//! ```text
//! WebSocket frame --> normalize_frame --> GateAccessEvent --> EventBus("gate_event")
//! ```

pub mod error;
pub mod handler;
pub mod history;
pub mod normalize;
pub mod schema;

pub use error::NormalizeError;
pub use handler::{GateEventHandler, DEFAULT_WS_URL};
pub use history::{EventHistory, DEFAULT_HISTORY_CAPACITY};
pub use normalize::{format_timestamp, normalize_frame, parse_frame};
pub use schema::{AccessResult, EventType, GateAccessEvent, TransactionId};

/// Bus type carrying gate events.
pub type GateEventBus = common::EventBus<GateAccessEvent>;
