//! Shared building blocks for the gate monitor.
//!
//! - [`EventBus`]: synchronous, channel-keyed publish/subscribe registry
//! - [`StreamConnection`]: WebSocket connection manager with an explicit status state machine
//! - [`WsHandler`]: trait the connection calls for every inbound frame

pub mod connection;
pub mod error;
pub mod event_bus;
pub mod status;
pub mod ws_handler;

pub use connection::{ConnectionConfig, StreamConnection};
pub use error::{Error, Result};
pub use event_bus::{EventBus, EventName, SubscriberId, Subscription};
pub use status::{ConnectionState, ConnectionStatus, ReconnectPolicy, MAX_RECONNECT_ATTEMPTS_MESSAGE};
pub use ws_handler::WsHandler;
