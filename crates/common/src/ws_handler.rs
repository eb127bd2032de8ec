//! WebSocket handler trait for stream consumers.

use crate::error::Result;
use async_trait::async_trait;

/// Trait that stream consumers implement to handle WebSocket events.
/// The [`StreamConnection`](crate::StreamConnection) calls these methods when events occur.
#[async_trait]
pub trait WsHandler: Send + Sync + 'static {
    /// Returns the WebSocket URL to connect to.
    fn url(&self) -> &str;

    /// Returns the message to send immediately after the handshake.
    /// Return None if no initial message is needed.
    fn on_connect_message(&self) -> Option<String> {
        None
    }

    /// Called when a text frame is received.
    ///
    /// An error here is logged by the connection and never ends the session.
    async fn on_message(&self, msg: &str) -> Result<()>;

    /// Called when a binary frame is received.
    /// Default implementation ignores binary frames.
    async fn on_binary_message(&self, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    /// Called after every successful handshake.
    async fn on_connect(&self) {}

    /// Called when an established connection ends.
    ///
    /// `requested` is true when the session was ended by `disconnect()`, false
    /// when the server closed the stream or the transport failed.
    async fn on_disconnect(&self, _requested: bool) {}
}
