//! Stream handler that turns inbound frames into bus events.
//!
//! Every text frame is normalized; accepted events are published on the
//! `gate_event` channel only after they are fully validated. Rejected frames
//! are logged and counted, never surfaced to the connection.

use crate::normalize::parse_frame;
use crate::schema::GateAccessEvent;
use async_trait::async_trait;
use common::error::Result;
use common::{EventBus, EventName, WsHandler};
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default backend streaming endpoint.
pub const DEFAULT_WS_URL: &str = "ws://abt.nopales.tech/api/v1/webhook/ws";

pub struct GateEventHandler {
    url: String,
    bus: Arc<EventBus<GateAccessEvent>>,
}

impl GateEventHandler {
    pub fn new(url: impl Into<String>, bus: Arc<EventBus<GateAccessEvent>>) -> Self {
        Self {
            url: url.into(),
            bus,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus<GateAccessEvent>> {
        &self.bus
    }

    /// Normalize and publish one frame. Returns true if an event was published.
    pub fn dispatch(&self, msg: &str) -> bool {
        let event = match parse_frame(msg) {
            Ok(event) => event,
            Err(e) => {
                if e.is_malformed() {
                    warn!("Error parsing WebSocket message: {}", e);
                } else {
                    debug!("Dropping frame: {}", e);
                }
                counter!("gate_frames_dropped_total", "reason" => e.reason()).increment(1);
                return false;
            }
        };

        debug!(
            "Gate event {} for gate {} (camera {})",
            event.event_type, event.gate_id, event.camera_id
        );

        let delivered = self.bus.publish(EventName::GateEvent, &event);
        counter!("gate_events_published_total", "event_type" => event.event_type.metric_label())
            .increment(1);
        debug!("Delivered {} event to {} subscribers", event.event_type, delivered);
        true
    }
}

#[async_trait]
impl WsHandler for GateEventHandler {
    fn url(&self) -> &str {
        &self.url
    }

    async fn on_message(&self, msg: &str) -> Result<()> {
        self.dispatch(msg);
        Ok(())
    }

    async fn on_connect(&self) {
        info!("Gate event stream connected: {}", self.url);
    }

    async fn on_disconnect(&self, requested: bool) {
        if requested {
            info!("Gate event stream closed: {}", self.url);
        } else {
            warn!("Gate event stream lost: {}", self.url);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EventType;
    use std::sync::Mutex;

    fn handler_with_recorder() -> (GateEventHandler, Arc<Mutex<Vec<GateAccessEvent>>>) {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = bus.subscribe(EventName::GateEvent, move |e: &GateAccessEvent| {
            sink.lock().unwrap().push(e.clone());
            Ok(())
        });
        (GateEventHandler::new(DEFAULT_WS_URL, bus), seen)
    }

    #[tokio::test]
    async fn test_valid_frame_is_published() {
        let (handler, seen) = handler_with_recorder();
        handler
            .on_message(r#"{"event_type":"access_granted","gate_id":"1","camera_id":"1","message":"ok"}"#)
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].event_type, EventType::AccessGranted);
        assert!(!seen[0].timestamp.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_frames_never_reach_subscribers() {
        let (handler, seen) = handler_with_recorder();
        for frame in [
            "garbage",
            r#"{"gate_id":"1","camera_id":"1"}"#,
            r#"{"event_type":"access_granted","camera_id":"1"}"#,
            r#"{"event_type":"access_granted","gate_id":"1"}"#,
        ] {
            assert!(handler.on_message(frame).await.is_ok());
            assert!(!handler.dispatch(frame));
        }
        assert!(seen.lock().unwrap().is_empty());

        assert!(handler.dispatch(r#"{"event_type":"exit_completed","gate_id":"1","camera_id":"1"}"#));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_events_delivered_in_publish_order() {
        let (handler, seen) = handler_with_recorder();
        handler.dispatch(r#"{"event_type":"access_granted","gate_id":"1","camera_id":"1"}"#);
        handler.dispatch(r#"{"event_type":"access_denied","gate_id":"2","camera_id":"2"}"#);
        handler.dispatch(r#"{"event_type":"exit_completed","gate_id":"1","camera_id":"1"}"#);

        let kinds: Vec<EventType> = seen.lock().unwrap().iter().map(|e| e.event_type.clone()).collect();
        assert_eq!(
            kinds,
            vec![EventType::AccessGranted, EventType::AccessDenied, EventType::ExitCompleted]
        );
    }

    #[test]
    fn test_url() {
        let handler = GateEventHandler::new("ws://localhost:9000/ws", Arc::new(EventBus::new()));
        assert_eq!(handler.url(), "ws://localhost:9000/ws");
    }
}
