//! Clients for the gate backend's REST API.
//!
//! The webhook endpoints let operators inject events by hand: a broadcast
//! message, a synthetic gate access event, or a face image for the live
//! recognition path. Every call resolves to an [`ApiResponse`] envelope.
//!
//! # Example
//!
//! ```ignore
//! use external_services::webhook::WebhookClient;
//!
//! let client = WebhookClient::new();
//! let response = client.test_broadcast("ping").await;
//! if !response.success {
//!     eprintln!("broadcast failed: {:?}", response.error);
//! }
//! ```

pub mod error;
pub mod webhook;

pub use error::{Error, Result};
pub use webhook::{
    AccessOutcome, AccessStatus, ApiResponse, FaceImage, GateAccessRequest, RequestEventType,
    TestBroadcastData, WebhookClient, API_BASE_URL,
};
