//! Gate backend webhook API.

pub mod client;
pub mod types;

pub use client::{WebhookClient, API_BASE_URL};
pub use types::{
    AccessOutcome, AccessStatus, ApiResponse, FaceImage, GateAccessRequest, RequestEventType,
    TestBroadcastData,
};
