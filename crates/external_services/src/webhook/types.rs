//! Request and response types for the webhook API.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::Path;

/// Uniform result of every webhook call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl Display) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
        }
    }
}

impl<T> From<Result<T>> for ApiResponse<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::failure(e),
        }
    }
}

/// Echo returned by `POST /webhook/test-broadcast`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestBroadcastData {
    pub message: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct TestBroadcastRequest<'a> {
    pub message: &'a str,
}

/// Event types the webhook accepts for synthetic gate events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestEventType {
    AccessGranted,
    AccessDenied,
    ExitCompleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessStatus {
    Success,
    Failed,
}

/// Simplified decision attached to a synthetic gate event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessOutcome {
    pub status: AccessStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Body of `POST /webhook/gate-access`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateAccessRequest {
    pub event_type: RequestEventType,
    pub gate_id: String,
    pub camera_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_result: Option<AccessOutcome>,
    pub message: String,
}

/// Face image uploaded to `POST /gates/access`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceImage {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub mime_type: String,
}

impl FaceImage {
    pub fn new(bytes: Vec<u8>, file_name: impl Into<String>) -> Self {
        let file_name = file_name.into();
        let mime_type = mime_for(&file_name).to_string();
        Self {
            bytes,
            file_name,
            mime_type,
        }
    }

    /// Read an image from disk, inferring its MIME type from the extension.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "face.jpg".to_string());
        Ok(Self::new(bytes, file_name))
    }
}

fn mime_for(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}
