//! Gate backend webhook REST client.
//!
//! Calls are fire-and-forget: no retries, and every failure (transport,
//! non-2xx status, undecodable body) is reported through the returned
//! [`ApiResponse`] rather than an `Err`.

use crate::error::{Error, Result};
use crate::webhook::types::{
    ApiResponse, FaceImage, GateAccessRequest, TestBroadcastData, TestBroadcastRequest,
};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

/// Base URL of the gate backend API.
pub const API_BASE_URL: &str = "http://abt.nopales.tech/api/v1";

#[derive(Debug, Clone)]
pub struct WebhookClient {
    http: reqwest::Client,
    base_url: String,
}

impl Default for WebhookClient {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookClient {
    pub fn new() -> Self {
        Self::with_base_url(API_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `POST /webhook/test-broadcast`: ask the backend to echo `message` to every stream client.
    pub async fn test_broadcast(&self, message: &str) -> ApiResponse<TestBroadcastData> {
        self.post_json("/webhook/test-broadcast", &TestBroadcastRequest { message })
            .await
            .into()
    }

    /// `POST /webhook/gate-access`: inject a synthetic gate event.
    pub async fn send_gate_access_event(
        &self,
        request: &GateAccessRequest,
    ) -> ApiResponse<serde_json::Value> {
        self.post_json("/webhook/gate-access", request).await.into()
    }

    /// `POST /gates/access`: submit a face image through the live recognition path.
    pub async fn trigger_gate_access(
        &self,
        image: FaceImage,
        gate_id: &str,
        camera_id: &str,
    ) -> ApiResponse<serde_json::Value> {
        self.post_face_image(image, gate_id, camera_id).await.into()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        debug!("POST {}", url);
        let response = self.http.post(&url).json(body).send().await?;
        Self::decode(response).await
    }

    async fn post_face_image(
        &self,
        image: FaceImage,
        gate_id: &str,
        camera_id: &str,
    ) -> Result<serde_json::Value> {
        let url = self.url("/gates/access");
        debug!(
            "POST {} ({} bytes, gate {}, camera {})",
            url,
            image.bytes.len(),
            gate_id,
            camera_id
        );

        let part = Part::bytes(image.bytes)
            .file_name(image.file_name)
            .mime_str(&image.mime_type)?;
        let form = Form::new()
            .part("face_images", part)
            .text("gate_id", gate_id.to_string())
            .text("camera_id", camera_id.to_string());

        let response = self.http.post(&url).multipart(form).send().await?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            warn!("{} returned status {}", response.url(), status);
            return Err(Error::Status(status.as_u16()));
        }
        Ok(response.json().await?)
    }
}
