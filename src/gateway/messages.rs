//! Health check and outbound message endpoint.

use super::AppState;
use super::error::ApiError;
use crate::whatsapp::MessageContent;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRequest {
    pub text: Option<String>,
    /// Base64 payload, optionally wrapped in a `data:<mime>;base64,` URI
    pub media: Option<String>,
    pub media_type: Option<String>,
    pub caption: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub content: Option<ContentRequest>,
    #[serde(default)]
    pub device_id: Option<String>,
}

fn decode_media(media: &str) -> Result<Vec<u8>, ApiError> {
    let encoded = match media.strip_prefix("data:") {
        Some(uri) => uri
            .split_once(";base64,")
            .map(|(_, data)| data)
            .ok_or_else(|| ApiError::bad_request("media data URI must be base64 encoded"))?,
        None => media,
    };
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| ApiError::bad_request(format!("invalid base64 media: {}", e)))
}

impl ContentRequest {
    fn into_content(self) -> Result<MessageContent, ApiError> {
        let media = self.media.as_deref().map(decode_media).transpose()?;
        Ok(MessageContent {
            text: self.text,
            media,
            media_type: self.media_type,
            caption: self.caption,
        })
    }
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "online",
        "uptime": state.started_at.elapsed().as_secs(),
        "timestamp": Utc::now(),
    }))
}

pub async fn send_message(
    State(state): State<AppState>,
    Json(request): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let to = request
        .to
        .filter(|to| !to.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("field \"to\" is required"))?;
    let content = request.content.unwrap_or_default().into_content()?;

    let message = state
        .send_message
        .execute(&to, content, request.device_id.as_deref())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "message": message })),
    ))
}
