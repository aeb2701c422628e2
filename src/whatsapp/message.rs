//! Message entity shared by the send and receive paths.

use crate::error::{GatewayError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mime type used when a media payload does not name one
pub const DEFAULT_MEDIA_TYPE: &str = "application/octet-stream";

/// Message body. A sendable message carries text or media, never both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip)]
    pub media: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

/// What a validated `MessageContent` asks to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentKind<'a> {
    Text(&'a str),
    Media(&'a [u8]),
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn media(data: Vec<u8>, media_type: Option<String>, caption: Option<String>) -> Self {
        Self {
            media: Some(data),
            media_type,
            caption,
            ..Default::default()
        }
    }

    /// Non-empty text payload, if any
    pub fn text_body(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.is_empty())
    }

    /// Non-empty media payload, if any
    pub fn media_body(&self) -> Option<&[u8]> {
        self.media.as_deref().filter(|m| !m.is_empty())
    }

    /// Check that exactly one of text or media is present
    pub fn kind(&self) -> Result<ContentKind<'_>> {
        match (self.text_body(), self.media_body()) {
            (Some(text), None) => Ok(ContentKind::Text(text)),
            (None, Some(media)) => Ok(ContentKind::Media(media)),
            (Some(_), Some(_)) => Err(GatewayError::InvalidContent(
                "message must carry text or media, not both".to_string(),
            )),
            (None, None) => Err(GatewayError::InvalidContent(
                "message must carry text or media".to_string(),
            )),
        }
    }
}

/// A sent or received WhatsApp message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub from: String,
    pub to: String,
    pub content: MessageContent,
    pub timestamp: DateTime<Utc>,
    pub is_from_me: bool,
}

impl Message {
    /// Inbound text message, stamped now
    pub fn incoming_text(
        id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            from: from.into(),
            to: to.into(),
            content: MessageContent::text(text),
            timestamp: Utc::now(),
            is_from_me: false,
        }
    }
}
