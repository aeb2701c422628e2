//! LLM Backend
//!
//! Auto-reply generation for inbound messages.

mod http;

pub use http::{APOLOGY_REPLY, HttpLlmAdapter, MISSING_RESPONSE, UNAVAILABLE_REPLY};

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Where an inbound message came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContext {
    pub from: String,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
}

/// Generates a reply for an inbound text.
///
/// Implementations should turn backend failures into a user-facing
/// fallback text; an `Err` is logged by the caller and no reply is sent.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmService: Send + Sync {
    async fn process_message(&self, text: &str, context: &MessageContext) -> Result<String>;
}
