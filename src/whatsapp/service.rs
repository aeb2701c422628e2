//! WhatsApp service seam
//!
//! The operations use cases and HTTP handlers need from the session layer.
//! `SessionRegistry` is the production implementation.

use super::events::{EventScope, Subscription};
use super::message::Message;
use super::provider::MediaPayload;
use super::session::SessionInfo;
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait WhatsAppService: Send + Sync {
    /// Start a session. Without an id a fresh one is generated and becomes
    /// the default. Returns the session id.
    async fn initialize(&self, session_id: Option<&str>) -> Result<String>;

    /// Current QR value, empty when none is available
    async fn get_qr_code(&self, session_id: Option<&str>) -> String;

    async fn is_authenticated(&self, session_id: Option<&str>) -> bool;

    /// Tracked session ids, oldest first
    async fn get_active_sessions(&self) -> Vec<String>;

    /// Tear a session down. `Ok(false)` reports a failure that was handled.
    async fn close_session(&self, session_id: &str) -> Result<bool>;

    async fn get_session_info(&self, session_id: &str) -> Result<SessionInfo>;

    async fn get_default_session(&self) -> Result<String>;

    async fn set_default_session(&self, session_id: &str) -> Result<()>;

    async fn send_text_message(
        &self,
        to: &str,
        text: &str,
        session_id: Option<&str>,
    ) -> Result<Message>;

    async fn send_media_message(
        &self,
        to: &str,
        media: MediaPayload,
        session_id: Option<&str>,
    ) -> Result<Message>;

    fn subscribe(&self, scope: EventScope) -> Subscription;
}
