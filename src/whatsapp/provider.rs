//! Provider capability
//!
//! The WhatsApp protocol client is supplied by the embedding program. The
//! registry only needs to open a connection per session, drive it through
//! the handle, and consume its event stream.

use super::message::{DEFAULT_MEDIA_TYPE, Message};
use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Lifecycle and traffic events emitted by one provider connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// Raw QR payload (or an already renderable `data:image` URI)
    Qr(String),
    Authenticated,
    Ready,
    Disconnected(String),
    Message(Message),
    Error(String),
}

/// Identity snapshot of the logged-in account
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderIdentity {
    pub phone_number: Option<String>,
    pub push_name: Option<String>,
}

/// Media attachment for an outbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPayload {
    pub data: Vec<u8>,
    pub mime_type: String,
    pub caption: Option<String>,
}

impl MediaPayload {
    pub fn new(data: Vec<u8>, mime_type: Option<String>, caption: Option<String>) -> Self {
        Self {
            data,
            mime_type: mime_type.unwrap_or_else(|| DEFAULT_MEDIA_TYPE.to_string()),
            caption,
        }
    }
}

/// Outbound message body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundPayload {
    Text(String),
    Media(MediaPayload),
}

/// Live connection for one session
#[async_trait]
pub trait ProviderHandle: Send + Sync {
    /// Start the client. Completes once the provider has finished booting;
    /// QR and authentication follow as events.
    async fn initialize(&self) -> Result<()>;

    /// Send to an already formatted recipient id
    async fn send_message(&self, to: &str, payload: OutboundPayload) -> Result<Message>;

    async fn destroy(&self) -> Result<()>;

    /// Identity of the logged-in account, absent before authentication
    fn info(&self) -> Option<ProviderIdentity>;

    /// Whether the underlying page/context is open and usable
    async fn is_open(&self) -> bool;
}

/// A freshly opened connection and its event stream
pub struct Connection {
    pub handle: Arc<dyn ProviderHandle>,
    pub events: mpsc::UnboundedReceiver<ProviderEvent>,
}

/// Factory for provider connections
#[async_trait]
pub trait WhatsAppProvider: Send + Sync {
    /// Open a connection whose credentials live under `credentials_dir`
    async fn connect(&self, session_id: &str, credentials_dir: &Path) -> Result<Connection>;
}
