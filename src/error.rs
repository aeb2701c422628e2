//! Gateway Errors
//!
//! One error type for the session core, the use cases and the repository.
//! Process plumbing (config, bootstrap) uses `anyhow` instead.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the gateway core
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The provider did not finish starting the session in time
    #[error("session {session_id} did not start within {}s", timeout.as_secs())]
    InitializationTimeout {
        session_id: String,
        timeout: Duration,
    },

    #[error("session {0} not found")]
    SessionNotFound(String),

    #[error("no session available, authenticate a device first")]
    NoSessionAvailable,

    #[error("session {0} is not authenticated")]
    NotAuthenticated(String),

    #[error("no authenticated session available")]
    NoAuthenticatedSession,

    #[error("device {0} not found")]
    DeviceNotFound(String),

    #[error("device {0} is not active")]
    DeviceNotActive(String),

    #[error("no active device available")]
    NoActiveDevice,

    #[error("invalid message content: {0}")]
    InvalidContent(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("provider error: {0}")]
    Provider(String),
}

impl GatewayError {
    /// Short category label, used in API error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InitializationTimeout { .. } => "initialization_timeout",
            Self::SessionNotFound(_) => "session_not_found",
            Self::NoSessionAvailable => "no_session_available",
            Self::NotAuthenticated(_) => "not_authenticated",
            Self::NoAuthenticatedSession => "no_authenticated_session",
            Self::DeviceNotFound(_) => "device_not_found",
            Self::DeviceNotActive(_) => "device_not_active",
            Self::NoActiveDevice => "no_active_device",
            Self::InvalidContent(_) => "invalid_content",
            Self::Persistence(_) => "persistence_error",
            Self::Provider(_) => "provider_error",
        }
    }
}

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;
