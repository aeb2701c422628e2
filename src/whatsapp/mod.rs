//! WhatsApp Sessions
//!
//! Multi-device session layer: the provider capability the protocol client
//! plugs into, the session registry with its QR/authentication lifecycle,
//! and the event router that fans connection events out to consumers.

pub mod events;
pub mod message;
pub mod phone;
pub mod provider;
pub mod qr;
mod registry;
pub mod service;
pub mod session;

pub use events::{EventRouter, EventScope, SessionEvent, SessionEventKind, Subscription};
pub use message::{ContentKind, Message, MessageContent};
pub use phone::format_phone_number;
pub use provider::{
    Connection, MediaPayload, OutboundPayload, ProviderEvent, ProviderHandle, ProviderIdentity,
    WhatsAppProvider,
};
pub use registry::{LifecycleSettings, SessionRegistry, UNKNOWN_PHONE};
pub use service::WhatsAppService;
pub use session::{SessionInfo, SessionState};
