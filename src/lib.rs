//! wa-gateway
//!
//! Multi-device WhatsApp gateway: one long-lived protocol session per
//! linked device, QR-driven authentication, device persistence in SQLite,
//! an HTTP API for sending messages and managing devices, and LLM-backed
//! auto-replies to inbound messages.
//!
//! The protocol client itself is supplied by the embedding program through
//! [`whatsapp::WhatsAppProvider`]; [`app::run`] wires everything else.

pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod llm;
pub mod logging;
pub mod usecases;
pub mod whatsapp;

#[cfg(test)]
mod tests;

pub use config::Config;
pub use error::{GatewayError, Result};
