//! In-memory session records owned by the registry.

use super::provider::ProviderHandle;
use super::qr::QrTimers;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Connection lifecycle of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    AwaitingScan,
    Authenticated,
    Ready,
    Disconnected,
}

pub(crate) struct SessionEntry {
    pub handle: Arc<dyn ProviderHandle>,
    /// Distinguishes this connection from earlier ones under the same id
    pub generation: u64,
    pub state: SessionState,
    pub current_qr: String,
    pub phone_number: Option<String>,
    pub device_name: Option<String>,
    /// Present only while waiting for a scan
    pub qr_timers: Option<QrTimers>,
}

impl SessionEntry {
    pub fn new(handle: Arc<dyn ProviderHandle>, generation: u64) -> Self {
        Self {
            handle,
            generation,
            state: SessionState::Connecting,
            current_qr: String::new(),
            phone_number: None,
            device_name: None,
            qr_timers: None,
        }
    }
}

/// Insertion-ordered session map; listing order is creation order
#[derive(Default)]
pub(crate) struct SessionTable {
    entries: HashMap<String, SessionEntry>,
    order: Vec<String>,
}

impl SessionTable {
    pub fn contains(&self, session_id: &str) -> bool {
        self.entries.contains_key(session_id)
    }

    pub fn get(&self, session_id: &str) -> Option<&SessionEntry> {
        self.entries.get(session_id)
    }

    pub fn get_mut(&mut self, session_id: &str) -> Option<&mut SessionEntry> {
        self.entries.get_mut(session_id)
    }

    /// Entry for `session_id` only if it still belongs to `generation`
    pub fn current_mut(&mut self, session_id: &str, generation: u64) -> Option<&mut SessionEntry> {
        self.entries
            .get_mut(session_id)
            .filter(|entry| entry.generation == generation)
    }

    pub fn insert(&mut self, session_id: String, entry: SessionEntry) {
        if self.entries.insert(session_id.clone(), entry).is_none() {
            self.order.push(session_id);
        }
    }

    pub fn remove(&mut self, session_id: &str) -> Option<SessionEntry> {
        let entry = self.entries.remove(session_id)?;
        self.order.retain(|id| id != session_id);
        Some(entry)
    }

    pub fn ids(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SessionEntry)> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id).map(|entry| (id, entry)))
    }
}

/// Display snapshot combining runtime state with the device record
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: String,
    pub phone_number: String,
    pub name: String,
    pub state: SessionState,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_connected: DateTime<Utc>,
}
