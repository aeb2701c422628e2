//! Persisted device records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A logical WhatsApp account, linked to at most one live session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub name: String,
    pub session_id: String,
    pub phone_number: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_connected: Option<DateTime<Utc>>,
}

/// Fields for a new device
#[derive(Debug, Clone, Default)]
pub struct NewDevice {
    pub name: String,
    pub session_id: String,
    pub phone_number: Option<String>,
    pub is_active: bool,
}

impl NewDevice {
    pub fn new(name: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    pub fn with_phone(mut self, phone_number: impl Into<String>) -> Self {
        self.phone_number = Some(phone_number.into());
        self
    }

    pub fn active(mut self) -> Self {
        self.is_active = true;
        self
    }
}

/// Partial update. `None` leaves the column unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceUpdate {
    pub name: Option<String>,
    pub phone_number: Option<String>,
    pub is_active: Option<bool>,
    pub last_connected: Option<DateTime<Utc>>,
}

impl DeviceUpdate {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Mark connected now, optionally recording the phone number
    pub fn connected(phone_number: Option<String>) -> Self {
        Self {
            phone_number,
            is_active: Some(true),
            last_connected: Some(Utc::now()),
            ..Default::default()
        }
    }
}
