//! Device management
//!
//! Device CRUD, reconnect and status reconciliation on top of the session
//! layer and the device repository.

use crate::db::{Device, DeviceRepository, DeviceUpdate, NewDevice};
use crate::error::{GatewayError, Result};
use crate::whatsapp::WhatsAppService;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Live status of one device
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    pub device: Option<Device>,
    pub is_connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
    pub is_default: bool,
}

/// Row of the all-devices status overview
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatusSummary {
    pub id: String,
    pub name: String,
    pub phone_number: Option<String>,
    pub is_active: bool,
    pub is_connected: bool,
    pub last_connected: Option<DateTime<Utc>>,
}

type StatusLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

pub struct DeviceManagement {
    whatsapp: Arc<dyn WhatsAppService>,
    devices: Arc<dyn DeviceRepository>,
    reconnect_settle: Duration,
    /// One lock per device id with a poll in flight
    status_locks: StatusLocks,
}

/// Claim on a device's status lock. The map entry is dropped with the last
/// claim, so only ids being polled right now are kept.
struct StatusLease<'a> {
    locks: &'a StatusLocks,
    id: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl<'a> StatusLease<'a> {
    fn acquire(locks: &'a StatusLocks, id: &str) -> Self {
        let lock = locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(id.to_string())
            .or_default()
            .clone();
        Self {
            locks,
            id: id.to_string(),
            lock,
        }
    }
}

impl Drop for StatusLease<'_> {
    fn drop(&mut self) {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // The map and this lease hold the only references
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.id);
        }
    }
}

impl DeviceManagement {
    pub fn new(
        whatsapp: Arc<dyn WhatsAppService>,
        devices: Arc<dyn DeviceRepository>,
        reconnect_settle: Duration,
    ) -> Self {
        Self {
            whatsapp,
            devices,
            reconnect_settle,
            status_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn require(&self, id: &str) -> Result<Device> {
        self.devices
            .find_by_id(id)
            .await?
            .ok_or_else(|| GatewayError::DeviceNotFound(id.to_string()))
    }

    pub async fn get_all_devices(&self) -> Result<Vec<Device>> {
        self.devices
            .find_all()
            .await
            .inspect_err(|e| tracing::error!("Devices: failed to list devices: {}", e))
    }

    pub async fn get_device_by_id(&self, id: &str) -> Result<Option<Device>> {
        self.devices
            .find_by_id(id)
            .await
            .inspect_err(|e| tracing::error!("Devices: failed to load device {}: {}", id, e))
    }

    /// Create a device. Without a session id a new session is started and
    /// the newest tracked session is bound to the device.
    pub async fn create_device(&self, name: &str, session_id: Option<&str>) -> Result<Device> {
        let result = async {
            let session_id = match session_id {
                Some(id) => id.to_string(),
                None => {
                    self.whatsapp.initialize(None).await?;
                    self.whatsapp
                        .get_active_sessions()
                        .await
                        .pop()
                        .ok_or(GatewayError::NoSessionAvailable)?
                }
            };
            self.bind_session(name, &session_id).await
        }
        .await;

        match &result {
            Ok(device) => tracing::info!(
                "Devices: created {} ({}) on session {}",
                device.id,
                device.name,
                device.session_id
            ),
            Err(e) => tracing::error!("Devices: failed to create device {}: {}", name, e),
        }
        result
    }

    /// Record `name` for `session_id`. The session lifecycle may already have
    /// stored a placeholder row for it (a QR during startup), which is renamed.
    async fn bind_session(&self, name: &str, session_id: &str) -> Result<Device> {
        if let Some(existing) = self.devices.find_by_session_id(session_id).await? {
            return self.devices.update(&existing.id, DeviceUpdate::rename(name)).await;
        }
        match self.devices.create(NewDevice::new(name, session_id)).await {
            Ok(device) => Ok(device),
            Err(e) => match self.devices.find_by_session_id(session_id).await? {
                Some(existing) => {
                    tracing::debug!(
                        "Devices: session {} was recorded concurrently, renaming it",
                        session_id
                    );
                    self.devices.update(&existing.id, DeviceUpdate::rename(name)).await
                }
                None => Err(e),
            },
        }
    }

    pub async fn update_device(&self, id: &str, name: &str) -> Result<Device> {
        self.devices
            .update(id, DeviceUpdate::rename(name))
            .await
            .inspect_err(|e| tracing::error!("Devices: failed to update device {}: {}", id, e))
    }

    /// Close the device's session, then delete the record
    pub async fn remove_device(&self, id: &str) -> Result<()> {
        let result = async {
            let device = self.require(id).await?;
            if !self.whatsapp.close_session(&device.session_id).await? {
                tracing::warn!(
                    "Devices: session {} of device {} was not closed cleanly",
                    device.session_id,
                    id
                );
            }
            self.devices.delete(id).await
        }
        .await;

        match &result {
            Ok(()) => tracing::info!("Devices: removed device {}", id),
            Err(e) => tracing::error!("Devices: failed to remove device {}: {}", id, e),
        }
        result
    }

    /// Restart the device's session. The device is marked active as an
    /// attempt; confirmation arrives through the authentication events.
    pub async fn reconnect_device(&self, id: &str) -> Result<Device> {
        let result = async {
            let device = self.require(id).await?;

            match self.whatsapp.close_session(&device.session_id).await {
                Ok(true) => tracing::info!(
                    "Devices: previous session {} closed for reconnect",
                    device.session_id
                ),
                Ok(false) => tracing::warn!(
                    "Devices: session {} was not running or did not close cleanly, \
                     continuing with reconnect",
                    device.session_id
                ),
                Err(e) => tracing::warn!(
                    "Devices: failed to close session {}: {}, continuing with reconnect",
                    device.session_id,
                    e
                ),
            }

            tokio::time::sleep(self.reconnect_settle).await;

            self.whatsapp.initialize(Some(&device.session_id)).await?;
            tracing::info!("Devices: session {} initialized for reconnect", device.session_id);

            let update = DeviceUpdate {
                is_active: Some(true),
                last_connected: Some(Utc::now()),
                ..Default::default()
            };
            self.devices.update(id, update).await
        }
        .await;

        result.inspect_err(|e| tracing::error!("Devices: failed to reconnect device {}: {}", id, e))
    }

    /// Live status of a device, correcting the persisted `is_active` flag
    /// when it disagrees with the session layer.
    pub async fn get_device_status(&self, id: &str) -> Result<DeviceStatus> {
        let lease = StatusLease::acquire(&self.status_locks, id);
        let _guard = lease.lock.lock().await;

        let result = async {
            let Some(device) = self.devices.find_by_id(id).await? else {
                return Ok(DeviceStatus {
                    device: None,
                    is_connected: false,
                    qr_code: None,
                    is_default: false,
                });
            };

            let session_id = device.session_id.as_str();
            let is_connected = self.whatsapp.is_authenticated(Some(session_id)).await;
            let qr_code = if is_connected {
                None
            } else {
                Some(self.whatsapp.get_qr_code(Some(session_id)).await)
            };

            let is_default = match self.whatsapp.get_default_session().await {
                Ok(default) => default == device.session_id,
                Err(e) => {
                    tracing::debug!("Devices: default session check failed: {}", e);
                    false
                }
            };

            let device = if device.is_active != is_connected {
                tracing::info!(
                    "Devices: reconciling device {} is_active {} -> {}",
                    id,
                    device.is_active,
                    is_connected
                );
                self.devices
                    .update_connection_status(id, is_connected)
                    .await?
            } else {
                device
            };

            Ok::<_, GatewayError>(DeviceStatus {
                device: Some(device),
                is_connected,
                qr_code,
                is_default,
            })
        }
        .await;

        result.inspect_err(|e| tracing::error!("Devices: failed to get status of {}: {}", id, e))
    }

    pub async fn get_devices_status(&self) -> Result<Vec<DeviceStatusSummary>> {
        let devices = self.get_all_devices().await?;
        let mut statuses = Vec::with_capacity(devices.len());

        for device in devices {
            let status = self.get_device_status(&device.id).await?;
            let current = status.device.unwrap_or(device);
            statuses.push(DeviceStatusSummary {
                id: current.id,
                name: current.name,
                phone_number: current.phone_number,
                is_active: current.is_active,
                is_connected: status.is_connected,
                last_connected: current.last_connected,
            });
        }
        Ok(statuses)
    }

    /// Make the device's session the default send target
    pub async fn set_default_device(&self, id: &str) -> Result<()> {
        let result = async {
            let device = self.require(id).await?;
            if !self.whatsapp.is_authenticated(Some(&device.session_id)).await {
                return Err(GatewayError::NotAuthenticated(device.session_id));
            }
            self.whatsapp.set_default_session(&device.session_id).await
        }
        .await;

        match &result {
            Ok(()) => tracing::info!("Devices: device {} is now the default", id),
            Err(e) => tracing::error!("Devices: failed to set default device {}: {}", id, e),
        }
        result
    }
}
