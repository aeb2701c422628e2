//! Device Repository
//!
//! Storage seam for device records. The registry and the use cases only
//! see the `DeviceRepository` trait; `SqliteDeviceRepository` is the
//! production implementation.

use super::models::{Device, DeviceUpdate, NewDevice};
use super::Pool;
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use chrono::Utc;

/// Async CRUD over device records
#[async_trait]
pub trait DeviceRepository: Send + Sync {
    /// All devices, most recently updated first
    async fn find_all(&self) -> Result<Vec<Device>>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Device>>;

    async fn find_by_session_id(&self, session_id: &str) -> Result<Option<Device>>;

    async fn create(&self, device: NewDevice) -> Result<Device>;

    /// Apply a partial update. Unknown ids fail with `DeviceNotFound`.
    async fn update(&self, id: &str, update: DeviceUpdate) -> Result<Device>;

    /// Set `is_active`; `true` also stamps `last_connected`
    async fn update_connection_status(&self, id: &str, is_active: bool) -> Result<Device>;

    async fn delete(&self, id: &str) -> Result<()>;
}

const SELECT_DEVICE: &str = "SELECT id, name, session_id, phone_number, is_active, \
     created_at, updated_at, last_connected FROM devices";

/// SQLite-backed device repository
#[derive(Clone)]
pub struct SqliteDeviceRepository {
    pool: Pool,
}

impl SqliteDeviceRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn fetch_required(&self, id: &str) -> Result<Device> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| GatewayError::DeviceNotFound(id.to_string()))
    }
}

/// Log a storage failure with its operation and key, then wrap it
fn persistence(op: &'static str, key: &str) -> impl FnOnce(sqlx::Error) -> GatewayError {
    let key = key.to_string();
    move |e| {
        tracing::error!("Devices: {} failed for {}: {}", op, key, e);
        GatewayError::Persistence(e)
    }
}

#[async_trait]
impl DeviceRepository for SqliteDeviceRepository {
    async fn find_all(&self) -> Result<Vec<Device>> {
        let sql = format!("{} ORDER BY updated_at DESC, created_at DESC", SELECT_DEVICE);
        sqlx::query_as::<_, Device>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(persistence("find_all", "*"))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Device>> {
        let sql = format!("{} WHERE id = ?", SELECT_DEVICE);
        sqlx::query_as::<_, Device>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence("find_by_id", id))
    }

    async fn find_by_session_id(&self, session_id: &str) -> Result<Option<Device>> {
        let sql = format!("{} WHERE session_id = ?", SELECT_DEVICE);
        sqlx::query_as::<_, Device>(&sql)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence("find_by_session_id", session_id))
    }

    async fn create(&self, device: NewDevice) -> Result<Device> {
        let now = Utc::now();
        let record = Device {
            id: uuid::Uuid::new_v4().to_string(),
            name: device.name,
            session_id: device.session_id,
            phone_number: device.phone_number,
            is_active: device.is_active,
            created_at: now,
            updated_at: now,
            last_connected: device.is_active.then_some(now),
        };

        sqlx::query(
            "INSERT INTO devices (id, name, session_id, phone_number, is_active, \
             created_at, updated_at, last_connected) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.session_id)
        .bind(&record.phone_number)
        .bind(record.is_active)
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(record.last_connected)
        .execute(&self.pool)
        .await
        .map_err(persistence("create", &record.session_id))?;

        tracing::debug!(
            "Devices: created {} ({}) for session {}",
            record.id,
            record.name,
            record.session_id
        );
        Ok(record)
    }

    async fn update(&self, id: &str, update: DeviceUpdate) -> Result<Device> {
        let result = sqlx::query(
            "UPDATE devices SET \
                name = COALESCE(?, name), \
                phone_number = COALESCE(?, phone_number), \
                is_active = COALESCE(?, is_active), \
                last_connected = COALESCE(?, last_connected), \
                updated_at = ? \
             WHERE id = ?",
        )
        .bind(update.name)
        .bind(update.phone_number)
        .bind(update.is_active)
        .bind(update.last_connected)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(persistence("update", id))?;

        if result.rows_affected() == 0 {
            return Err(GatewayError::DeviceNotFound(id.to_string()));
        }
        self.fetch_required(id).await
    }

    async fn update_connection_status(&self, id: &str, is_active: bool) -> Result<Device> {
        let update = DeviceUpdate {
            is_active: Some(is_active),
            last_connected: is_active.then(Utc::now),
            ..Default::default()
        };
        self.update(id, update).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM devices WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(persistence("delete", id))?;

        if result.rows_affected() == 0 {
            return Err(GatewayError::DeviceNotFound(id.to_string()));
        }
        tracing::debug!("Devices: deleted {}", id);
        Ok(())
    }
}
