//! Persistence
//!
//! SQLite pool, embedded migrations and the device repository.

mod database;
pub mod models;
pub mod repository;

pub use database::{Database, Pool};
pub use models::{Device, DeviceUpdate, NewDevice};
pub use repository::{DeviceRepository, SqliteDeviceRepository};
