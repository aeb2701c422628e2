//! Device endpoints.

use super::AppState;
use super::error::ApiError;
use crate::error::GatewayError;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Deserialize)]
pub struct DeviceNameRequest {
    #[serde(default)]
    pub name: Option<String>,
}

impl DeviceNameRequest {
    fn required_name(self) -> Result<String, ApiError> {
        self.name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ApiError::bad_request("device name is required"))
    }
}

pub async fn list_devices(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let devices = state.devices.get_all_devices().await?;
    Ok(Json(json!({
        "success": true,
        "count": devices.len(),
        "data": devices,
    })))
}

pub async fn devices_status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let devices = state.devices.get_devices_status().await?;
    Ok(Json(json!({
        "success": true,
        "count": devices.len(),
        "devices": devices,
    })))
}

pub async fn get_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let status = state.devices.get_device_status(&id).await?;
    let Some(device) = status.device else {
        return Err(GatewayError::DeviceNotFound(id).into());
    };

    let mut data = serde_json::to_value(&device).unwrap_or_else(|_| json!({}));
    if let Value::Object(map) = &mut data {
        map.insert("isConnected".into(), status.is_connected.into());
        map.insert("qrCode".into(), status.qr_code.into());
        map.insert("isDefault".into(), status.is_default.into());
    }

    Ok(Json(json!({ "success": true, "data": data })))
}

pub async fn create_device(
    State(state): State<AppState>,
    Json(request): Json<DeviceNameRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let name = request.required_name()?;
    let device = state.devices.create_device(&name, None).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "data": device })),
    ))
}

pub async fn update_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<DeviceNameRequest>,
) -> Result<Json<Value>, ApiError> {
    let name = request.required_name()?;
    let device = state.devices.update_device(&id, &name).await?;
    Ok(Json(json!({ "success": true, "data": device })))
}

pub async fn delete_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.devices.remove_device(&id).await?;
    Ok(Json(json!({ "success": true, "message": "Device removed" })))
}

pub async fn reconnect_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let device = state.devices.reconnect_device(&id).await?;
    Ok(Json(json!({
        "success": true,
        "data": device,
        "message": "Reconnect requested",
    })))
}

pub async fn set_default_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.devices.set_default_device(&id).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Device {} is now the default", id),
    })))
}
