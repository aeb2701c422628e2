//! Session endpoints.

use super::AppState;
use super::error::ApiError;
use crate::error::GatewayError;
use axum::Json;
use axum::extract::{Path, State};
use serde_json::{Value, json};

pub async fn list_sessions(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let mut sessions = Vec::new();
    for id in state.whatsapp.get_active_sessions().await {
        match state.whatsapp.get_session_info(&id).await {
            Ok(info) => sessions.push(info),
            // Closed between listing and lookup
            Err(GatewayError::SessionNotFound(_)) => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(Json(json!({
        "success": true,
        "count": sessions.len(),
        "data": sessions,
    })))
}

pub async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.whatsapp.get_active_sessions().await.contains(&id) {
        return Err(GatewayError::SessionNotFound(id).into());
    }
    let closed = state.whatsapp.close_session(&id).await?;
    Ok(Json(json!({ "success": closed, "sessionId": id })))
}
