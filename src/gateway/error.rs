//! JSON error responses.

use crate::error::GatewayError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: &'static str,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: "bad_request",
            message: message.into(),
        }
    }

    pub fn not_found(error: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            error,
            message: message.into(),
        }
    }
}

fn status_of(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::SessionNotFound(_) | GatewayError::DeviceNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        GatewayError::InvalidContent(_) => StatusCode::BAD_REQUEST,
        GatewayError::NotAuthenticated(_)
        | GatewayError::DeviceNotActive(_)
        | GatewayError::NoActiveDevice
        | GatewayError::NoSessionAvailable
        | GatewayError::NoAuthenticatedSession => StatusCode::CONFLICT,
        GatewayError::InitializationTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        GatewayError::Persistence(_) | GatewayError::Provider(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self {
            status: status_of(&err),
            error: err.kind(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!("Gateway: {} ({})", self.message, self.status);
        }
        let body = json!({
            "success": false,
            "error": self.error,
            "message": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}
