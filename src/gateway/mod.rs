//! HTTP Gateway
//!
//! Thin JSON API over the use cases: message sending, device management,
//! session listing, and QR polling/streaming for the scan flow.

mod devices;
mod error;
mod messages;
mod qrcode;
mod sessions;


pub use error::ApiError;

use crate::usecases::{DeviceManagement, SendMessage};
use crate::whatsapp::WhatsAppService;
use axum::Router;
use axum::routing::{delete, get, post};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub whatsapp: Arc<dyn WhatsAppService>,
    pub devices: Arc<DeviceManagement>,
    pub send_message: Arc<SendMessage>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        whatsapp: Arc<dyn WhatsAppService>,
        devices: Arc<DeviceManagement>,
        send_message: Arc<SendMessage>,
    ) -> Self {
        Self {
            whatsapp,
            devices,
            send_message,
            started_at: Instant::now(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(messages::health))
        .route("/api/messages", post(messages::send_message))
        .route("/api/qrcode", get(qrcode::get_qr_code))
        .route("/qrcode/stream", get(qrcode::qr_code_stream))
        .route("/auth/status", get(qrcode::auth_status))
        .route(
            "/api/devices",
            get(devices::list_devices).post(devices::create_device),
        )
        .route("/api/devices/status", get(devices::devices_status))
        .route(
            "/api/devices/{id}",
            get(devices::get_device)
                .put(devices::update_device)
                .delete(devices::delete_device),
        )
        .route("/api/devices/{id}/reconnect", post(devices::reconnect_device))
        .route(
            "/api/devices/{id}/set-default",
            post(devices::set_default_device),
        )
        .route("/api/sessions", get(sessions::list_sessions))
        .route("/api/sessions/{id}", delete(sessions::close_session))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve `router` until `shutdown` is cancelled
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Gateway: listening on http://{}", addr);
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    tracing::info!("Gateway: server stopped");
    Ok(())
}
