//! QR polling, QR live stream and authentication status.

use super::AppState;
use crate::whatsapp::{EventScope, SessionEvent, SessionEventKind};
use axum::Json;
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use chrono::Utc;
use futures::{Stream, StreamExt, stream};
use serde::Deserialize;
use serde_json::{Value, json};
use std::convert::Infallible;

/// Marker sent on the stream once the session is authenticated
const AUTHENTICATED_MARKER: &str = "authenticated";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionQuery {
    pub session_id: Option<String>,
}

pub async fn get_qr_code(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Json<Value> {
    let session_id = query.session_id.as_deref();
    let qr_code = state.whatsapp.get_qr_code(session_id).await;
    let authenticated = state.whatsapp.is_authenticated(session_id).await;

    tracing::debug!(
        "Gateway: QR poll, available: {}, authenticated: {}",
        !qr_code.is_empty(),
        authenticated
    );

    Json(json!({
        "qrCode": qr_code,
        "authenticated": authenticated,
        "timestamp": Utc::now(),
    }))
}

fn qr_event(value: &str) -> Event {
    Event::default().data(json!({ "qrCode": value }).to_string())
}

fn to_sse(event: SessionEvent) -> Option<Event> {
    match event.kind {
        SessionEventKind::Qr(qr) => Some(qr_event(&qr)),
        SessionEventKind::Authenticated => Some(qr_event(AUTHENTICATED_MARKER)),
        _ => None,
    }
}

/// Server-sent QR updates. The subscription lives inside the stream, so it
/// is released when the client disconnects.
pub async fn qr_code_stream(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session_id = match query.session_id {
        Some(id) => Some(id),
        None => state.whatsapp.get_default_session().await.ok(),
    };
    let scope = match &session_id {
        Some(id) => EventScope::Session(id.clone()),
        None => EventScope::All,
    };

    // Subscribe before reading the current value so no update falls in between
    let updates = state.whatsapp.subscribe(scope);
    let current = state.whatsapp.get_qr_code(session_id.as_deref()).await;
    tracing::debug!(
        "Gateway: QR stream opened for {}",
        session_id.as_deref().unwrap_or("all sessions")
    );

    let events = stream::once(async move { qr_event(&current) })
        .chain(updates.filter_map(|event| async move { to_sse(event) }))
        .map(Ok);

    Sse::new(events).keep_alive(KeepAlive::default())
}

pub async fn auth_status(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Json<Value> {
    let authenticated = state
        .whatsapp
        .is_authenticated(query.session_id.as_deref())
        .await;
    Json(json!({ "authenticated": authenticated }))
}
