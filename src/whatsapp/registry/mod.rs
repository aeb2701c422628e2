//! Session Registry
//!
//! Owns one provider connection per session id, plus the process-wide
//! default-session pointer. Constructed once per process and injected
//! into the use cases; tests build a fresh registry each.
//!
//! Provider events are consumed by a per-connection pump (see
//! `lifecycle`), which drives the QR/authentication state machine and
//! keeps device records in step with live connectivity.

mod lifecycle;

use super::events::{EventRouter, EventScope, Subscription};
use super::message::Message;
use super::phone::format_phone_number;
use super::provider::{Connection, MediaPayload, OutboundPayload, ProviderHandle, WhatsAppProvider};
use super::service::WhatsAppService;
use super::session::{SessionEntry, SessionInfo, SessionState, SessionTable};
use crate::config::WhatsAppConfig;
use crate::db::DeviceRepository;
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// Fallback shown when the account phone number is not known
pub const UNKNOWN_PHONE: &str = "unknown";
const UNNAMED_DEVICE: &str = "Unnamed device";

/// Directories and timings that drive the session lifecycle
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub auth_dir: PathBuf,
    pub qr_image_url: String,
    pub init_timeout: Duration,
    pub qr_refresh_interval: Duration,
    pub qr_timeout: Duration,
    pub auth_settle_delay: Duration,
    pub reconnect_delay: Duration,
}

impl From<&WhatsAppConfig> for LifecycleSettings {
    fn from(config: &WhatsAppConfig) -> Self {
        Self {
            auth_dir: config.auth_dir.clone(),
            qr_image_url: config.qr_image_url.clone(),
            init_timeout: config.init_timeout(),
            qr_refresh_interval: config.qr_refresh_interval(),
            qr_timeout: config.qr_timeout(),
            auth_settle_delay: config.auth_settle_delay(),
            reconnect_delay: config.reconnect_delay(),
        }
    }
}

pub(crate) struct Inner {
    provider: Arc<dyn WhatsAppProvider>,
    devices: Arc<dyn DeviceRepository>,
    router: EventRouter,
    settings: LifecycleSettings,
    sessions: RwLock<SessionTable>,
    default_session: RwLock<Option<String>>,
    generation: AtomicU64,
}

/// Registry of live WhatsApp sessions
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Inner>,
}

impl SessionRegistry {
    pub fn new(
        provider: Arc<dyn WhatsAppProvider>,
        devices: Arc<dyn DeviceRepository>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                devices,
                router: EventRouter::new(),
                settings,
                sessions: RwLock::new(SessionTable::default()),
                default_session: RwLock::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn router(&self) -> &EventRouter {
        &self.inner.router
    }

    /// Start (or no-op if already tracked) a session
    pub async fn initialize(&self, session_id: Option<&str>) -> Result<String> {
        let (session_id, generated) = match session_id {
            Some(id) => (id.to_string(), false),
            None => (format!("session_{}", uuid::Uuid::new_v4()), true),
        };

        if generated {
            tracing::info!("WhatsApp: creating new session {}", session_id);
            *self.inner.default_session.write().await = Some(session_id.clone());
        } else {
            tracing::info!("WhatsApp: initializing session {}", session_id);
        }

        if self.inner.sessions.read().await.contains(&session_id) {
            tracing::info!("WhatsApp: session {} already initialized", session_id);
            return Ok(session_id);
        }

        let credentials_dir = self.inner.settings.auth_dir.join(&session_id);
        tokio::fs::create_dir_all(&credentials_dir)
            .await
            .map_err(|e| {
                GatewayError::Provider(format!(
                    "failed to create credentials directory {:?}: {}",
                    credentials_dir, e
                ))
            })?;

        let Connection { handle, events } = self
            .inner
            .provider
            .connect(&session_id, &credentials_dir)
            .await
            .inspect_err(|e| {
                tracing::error!("WhatsApp: failed to connect session {}: {}", session_id, e)
            })?;

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut sessions = self.inner.sessions.write().await;
            if sessions.contains(&session_id) {
                // Lost a race with a concurrent initialize of the same id
                drop(sessions);
                tracing::debug!("WhatsApp: session {} initialized concurrently", session_id);
                if let Err(e) = handle.destroy().await {
                    tracing::warn!("WhatsApp: failed to drop duplicate connection: {}", e);
                }
                return Ok(session_id);
            }
            sessions.insert(
                session_id.clone(),
                SessionEntry::new(handle.clone(), generation),
            );
        }

        lifecycle::spawn_event_pump(
            Arc::downgrade(&self.inner),
            session_id.clone(),
            generation,
            events,
        );

        let timeout = self.inner.settings.init_timeout;
        let failure = match tokio::time::timeout(timeout, handle.initialize()).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(_) => Some(GatewayError::InitializationTimeout {
                session_id: session_id.clone(),
                timeout,
            }),
        };

        if let Some(err) = failure {
            tracing::error!("WhatsApp: failed to initialize session {}: {}", session_id, err);
            self.discard(&session_id, generation).await;
            return Err(err);
        }

        self.start_qr_timers(&session_id, generation).await;
        tracing::info!("WhatsApp: session {} initialized", session_id);
        Ok(session_id)
    }

    /// Drop a half-started session without touching its device record
    async fn discard(&self, session_id: &str, generation: u64) {
        let entry = {
            let mut sessions = self.inner.sessions.write().await;
            if sessions.current_mut(session_id, generation).is_some() {
                sessions.remove(session_id)
            } else {
                None
            }
        };
        if let Some(mut entry) = entry {
            entry.qr_timers.take();
            if let Err(e) = entry.handle.destroy().await {
                tracing::warn!("WhatsApp: failed to destroy session {}: {}", session_id, e);
            }
        }
    }

    /// Explicit id, else the default pointer
    async fn target(&self, session_id: Option<&str>) -> Option<String> {
        match session_id {
            Some(id) => Some(id.to_string()),
            None => self.inner.default_session.read().await.clone(),
        }
    }

    async fn handle_of(&self, session_id: &str) -> Option<Arc<dyn ProviderHandle>> {
        self.inner
            .sessions
            .read()
            .await
            .get(session_id)
            .map(|entry| entry.handle.clone())
    }

    pub async fn get_qr_code(&self, session_id: Option<&str>) -> String {
        let Some(session_id) = self.target(session_id).await else {
            tracing::warn!("WhatsApp: QR requested but no session is initialized");
            return String::new();
        };

        let sessions = self.inner.sessions.read().await;
        match sessions.get(&session_id) {
            None => {
                tracing::warn!("WhatsApp: QR requested for unknown session {}", session_id);
                String::new()
            }
            Some(entry) if entry.current_qr.is_empty() => {
                tracing::debug!("WhatsApp: no QR available yet for session {}", session_id);
                String::new()
            }
            Some(entry) => entry.current_qr.clone(),
        }
    }

    pub async fn is_authenticated(&self, session_id: Option<&str>) -> bool {
        let Some(session_id) = self.target(session_id).await else {
            return false;
        };
        match self.handle_of(&session_id).await {
            Some(handle) => handle.is_open().await,
            None => false,
        }
    }

    pub async fn get_active_sessions(&self) -> Vec<String> {
        self.inner.sessions.read().await.ids()
    }

    /// Lifecycle state of a tracked session
    pub async fn session_state(&self, session_id: &str) -> Option<SessionState> {
        self.inner
            .sessions
            .read()
            .await
            .get(session_id)
            .map(|entry| entry.state)
    }

    /// Tear a session down and mark its device inactive. Returns false when
    /// the session is unknown or the provider failed to shut down.
    pub async fn close_session(&self, session_id: &str) -> bool {
        let Some(mut entry) = self.inner.sessions.write().await.remove(session_id) else {
            tracing::warn!("WhatsApp: cannot close unknown session {}", session_id);
            return false;
        };
        entry.qr_timers.take();

        let destroyed = match entry.handle.destroy().await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("WhatsApp: failed to close session {}: {}", session_id, e);
                false
            }
        };

        self.mark_device_inactive(session_id).await;
        if destroyed {
            tracing::info!("WhatsApp: session {} closed", session_id);
        }
        destroyed
    }

    async fn mark_device_inactive(&self, session_id: &str) {
        let result = async {
            if let Some(device) = self.inner.devices.find_by_session_id(session_id).await? {
                self.inner
                    .devices
                    .update_connection_status(&device.id, false)
                    .await?;
            }
            Ok::<_, GatewayError>(())
        }
        .await;

        if let Err(e) = result {
            tracing::error!(
                "WhatsApp: failed to mark device of session {} inactive: {}",
                session_id,
                e
            );
        }
    }

    pub async fn get_session_info(&self, session_id: &str) -> Result<SessionInfo> {
        let (handle, state, phone, device_name) = {
            let sessions = self.inner.sessions.read().await;
            let entry = sessions
                .get(session_id)
                .ok_or_else(|| GatewayError::SessionNotFound(session_id.to_string()))?;
            (
                entry.handle.clone(),
                entry.state,
                entry.phone_number.clone(),
                entry.device_name.clone(),
            )
        };

        let device = self
            .inner
            .devices
            .find_by_session_id(session_id)
            .await
            .inspect_err(|e| {
                tracing::error!("WhatsApp: failed to load info of session {}: {}", session_id, e)
            })?;

        let phone_number = handle
            .info()
            .and_then(|identity| identity.phone_number)
            .or(phone)
            .unwrap_or_else(|| UNKNOWN_PHONE.to_string());
        let name = device
            .as_ref()
            .map(|d| d.name.clone())
            .or(device_name)
            .unwrap_or_else(|| UNNAMED_DEVICE.to_string());
        let now = Utc::now();

        Ok(SessionInfo {
            session_id: session_id.to_string(),
            phone_number,
            name,
            state,
            is_active: handle.is_open().await,
            created_at: device.as_ref().map(|d| d.created_at).unwrap_or(now),
            last_connected: device.and_then(|d| d.last_connected).unwrap_or(now),
        })
    }

    /// Default session, re-derived from the first authenticated session
    /// when the stored pointer is stale
    pub async fn get_default_session(&self) -> Result<String> {
        let current = self.inner.default_session.read().await.clone();
        if let Some(id) = current
            && self.is_authenticated(Some(&id)).await
        {
            return Ok(id);
        }

        for id in self.get_active_sessions().await {
            if self.is_authenticated(Some(&id)).await {
                *self.inner.default_session.write().await = Some(id.clone());
                tracing::info!("WhatsApp: default session is now {}", id);
                return Ok(id);
            }
        }

        tracing::debug!("WhatsApp: no authenticated session for default");
        Err(GatewayError::NoAuthenticatedSession)
    }

    pub async fn set_default_session(&self, session_id: &str) -> Result<()> {
        if !self.is_authenticated(Some(session_id)).await {
            tracing::error!(
                "WhatsApp: cannot make {} default, session is not authenticated",
                session_id
            );
            return Err(GatewayError::NotAuthenticated(session_id.to_string()));
        }
        *self.inner.default_session.write().await = Some(session_id.to_string());
        tracing::info!("WhatsApp: default session set to {}", session_id);
        Ok(())
    }

    /// Pick the session for an outbound send: explicit id, then default,
    /// then the first session with a bound phone, then the first session.
    async fn resolve_session(&self, session_id: Option<&str>) -> Result<String> {
        let sessions = self.inner.sessions.read().await;

        if let Some(id) = session_id
            && sessions.contains(id)
        {
            return Ok(id.to_string());
        }

        if let Some(id) = self.inner.default_session.read().await.as_deref()
            && sessions.contains(id)
        {
            return Ok(id.to_string());
        }

        if let Some((id, _)) = sessions
            .iter()
            .find(|(_, entry)| entry.phone_number.is_some())
        {
            tracing::info!("WhatsApp: using authenticated session {}", id);
            return Ok(id.clone());
        }

        match sessions.ids().into_iter().next() {
            Some(id) => {
                tracing::warn!("WhatsApp: using first available session {} (not authenticated)", id);
                Ok(id)
            }
            None => Err(GatewayError::NoSessionAvailable),
        }
    }

    async fn send(
        &self,
        to: &str,
        payload: OutboundPayload,
        session_id: Option<&str>,
    ) -> Result<Message> {
        let session_id = self.resolve_session(session_id).await?;
        let handle = self
            .handle_of(&session_id)
            .await
            .ok_or_else(|| GatewayError::SessionNotFound(session_id.clone()))?;

        let recipient = format_phone_number(to);
        tracing::debug!("WhatsApp: sending to {} via {}", recipient, session_id);
        handle.send_message(&recipient, payload).await
    }

    pub async fn send_text_message(
        &self,
        to: &str,
        text: &str,
        session_id: Option<&str>,
    ) -> Result<Message> {
        self.send(to, OutboundPayload::Text(text.to_string()), session_id)
            .await
            .inspect_err(|e| tracing::error!("WhatsApp: failed to send text message: {}", e))
    }

    pub async fn send_media_message(
        &self,
        to: &str,
        media: MediaPayload,
        session_id: Option<&str>,
    ) -> Result<Message> {
        self.send(to, OutboundPayload::Media(media), session_id)
            .await
            .inspect_err(|e| tracing::error!("WhatsApp: failed to send media message: {}", e))
    }

    pub fn subscribe(&self, scope: EventScope) -> Subscription {
        self.inner.router.subscribe(scope)
    }

    /// Close every tracked session
    pub async fn shutdown(&self) {
        let ids = self.get_active_sessions().await;
        tracing::info!("WhatsApp: shutting down {} session(s)", ids.len());
        for id in ids {
            self.close_session(&id).await;
        }
        *self.inner.default_session.write().await = None;
    }
}

#[async_trait]
impl WhatsAppService for SessionRegistry {
    async fn initialize(&self, session_id: Option<&str>) -> Result<String> {
        SessionRegistry::initialize(self, session_id).await
    }

    async fn get_qr_code(&self, session_id: Option<&str>) -> String {
        SessionRegistry::get_qr_code(self, session_id).await
    }

    async fn is_authenticated(&self, session_id: Option<&str>) -> bool {
        SessionRegistry::is_authenticated(self, session_id).await
    }

    async fn get_active_sessions(&self) -> Vec<String> {
        SessionRegistry::get_active_sessions(self).await
    }

    async fn close_session(&self, session_id: &str) -> Result<bool> {
        Ok(SessionRegistry::close_session(self, session_id).await)
    }

    async fn get_session_info(&self, session_id: &str) -> Result<SessionInfo> {
        SessionRegistry::get_session_info(self, session_id).await
    }

    async fn get_default_session(&self) -> Result<String> {
        SessionRegistry::get_default_session(self).await
    }

    async fn set_default_session(&self, session_id: &str) -> Result<()> {
        SessionRegistry::set_default_session(self, session_id).await
    }

    async fn send_text_message(
        &self,
        to: &str,
        text: &str,
        session_id: Option<&str>,
    ) -> Result<Message> {
        SessionRegistry::send_text_message(self, to, text, session_id).await
    }

    async fn send_media_message(
        &self,
        to: &str,
        media: MediaPayload,
        session_id: Option<&str>,
    ) -> Result<Message> {
        SessionRegistry::send_media_message(self, to, media, session_id).await
    }

    fn subscribe(&self, scope: EventScope) -> Subscription {
        SessionRegistry::subscribe(self, scope)
    }
}
