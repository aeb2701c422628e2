//! Hand-written fakes shared by the crate's tests.

use crate::db::{Device, DeviceRepository, DeviceUpdate, NewDevice};
use crate::error::{GatewayError, Result};
use crate::whatsapp::{
    Connection, EventRouter, EventScope, LifecycleSettings, MediaPayload, Message,
    MessageContent, OutboundPayload, ProviderEvent, ProviderHandle, ProviderIdentity,
    SessionInfo, SessionState, Subscription, WhatsAppProvider, WhatsAppService,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Millisecond-scale lifecycle timings
pub fn test_settings(auth_dir: &Path) -> LifecycleSettings {
    LifecycleSettings {
        auth_dir: auth_dir.to_path_buf(),
        qr_image_url: crate::config::DEFAULT_QR_IMAGE_URL.to_string(),
        init_timeout: Duration::from_millis(200),
        qr_refresh_interval: Duration::from_millis(20),
        qr_timeout: Duration::from_millis(150),
        auth_settle_delay: Duration::from_millis(10),
        reconnect_delay: Duration::from_millis(20),
    }
}

/// Poll `check` until it holds, failing the test after ~2s
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..400 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {}", what);
}

pub fn device(id: &str, session_id: &str, is_active: bool) -> Device {
    let now = Utc::now();
    Device {
        id: id.to_string(),
        name: format!("Device {}", id),
        session_id: session_id.to_string(),
        phone_number: None,
        is_active,
        created_at: now,
        updated_at: now,
        last_connected: None,
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitBehavior {
    Succeed,
    Fail,
    Hang,
    /// Emit a QR while still booting, then succeed
    QrDuringStartup,
}

/// Scriptable provider connection
pub struct FakeHandle {
    pub session_id: String,
    init: InitBehavior,
    open: AtomicBool,
    destroyed: AtomicBool,
    destroy_fails: AtomicBool,
    identity: Mutex<Option<ProviderIdentity>>,
    sent: Mutex<Vec<(String, OutboundPayload)>>,
    events: mpsc::UnboundedSender<ProviderEvent>,
}

impl FakeHandle {
    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    pub fn set_phone(&self, phone: Option<&str>) {
        *self.identity.lock().unwrap() = phone.map(|p| ProviderIdentity {
            phone_number: Some(p.to_string()),
            push_name: None,
        });
    }

    pub fn fail_destroy(&self) {
        self.destroy_fails.store(true, Ordering::SeqCst);
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(String, OutboundPayload)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn emit(&self, event: ProviderEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl ProviderHandle for FakeHandle {
    async fn initialize(&self) -> Result<()> {
        match self.init {
            InitBehavior::Succeed => Ok(()),
            InitBehavior::Fail => Err(GatewayError::Provider("browser crashed".to_string())),
            InitBehavior::Hang => futures::future::pending::<Result<()>>().await,
            InitBehavior::QrDuringStartup => {
                self.emit(ProviderEvent::Qr("startup-qr".to_string()));
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            }
        }
    }

    async fn send_message(&self, to: &str, payload: OutboundPayload) -> Result<Message> {
        let content = match &payload {
            OutboundPayload::Text(text) => MessageContent::text(text.clone()),
            OutboundPayload::Media(media) => MessageContent::media(
                media.data.clone(),
                Some(media.mime_type.clone()),
                media.caption.clone(),
            ),
        };
        let mut sent = self.sent.lock().unwrap();
        sent.push((to.to_string(), payload));
        Ok(Message {
            id: format!("sent-{}", sent.len()),
            from: "me@c.us".to_string(),
            to: to.to_string(),
            content,
            timestamp: Utc::now(),
            is_from_me: true,
        })
    }

    async fn destroy(&self) -> Result<()> {
        if self.destroy_fails.load(Ordering::SeqCst) {
            return Err(GatewayError::Provider("destroy failed".to_string()));
        }
        self.destroyed.store(true, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn info(&self) -> Option<ProviderIdentity> {
        self.identity.lock().unwrap().clone()
    }

    async fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Provider that hands out `FakeHandle`s and remembers them per session
pub struct FakeProvider {
    init: Mutex<InitBehavior>,
    connections: Mutex<Vec<Arc<FakeHandle>>>,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            init: Mutex::new(InitBehavior::Succeed),
            connections: Mutex::new(Vec::new()),
        })
    }

    pub fn set_init(&self, behavior: InitBehavior) {
        *self.init.lock().unwrap() = behavior;
    }

    pub fn connect_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    /// Latest connection opened for `session_id`
    pub fn handle(&self, session_id: &str) -> Arc<FakeHandle> {
        self.handles(session_id)
            .pop()
            .unwrap_or_else(|| panic!("no connection for {}", session_id))
    }

    pub fn handles(&self, session_id: &str) -> Vec<Arc<FakeHandle>> {
        self.connections
            .lock()
            .unwrap()
            .iter()
            .filter(|h| h.session_id == session_id)
            .cloned()
            .collect()
    }

    pub fn emit(&self, session_id: &str, event: ProviderEvent) {
        self.handle(session_id).emit(event);
    }
}

#[async_trait]
impl WhatsAppProvider for FakeProvider {
    async fn connect(&self, session_id: &str, credentials_dir: &Path) -> Result<Connection> {
        assert!(credentials_dir.ends_with(session_id));
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Arc::new(FakeHandle {
            session_id: session_id.to_string(),
            init: *self.init.lock().unwrap(),
            open: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            destroy_fails: AtomicBool::new(false),
            identity: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            events: tx,
        });
        self.connections.lock().unwrap().push(handle.clone());
        Ok(Connection {
            handle,
            events: rx,
        })
    }
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum RepoCall {
    Create(String),
    Update(String, DeviceUpdate),
    ConnectionStatus(String, bool),
    Delete(String),
}

/// Vec-backed repository that records every write
#[derive(Default)]
pub struct InMemoryDeviceRepository {
    devices: Mutex<Vec<Device>>,
    calls: Mutex<Vec<RepoCall>>,
    failing: AtomicBool,
}

impl InMemoryDeviceRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_devices(devices: Vec<Device>) -> Arc<Self> {
        let repo = Self::default();
        *repo.devices.lock().unwrap() = devices;
        Arc::new(repo)
    }

    /// Make every call fail with a persistence error
    pub fn fail_all(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<RepoCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn status_calls(&self) -> Vec<(String, bool)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RepoCall::ConnectionStatus(id, active) => Some((id, active)),
                _ => None,
            })
            .collect()
    }

    pub fn all(&self) -> Vec<Device> {
        self.devices.lock().unwrap().clone()
    }

    pub fn by_session(&self, session_id: &str) -> Option<Device> {
        self.all().into_iter().find(|d| d.session_id == session_id)
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::Persistence(sqlx::Error::PoolClosed));
        }
        Ok(())
    }

    fn apply(&self, id: &str, update: &DeviceUpdate) -> Result<Device> {
        let mut devices = self.devices.lock().unwrap();
        let device = devices
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| GatewayError::DeviceNotFound(id.to_string()))?;
        if let Some(name) = &update.name {
            device.name = name.clone();
        }
        if let Some(phone) = &update.phone_number {
            device.phone_number = Some(phone.clone());
        }
        if let Some(active) = update.is_active {
            device.is_active = active;
        }
        if let Some(at) = update.last_connected {
            device.last_connected = Some(at);
        }
        device.updated_at = Utc::now();
        Ok(device.clone())
    }
}

#[async_trait]
impl DeviceRepository for InMemoryDeviceRepository {
    async fn find_all(&self) -> Result<Vec<Device>> {
        self.check()?;
        Ok(self.all())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Device>> {
        self.check()?;
        Ok(self.all().into_iter().find(|d| d.id == id))
    }

    async fn find_by_session_id(&self, session_id: &str) -> Result<Option<Device>> {
        self.check()?;
        Ok(self.by_session(session_id))
    }

    async fn create(&self, new: NewDevice) -> Result<Device> {
        self.check()?;
        let mut devices = self.devices.lock().unwrap();
        let now = Utc::now();
        let device = Device {
            id: format!("dev-{}", devices.len() + 1),
            name: new.name,
            session_id: new.session_id,
            phone_number: new.phone_number,
            is_active: new.is_active,
            created_at: now,
            updated_at: now,
            last_connected: new.is_active.then_some(now),
        };
        devices.push(device.clone());
        self.calls
            .lock()
            .unwrap()
            .push(RepoCall::Create(device.session_id.clone()));
        Ok(device)
    }

    async fn update(&self, id: &str, update: DeviceUpdate) -> Result<Device> {
        self.check()?;
        self.calls
            .lock()
            .unwrap()
            .push(RepoCall::Update(id.to_string(), update.clone()));
        self.apply(id, &update)
    }

    async fn update_connection_status(&self, id: &str, is_active: bool) -> Result<Device> {
        self.check()?;
        self.calls
            .lock()
            .unwrap()
            .push(RepoCall::ConnectionStatus(id.to_string(), is_active));
        let update = DeviceUpdate {
            is_active: Some(is_active),
            last_connected: is_active.then(Utc::now),
            ..Default::default()
        };
        self.apply(id, &update)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.check()?;
        self.calls
            .lock()
            .unwrap()
            .push(RepoCall::Delete(id.to_string()));
        let mut devices = self.devices.lock().unwrap();
        let before = devices.len();
        devices.retain(|d| d.id != id);
        if devices.len() == before {
            return Err(GatewayError::DeviceNotFound(id.to_string()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// WhatsApp service
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentText {
    pub to: String,
    pub text: String,
    pub session_id: Option<String>,
}

/// Scriptable session layer for use case and HTTP tests
#[derive(Default)]
pub struct FakeWhatsAppService {
    pub router: EventRouter,
    sessions: Mutex<Vec<String>>,
    authenticated: Mutex<HashSet<String>>,
    qr_codes: Mutex<HashMap<String, String>>,
    default_session: Mutex<Option<String>>,
    default_fails: AtomicBool,
    close_fails: AtomicBool,
    init_fails: AtomicBool,
    initialized: Mutex<Vec<Option<String>>>,
    closed: Mutex<Vec<String>>,
    texts: Mutex<Vec<SentText>>,
    media: Mutex<Vec<(String, MediaPayload, Option<String>)>>,
    sends_fail: AtomicBool,
    generated: AtomicUsize,
}

impl FakeWhatsAppService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_session(&self, session_id: &str, authenticated: bool) {
        self.sessions.lock().unwrap().push(session_id.to_string());
        if authenticated {
            self.authenticated
                .lock()
                .unwrap()
                .insert(session_id.to_string());
        }
    }

    pub fn set_authenticated(&self, session_id: &str, authenticated: bool) {
        let mut set = self.authenticated.lock().unwrap();
        if authenticated {
            set.insert(session_id.to_string());
        } else {
            set.remove(session_id);
        }
    }

    pub fn set_qr(&self, session_id: &str, qr: &str) {
        self.qr_codes
            .lock()
            .unwrap()
            .insert(session_id.to_string(), qr.to_string());
    }

    pub fn set_default(&self, session_id: Option<&str>) {
        *self.default_session.lock().unwrap() = session_id.map(str::to_string);
    }

    pub fn fail_default_lookup(&self) {
        self.default_fails.store(true, Ordering::SeqCst);
    }

    pub fn fail_close(&self) {
        self.close_fails.store(true, Ordering::SeqCst);
    }

    pub fn fail_initialize(&self) {
        self.init_fails.store(true, Ordering::SeqCst);
    }

    pub fn fail_sends(&self) {
        self.sends_fail.store(true, Ordering::SeqCst);
    }

    pub fn initialized(&self) -> Vec<Option<String>> {
        self.initialized.lock().unwrap().clone()
    }

    pub fn closed(&self) -> Vec<String> {
        self.closed.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<SentText> {
        self.texts.lock().unwrap().clone()
    }

    pub fn media(&self) -> Vec<(String, MediaPayload, Option<String>)> {
        self.media.lock().unwrap().clone()
    }

    pub fn send_count(&self) -> usize {
        self.texts().len() + self.media().len()
    }

    fn sent_message(to: &str, content: MessageContent) -> Message {
        Message {
            id: "sent".to_string(),
            from: "me@c.us".to_string(),
            to: format!("{}formatted", to),
            content,
            timestamp: Utc::now(),
            is_from_me: true,
        }
    }
}

#[async_trait]
impl WhatsAppService for FakeWhatsAppService {
    async fn initialize(&self, session_id: Option<&str>) -> Result<String> {
        self.initialized
            .lock()
            .unwrap()
            .push(session_id.map(str::to_string));
        if self.init_fails.load(Ordering::SeqCst) {
            return Err(GatewayError::InitializationTimeout {
                session_id: session_id.unwrap_or("generated").to_string(),
                timeout: Duration::from_secs(60),
            });
        }
        let id = match session_id {
            Some(id) => id.to_string(),
            None => format!(
                "session_gen{}",
                self.generated.fetch_add(1, Ordering::SeqCst) + 1
            ),
        };
        let mut sessions = self.sessions.lock().unwrap();
        if !sessions.contains(&id) {
            sessions.push(id.clone());
        }
        Ok(id)
    }

    async fn get_qr_code(&self, session_id: Option<&str>) -> String {
        session_id
            .and_then(|id| self.qr_codes.lock().unwrap().get(id).cloned())
            .unwrap_or_default()
    }

    async fn is_authenticated(&self, session_id: Option<&str>) -> bool {
        session_id.is_some_and(|id| self.authenticated.lock().unwrap().contains(id))
    }

    async fn get_active_sessions(&self) -> Vec<String> {
        self.sessions.lock().unwrap().clone()
    }

    async fn close_session(&self, session_id: &str) -> Result<bool> {
        self.closed.lock().unwrap().push(session_id.to_string());
        if self.close_fails.load(Ordering::SeqCst) {
            return Err(GatewayError::Provider("close failed".to_string()));
        }
        let mut sessions = self.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|id| id != session_id);
        self.set_authenticated(session_id, false);
        Ok(sessions.len() != before)
    }

    async fn get_session_info(&self, session_id: &str) -> Result<SessionInfo> {
        if !self.sessions.lock().unwrap().iter().any(|id| id == session_id) {
            return Err(GatewayError::SessionNotFound(session_id.to_string()));
        }
        let now = Utc::now();
        Ok(SessionInfo {
            session_id: session_id.to_string(),
            phone_number: "unknown".to_string(),
            name: "Unnamed device".to_string(),
            state: SessionState::Connecting,
            is_active: self.is_authenticated(Some(session_id)).await,
            created_at: now,
            last_connected: now,
        })
    }

    async fn get_default_session(&self) -> Result<String> {
        if self.default_fails.load(Ordering::SeqCst) {
            return Err(GatewayError::NoAuthenticatedSession);
        }
        self.default_session
            .lock()
            .unwrap()
            .clone()
            .ok_or(GatewayError::NoAuthenticatedSession)
    }

    async fn set_default_session(&self, session_id: &str) -> Result<()> {
        if !self.is_authenticated(Some(session_id)).await {
            return Err(GatewayError::NotAuthenticated(session_id.to_string()));
        }
        self.set_default(Some(session_id));
        Ok(())
    }

    async fn send_text_message(
        &self,
        to: &str,
        text: &str,
        session_id: Option<&str>,
    ) -> Result<Message> {
        if self.sends_fail.load(Ordering::SeqCst) {
            return Err(GatewayError::Provider("send failed".to_string()));
        }
        self.texts.lock().unwrap().push(SentText {
            to: to.to_string(),
            text: text.to_string(),
            session_id: session_id.map(str::to_string),
        });
        Ok(Self::sent_message(to, MessageContent::text(text)))
    }

    async fn send_media_message(
        &self,
        to: &str,
        media: MediaPayload,
        session_id: Option<&str>,
    ) -> Result<Message> {
        if self.sends_fail.load(Ordering::SeqCst) {
            return Err(GatewayError::Provider("send failed".to_string()));
        }
        let content = MessageContent::media(
            media.data.clone(),
            Some(media.mime_type.clone()),
            media.caption.clone(),
        );
        self.media
            .lock()
            .unwrap()
            .push((to.to_string(), media, session_id.map(str::to_string)));
        Ok(Self::sent_message(to, content))
    }

    fn subscribe(&self, scope: EventScope) -> Subscription {
        self.router.subscribe(scope)
    }
}
