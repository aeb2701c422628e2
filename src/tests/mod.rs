//! Crate-level scenarios wiring the real registry, SQLite repository and
//! use cases against the scripted provider.

pub mod support;

use crate::db::{Database, DeviceRepository, SqliteDeviceRepository};
use crate::llm::MockLlmService;
use crate::usecases::{DeviceManagement, ReceiveMessage, SendMessage};
use crate::whatsapp::{
    EventScope, Message, MessageContent, OutboundPayload, ProviderEvent, SessionEventKind,
    SessionRegistry, WhatsAppService,
};
use std::sync::Arc;
use std::time::Duration;
use support::{FakeProvider, InitBehavior, eventually, test_settings};
use tempfile::TempDir;

struct Gateway {
    _db: Database,
    _auth_dir: TempDir,
    provider: Arc<FakeProvider>,
    registry: SessionRegistry,
    devices: Arc<SqliteDeviceRepository>,
}

async fn gateway() -> Gateway {
    let db = Database::connect_in_memory().await.unwrap();
    db.run_migrations().await.unwrap();
    let devices = Arc::new(SqliteDeviceRepository::new(db.pool().clone()));
    let auth_dir = tempfile::tempdir().unwrap();
    let provider = FakeProvider::new();
    let registry = SessionRegistry::new(
        provider.clone(),
        devices.clone(),
        test_settings(auth_dir.path()),
    );
    Gateway {
        _db: db,
        _auth_dir: auth_dir,
        provider,
        registry,
        devices,
    }
}

impl Gateway {
    fn whatsapp(&self) -> Arc<dyn WhatsAppService> {
        Arc::new(self.registry.clone())
    }

    fn management(&self) -> DeviceManagement {
        DeviceManagement::new(self.whatsapp(), self.devices.clone(), Duration::from_millis(1))
    }

    async fn is_active(&self, session_id: &str) -> bool {
        self.devices
            .find_by_session_id(session_id)
            .await
            .unwrap()
            .is_some_and(|d| d.is_active)
    }
}

#[tokio::test]
async fn test_scan_then_send_through_persisted_device() {
    let gw = gateway().await;
    let management = gw.management();

    let device = management.create_device("Sales", None).await.unwrap();
    assert!(!device.is_active);
    let session_id = device.session_id.clone();

    gw.provider.emit(&session_id, ProviderEvent::Qr("raw-qr".into()));
    eventually("QR stored", || async {
        !gw.registry.get_qr_code(Some(&session_id)).await.is_empty()
    })
    .await;
    // The device already exists, so no placeholder is created
    assert_eq!(gw.devices.find_all().await.unwrap().len(), 1);

    let handle = gw.provider.handle(&session_id);
    handle.set_phone(Some("5511988887777"));
    handle.set_open(true);
    gw.provider.emit(&session_id, ProviderEvent::Authenticated);
    eventually("device marked active", || gw.is_active(&session_id)).await;

    let stored = gw.devices.find_by_id(&device.id).await.unwrap().unwrap();
    assert_eq!(stored.phone_number.as_deref(), Some("5511988887777"));
    assert!(stored.last_connected.is_some());

    let status = management.get_device_status(&device.id).await.unwrap();
    assert!(status.is_connected);
    assert!(status.qr_code.is_none());
    assert!(status.is_default);

    let send = SendMessage::new(gw.whatsapp(), gw.devices.clone());
    let sent = send
        .execute("+55 11 91234-5678", MessageContent::text("hello"), None)
        .await
        .unwrap();

    assert_eq!(sent.to, "5511912345678@c.us");
    assert_eq!(
        handle.sent(),
        vec![(
            "5511912345678@c.us".to_string(),
            OutboundPayload::Text("hello".to_string())
        )]
    );
}

#[tokio::test]
async fn test_create_device_keeps_name_when_qr_arrives_during_startup() {
    let gw = gateway().await;
    gw.provider.set_init(InitBehavior::QrDuringStartup);

    let device = gw.management().create_device("Sales", None).await.unwrap();

    assert_eq!(device.name, "Sales");
    let stored = gw.devices.find_all().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].name, "Sales");
    assert_eq!(stored[0].session_id, device.session_id);
    assert!(!stored[0].is_active);
    assert!(!gw.registry.get_qr_code(Some(&device.session_id)).await.is_empty());
}

#[tokio::test]
async fn test_inbound_message_gets_llm_reply_on_same_session() {
    let gw = gateway().await;
    gw.registry.initialize(Some("s1")).await.unwrap();
    gw.registry.initialize(Some("s2")).await.unwrap();

    let mut llm = MockLlmService::new();
    llm.expect_process_message()
        .withf(|text, ctx| text == "ping" && ctx.session_id == "s2")
        .times(1)
        .returning(|_, _| Ok("pong".to_string()));
    let receiver = Arc::new(ReceiveMessage::new(gw.whatsapp(), Arc::new(llm))).register();

    gw.provider.emit(
        "s2",
        ProviderEvent::Message(Message::incoming_text("m1", "5511@c.us", "me@c.us", "ping")),
    );

    let handle = gw.provider.handle("s2");
    eventually("reply sent", || async { !handle.sent().is_empty() }).await;
    assert_eq!(
        handle.sent(),
        vec![("5511@c.us".to_string(), OutboundPayload::Text("pong".to_string()))]
    );
    assert!(gw.provider.handle("s1").sent().is_empty());

    receiver.abort();
}

#[tokio::test]
async fn test_disconnect_persists_inactive_and_reconnects() {
    let gw = gateway().await;
    gw.registry.initialize(Some("s1")).await.unwrap();

    let first = gw.provider.handle("s1");
    first.set_phone(Some("5511"));
    first.set_open(true);
    gw.provider.emit("s1", ProviderEvent::Authenticated);
    eventually("device recorded", || gw.is_active("s1")).await;

    gw.provider
        .emit("s1", ProviderEvent::Disconnected("NAVIGATION".into()));
    eventually("reconnected", || async { gw.provider.handles("s1").len() == 2 }).await;

    assert!(first.is_destroyed());
    assert!(!gw.is_active("s1").await);
    assert_eq!(gw.registry.get_active_sessions().await, vec!["s1".to_string()]);

    let device = gw.devices.find_by_session_id("s1").await.unwrap().unwrap();
    assert_eq!(device.name, "WhatsApp (5511)");
}

#[tokio::test]
async fn test_qr_timeout_leaves_device_inactive() {
    let gw = gateway().await;
    let mut events = gw.registry.subscribe(EventScope::Session("lonely".into()));
    gw.registry.initialize(Some("lonely")).await.unwrap();
    gw.provider.emit("lonely", ProviderEvent::Qr("raw".into()));

    eventually("placeholder created", || async {
        gw.devices
            .find_by_session_id("lonely")
            .await
            .unwrap()
            .is_some()
    })
    .await;

    let timed_out = tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(event) = events.recv().await {
            if event.kind == SessionEventKind::QrTimeout {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);

    assert!(timed_out);
    let device = gw.devices.find_by_session_id("lonely").await.unwrap().unwrap();
    assert_eq!(device.name, "Device (lonely)");
    assert!(!device.is_active);
}

#[tokio::test]
async fn test_remove_device_closes_its_session() {
    let gw = gateway().await;
    let management = gw.management();
    let device = management.create_device("Temp", None).await.unwrap();

    management.remove_device(&device.id).await.unwrap();

    assert!(gw.registry.get_active_sessions().await.is_empty());
    assert!(gw.provider.handle(&device.session_id).is_destroyed());
    assert!(gw.devices.find_by_id(&device.id).await.unwrap().is_none());
}
