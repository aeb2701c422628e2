//! QR and authentication state machine
//!
//! One pump task per connection turns provider events into state changes,
//! router events and device record writes. Events from a connection that
//! has been replaced or removed are dropped by generation check.

use super::{Inner, SessionRegistry, UNKNOWN_PHONE};
use crate::db::{DeviceUpdate, NewDevice};
use crate::error::GatewayError;
use crate::whatsapp::events::{SessionEvent, SessionEventKind};
use crate::whatsapp::message::Message;
use crate::whatsapp::provider::{ProviderEvent, ProviderHandle};
use crate::whatsapp::qr::{QrTimers, TimerCallback, normalize_qr};
use crate::whatsapp::session::SessionState;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

pub(super) fn spawn_event_pump(
    registry: Weak<Inner>,
    session_id: String,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<ProviderEvent>,
) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let Some(inner) = registry.upgrade() else {
                break;
            };
            SessionRegistry { inner }
                .handle_event(&session_id, generation, event)
                .await;
        }
        tracing::debug!("WhatsApp: event stream of session {} ended", session_id);
    });
}

fn placeholder_name(session_id: &str) -> String {
    let prefix: String = session_id.chars().take(8).collect();
    format!("Device ({})", prefix)
}

fn account_name(phone: &str) -> String {
    format!("WhatsApp ({})", phone)
}

impl SessionRegistry {
    fn downgrade(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    fn publish(&self, session_id: &str, kind: SessionEventKind) {
        self.inner.router.publish(SessionEvent::new(session_id, kind));
    }

    /// Handle of the session if it is still the given connection
    async fn current_handle(
        &self,
        session_id: &str,
        generation: u64,
    ) -> Option<Arc<dyn ProviderHandle>> {
        self.inner
            .sessions
            .write()
            .await
            .current_mut(session_id, generation)
            .map(|entry| entry.handle.clone())
    }

    async fn handle_event(&self, session_id: &str, generation: u64, event: ProviderEvent) {
        if self.current_handle(session_id, generation).await.is_none() {
            tracing::debug!(
                "WhatsApp: ignoring {:?} from stale connection of session {}",
                event,
                session_id
            );
            return;
        }

        match event {
            ProviderEvent::Qr(raw) => self.on_qr(session_id, generation, &raw).await,
            ProviderEvent::Authenticated => self.on_authenticated(session_id, generation).await,
            ProviderEvent::Ready => self.on_ready(session_id, generation).await,
            ProviderEvent::Disconnected(reason) => {
                self.on_disconnected(session_id, generation, reason).await
            }
            ProviderEvent::Message(message) => self.on_message(session_id, message),
            ProviderEvent::Error(error) => {
                tracing::error!("WhatsApp: client error in session {}: {}", session_id, error);
                self.publish(session_id, SessionEventKind::Error(error));
            }
        }
    }

    async fn on_qr(&self, session_id: &str, generation: u64, raw: &str) {
        tracing::info!("WhatsApp: QR received for session {}, ready to scan", session_id);
        let qr = normalize_qr(raw, &self.inner.settings.qr_image_url);

        {
            let mut sessions = self.inner.sessions.write().await;
            let Some(entry) = sessions.current_mut(session_id, generation) else {
                return;
            };
            entry.current_qr = qr.clone();
            entry.state = SessionState::AwaitingScan;
        }
        self.publish(session_id, SessionEventKind::Qr(qr));

        // A QR means the account is logged out on this session
        let devices = &self.inner.devices;
        let result = async {
            match devices.find_by_session_id(session_id).await? {
                None => {
                    devices
                        .create(NewDevice::new(placeholder_name(session_id), session_id))
                        .await?;
                }
                Some(device) if device.is_active => {
                    devices.update_connection_status(&device.id, false).await?;
                }
                Some(_) => {}
            }
            Ok::<_, GatewayError>(())
        }
        .await;

        if let Err(e) = result {
            tracing::error!(
                "WhatsApp: failed to record QR state of session {}: {}",
                session_id,
                e
            );
        }
    }

    async fn on_authenticated(&self, session_id: &str, generation: u64) {
        tracing::info!("WhatsApp: session {} authenticated", session_id);

        let handle = {
            let mut sessions = self.inner.sessions.write().await;
            let Some(entry) = sessions.current_mut(session_id, generation) else {
                return;
            };
            entry.qr_timers.take();
            entry.current_qr.clear();
            entry.state = SessionState::Authenticated;
            entry.handle.clone()
        };
        self.publish(session_id, SessionEventKind::Authenticated);

        // Identity is usually not populated until shortly after the handshake.
        // The write below runs even if the session is closed meanwhile.
        let registry = self.downgrade();
        let session_id = session_id.to_string();
        let settle = self.inner.settings.auth_settle_delay;
        tokio::spawn(async move {
            tokio::time::sleep(settle).await;
            let Some(inner) = registry.upgrade() else {
                return;
            };
            SessionRegistry { inner }
                .record_authenticated_device(&session_id, handle.as_ref())
                .await;
        });
    }

    async fn record_authenticated_device(&self, session_id: &str, handle: &dyn ProviderHandle) {
        let phone = handle
            .info()
            .and_then(|identity| identity.phone_number)
            .unwrap_or_else(|| UNKNOWN_PHONE.to_string());

        if let Some(entry) = self.inner.sessions.write().await.get_mut(session_id) {
            entry.phone_number = Some(phone.clone());
            entry.device_name = Some(account_name(&phone));
        }

        let devices = &self.inner.devices;
        let result = async {
            match devices.find_by_session_id(session_id).await? {
                Some(device) => {
                    devices
                        .update(&device.id, DeviceUpdate::connected(Some(phone.clone())))
                        .await?;
                }
                None => {
                    devices
                        .create(
                            NewDevice::new(account_name(&phone), session_id)
                                .with_phone(phone.clone())
                                .active(),
                        )
                        .await?;
                }
            }
            Ok::<_, GatewayError>(())
        }
        .await;

        match result {
            Ok(()) => tracing::info!(
                "WhatsApp: device of session {} recorded with number {}",
                session_id,
                phone
            ),
            Err(e) => tracing::error!(
                "WhatsApp: failed to record device of session {}: {}",
                session_id,
                e
            ),
        }
    }

    async fn on_ready(&self, session_id: &str, generation: u64) {
        tracing::info!("WhatsApp: session {} ready", session_id);

        let (handle, known_phone) = {
            let mut sessions = self.inner.sessions.write().await;
            let Some(entry) = sessions.current_mut(session_id, generation) else {
                return;
            };
            entry.state = SessionState::Ready;
            (entry.handle.clone(), entry.phone_number.clone())
        };
        self.publish(session_id, SessionEventKind::Ready);

        let fresh_phone = handle
            .info()
            .and_then(|identity| identity.phone_number)
            .filter(|phone| phone != UNKNOWN_PHONE && Some(phone) != known_phone.as_ref());

        if let Some(phone) = &fresh_phone
            && let Some(entry) = self
                .inner
                .sessions
                .write()
                .await
                .current_mut(session_id, generation)
        {
            entry.phone_number = Some(phone.clone());
            entry.device_name = Some(account_name(phone));
        }

        let devices = &self.inner.devices;
        let result = async {
            let Some(device) = devices.find_by_session_id(session_id).await? else {
                return Ok(());
            };
            if let Some(phone) = fresh_phone {
                let update = DeviceUpdate {
                    name: Some(account_name(&phone)),
                    ..DeviceUpdate::connected(Some(phone))
                };
                devices.update(&device.id, update).await?;
            }
            devices.update_connection_status(&device.id, true).await?;
            Ok::<_, GatewayError>(())
        }
        .await;

        if let Err(e) = result {
            tracing::error!(
                "WhatsApp: failed to mark device of session {} connected: {}",
                session_id,
                e
            );
        }
    }

    async fn on_disconnected(&self, session_id: &str, generation: u64, reason: String) {
        tracing::warn!("WhatsApp: session {} disconnected: {}", session_id, reason);
        self.publish(session_id, SessionEventKind::Disconnected(reason));
        self.mark_device_inactive(session_id).await;

        let entry = {
            let mut sessions = self.inner.sessions.write().await;
            match sessions.current_mut(session_id, generation) {
                Some(entry) => {
                    entry.qr_timers.take();
                    entry.state = SessionState::Disconnected;
                    sessions.remove(session_id)
                }
                None => None,
            }
        };
        // Closed explicitly in the meantime; nothing to reconnect
        let Some(entry) = entry else {
            return;
        };

        if let Err(e) = entry.handle.destroy().await {
            tracing::error!(
                "WhatsApp: failed to release disconnected session {}: {}",
                session_id,
                e
            );
        }

        let phone_number = entry.phone_number;
        let device_name = entry.device_name;
        let registry = self.downgrade();
        let session_id = session_id.to_string();
        let delay = self.inner.settings.reconnect_delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = registry.upgrade() else {
                return;
            };
            let registry = SessionRegistry { inner };

            match registry.initialize(Some(&session_id)).await {
                Ok(_) => {
                    if let Some(entry) = registry.inner.sessions.write().await.get_mut(&session_id) {
                        if entry.phone_number.is_none() {
                            entry.phone_number = phone_number;
                        }
                        if entry.device_name.is_none() {
                            entry.device_name = device_name;
                        }
                    }
                    tracing::info!("WhatsApp: session {} reconnected", session_id);
                }
                Err(e) => tracing::error!(
                    "WhatsApp: failed to reconnect session {}: {}",
                    session_id,
                    e
                ),
            }
        });
    }

    fn on_message(&self, session_id: &str, message: Message) {
        tracing::debug!(
            "WhatsApp: message {} from {} on session {}",
            message.id,
            message.from,
            session_id
        );
        self.publish(session_id, SessionEventKind::Message(message));
    }

    pub(super) async fn start_qr_timers(&self, session_id: &str, generation: u64) {
        let settings = &self.inner.settings;

        let on_refresh: TimerCallback = {
            let registry = self.downgrade();
            let session_id = session_id.to_string();
            Arc::new(move || {
                let registry = registry.clone();
                let session_id = session_id.clone();
                Box::pin(async move {
                    if let Some(inner) = registry.upgrade() {
                        SessionRegistry { inner }
                            .refresh_qr(&session_id, generation)
                            .await;
                    }
                })
            })
        };

        let on_timeout: TimerCallback = {
            let registry = self.downgrade();
            let session_id = session_id.to_string();
            Arc::new(move || {
                let registry = registry.clone();
                let session_id = session_id.clone();
                Box::pin(async move {
                    if let Some(inner) = registry.upgrade() {
                        SessionRegistry { inner }
                            .qr_timed_out(&session_id, generation)
                            .await;
                    }
                })
            })
        };

        let mut sessions = self.inner.sessions.write().await;
        if let Some(entry) = sessions.current_mut(session_id, generation)
            && !matches!(
                entry.state,
                SessionState::Authenticated | SessionState::Ready
            )
        {
            // Replacing drops (and cancels) any previous timers
            entry.qr_timers = Some(QrTimers::start(
                settings.qr_refresh_interval,
                settings.qr_timeout,
                on_refresh,
                on_timeout,
            ));
        }
    }

    async fn refresh_qr(&self, session_id: &str, generation: u64) {
        // Publish under the lock so a refresh never trails `Authenticated`
        let mut sessions = self.inner.sessions.write().await;
        let Some(entry) = sessions.current_mut(session_id, generation) else {
            return;
        };
        if entry.qr_timers.is_none() {
            return;
        }

        if entry.current_qr.is_empty() {
            tracing::debug!("WhatsApp: no QR to refresh for session {}", session_id);
        } else {
            tracing::debug!("WhatsApp: re-emitting QR for session {}", session_id);
            let qr = entry.current_qr.clone();
            self.publish(session_id, SessionEventKind::Qr(qr));
        }
    }

    async fn qr_timed_out(&self, session_id: &str, generation: u64) {
        let timers = {
            let mut sessions = self.inner.sessions.write().await;
            sessions
                .current_mut(session_id, generation)
                .and_then(|entry| entry.qr_timers.take())
        };
        // Already cleared by authentication or teardown
        if timers.is_none() {
            return;
        }
        drop(timers);

        tracing::warn!(
            "WhatsApp: QR window of session {} elapsed, stopping refresh",
            session_id
        );
        if self.is_authenticated(Some(session_id)).await {
            return;
        }

        tracing::warn!(
            "WhatsApp: session {} was not authenticated before the QR timeout",
            session_id
        );
        self.publish(session_id, SessionEventKind::QrTimeout);

        let devices = &self.inner.devices;
        let result = async {
            if let Some(device) = devices.find_by_session_id(session_id).await? {
                let update = DeviceUpdate {
                    is_active: Some(false),
                    ..Default::default()
                };
                devices.update(&device.id, update).await?;
            }
            Ok::<_, GatewayError>(())
        }
        .await;

        if let Err(e) = result {
            tracing::error!(
                "WhatsApp: failed to update device after QR timeout of session {}: {}",
                session_id,
                e
            );
        }
    }
}
