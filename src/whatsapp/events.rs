//! Connection Event Router
//!
//! Publish/subscribe fan-out of per-session events. Every subscription is
//! an owned handle: dropping it (or calling `unsubscribe`) removes the
//! subscriber, so reconnect cycles never accumulate listeners.

use super::message::Message;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Which sessions a subscriber wants to hear about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventScope {
    Session(String),
    /// Every session, including ones created after subscribing
    All,
}

impl EventScope {
    fn matches(&self, session_id: &str) -> bool {
        match self {
            Self::Session(id) => id == session_id,
            Self::All => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEventKind {
    /// Normalized QR value, also re-emitted by the refresh timer
    Qr(String),
    Authenticated,
    Ready,
    Disconnected(String),
    Message(Message),
    Error(String),
    /// Scan window elapsed without authentication
    QrTimeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub session_id: String,
    pub kind: SessionEventKind,
}

impl SessionEvent {
    pub fn new(session_id: impl Into<String>, kind: SessionEventKind) -> Self {
        Self {
            session_id: session_id.into(),
            kind,
        }
    }
}

struct Subscriber {
    scope: EventScope,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

#[derive(Default)]
struct RouterInner {
    next_id: u64,
    subscribers: HashMap<u64, Subscriber>,
}

/// Fan-out hub shared by the registry and its consumers
#[derive(Clone, Default)]
pub struct EventRouter {
    inner: Arc<Mutex<RouterInner>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    // Critical sections never panic, so a poisoned lock still holds a valid map.
    fn lock(inner: &Mutex<RouterInner>) -> MutexGuard<'_, RouterInner> {
        inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self, scope: EventScope) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = Self::lock(&self.inner);
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.insert(id, Subscriber { scope, tx });
        tracing::trace!("Events: subscriber {} registered", id);

        Subscription {
            id,
            rx,
            router: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver an event to every matching subscriber. Returns the number of
    /// receivers reached.
    pub fn publish(&self, event: SessionEvent) -> usize {
        let mut inner = Self::lock(&self.inner);
        let mut delivered = 0;
        inner.subscribers.retain(|_, sub| {
            if sub.tx.is_closed() {
                return false;
            }
            if sub.scope.matches(&event.session_id) && sub.tx.send(event.clone()).is_ok() {
                delivered += 1;
            }
            true
        });
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        Self::lock(&self.inner).subscribers.len()
    }
}

/// Owned subscription handle
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<SessionEvent>,
    router: Weak<Mutex<RouterInner>>,
}

impl Subscription {
    /// Next event; `None` once the router is gone
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }

    /// Non-blocking poll for a pending event
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.rx.try_recv().ok()
    }

    /// Explicitly release the subscription
    pub fn unsubscribe(self) {}
}

impl Stream for Subscription {
    type Item = SessionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.router.upgrade() {
            EventRouter::lock(&inner).subscribers.remove(&self.id);
            tracing::trace!("Events: subscriber {} removed", self.id);
        }
    }
}
