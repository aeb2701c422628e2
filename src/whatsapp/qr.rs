//! QR handling
//!
//! Payload normalization and the scan-window timers. `QrTimers` owns the
//! timer task through a cancellation guard, so dropping the value (on
//! authentication, close, disconnect or shutdown) stops both the refresh
//! tick and the timeout.

use crate::config::DEFAULT_QR_IMAGE_URL;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};

const DATA_PLACEHOLDER: &str = "{data}";

/// Turn a provider QR payload into something a browser can render.
///
/// `data:image` URIs are kept as they are; anything else is wrapped in the
/// image service URL `template`, with the payload URL-encoded into `{data}`.
pub fn normalize_qr(raw: &str, template: &str) -> String {
    if raw.starts_with("data:image") {
        return raw.to_string();
    }

    match wrap(raw, template) {
        Some(url) => url,
        None => {
            tracing::error!(
                "WhatsApp: QR image template has no {} placeholder, using default service",
                DATA_PLACEHOLDER
            );
            wrap(raw, DEFAULT_QR_IMAGE_URL).unwrap_or_default()
        }
    }
}

fn wrap(raw: &str, template: &str) -> Option<String> {
    template
        .contains(DATA_PLACEHOLDER)
        .then(|| template.replace(DATA_PLACEHOLDER, &urlencoding::encode(raw)))
}

/// Callback fired from the timer task
pub type TimerCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Running refresh/timeout timers for one unauthenticated session
pub struct QrTimers {
    _guard: DropGuard,
}

impl QrTimers {
    /// Re-emit every `refresh_every`; fire `on_timeout` once after `timeout`.
    pub fn start(
        refresh_every: Duration,
        timeout: Duration,
        on_refresh: TimerCallback,
        on_timeout: TimerCallback,
    ) -> Self {
        let token = CancellationToken::new();
        let cancelled = token.clone();

        tokio::spawn(async move {
            let mut refresh = tokio::time::interval_at(Instant::now() + refresh_every, refresh_every);
            refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let deadline = tokio::time::sleep(timeout);
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    _ = &mut deadline => {
                        on_timeout().await;
                        break;
                    }
                    _ = refresh.tick() => on_refresh().await,
                }
            }
        });

        Self {
            _guard: token.drop_guard(),
        }
    }
}
