//! Process Wiring
//!
//! Builds the gateway from configuration and a provider implementation,
//! serves HTTP, restores persisted sessions and shuts everything down on
//! Ctrl-C.

use crate::config::Config;
use crate::db::{Database, DeviceRepository, SqliteDeviceRepository};
use crate::gateway::{self, AppState};
use crate::llm::{HttpLlmAdapter, LlmService};
use crate::usecases::{DeviceManagement, ReceiveMessage, SendMessage};
use crate::whatsapp::{LifecycleSettings, SessionRegistry, WhatsAppProvider, WhatsAppService};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Start sessions for persisted devices.
///
/// With `restore` every device's session is initialized. A fresh default
/// session is started when no device exists yet. Failures are logged and
/// skipped. Returns the number of sessions started.
pub async fn restore_sessions(
    whatsapp: &dyn WhatsAppService,
    devices: &dyn DeviceRepository,
    restore: bool,
) -> Result<usize> {
    let known = devices
        .find_all()
        .await
        .context("Failed to load devices for session restore")?;

    if known.is_empty() {
        tracing::info!("WhatsApp: no devices yet, starting a default session");
        return match whatsapp.initialize(None).await {
            Ok(id) => {
                tracing::info!("WhatsApp: default session {} started, waiting for scan", id);
                Ok(1)
            }
            Err(e) => {
                tracing::error!("WhatsApp: failed to start default session: {}", e);
                Ok(0)
            }
        };
    }

    if !restore {
        tracing::info!(
            "WhatsApp: session restore disabled, {} device(s) left offline",
            known.len()
        );
        return Ok(0);
    }

    let mut started = 0;
    for device in &known {
        match whatsapp.initialize(Some(&device.session_id)).await {
            Ok(_) => {
                started += 1;
                tracing::info!(
                    "WhatsApp: restored session {} for device {}",
                    device.session_id,
                    device.name
                );
            }
            Err(e) => tracing::error!(
                "WhatsApp: failed to restore session {} for device {}: {}",
                device.session_id,
                device.name,
                e
            ),
        }
    }
    tracing::info!("WhatsApp: restored {}/{} session(s)", started, known.len());
    Ok(started)
}

/// Run the gateway until Ctrl-C.
///
/// This is the serving entry point. The `wa-gateway` binary carries no
/// protocol client, so the program that owns one calls `run` with it:
///
/// ```no_run
/// use std::sync::Arc;
/// use wa_gateway::whatsapp::WhatsAppProvider;
///
/// async fn serve(provider: Arc<dyn WhatsAppProvider>) -> anyhow::Result<()> {
///     let config = wa_gateway::Config::load(None)?;
///     wa_gateway::app::run(config, provider).await
/// }
/// ```
pub async fn run(config: Config, provider: Arc<dyn WhatsAppProvider>) -> Result<()> {
    let db = Database::connect(&config.database.path).await?;
    db.run_migrations().await?;

    let devices: Arc<dyn DeviceRepository> =
        Arc::new(SqliteDeviceRepository::new(db.pool().clone()));
    let registry = SessionRegistry::new(
        provider,
        devices.clone(),
        LifecycleSettings::from(&config.whatsapp),
    );
    let whatsapp: Arc<dyn WhatsAppService> = Arc::new(registry.clone());
    let llm: Arc<dyn LlmService> = Arc::new(HttpLlmAdapter::new(config.llm.clone())?);

    let receiver = Arc::new(ReceiveMessage::new(whatsapp.clone(), llm)).register();

    let state = AppState::new(
        whatsapp.clone(),
        Arc::new(DeviceManagement::new(
            whatsapp.clone(),
            devices.clone(),
            config.whatsapp.reconnect_settle_delay(),
        )),
        Arc::new(SendMessage::new(whatsapp.clone(), devices.clone())),
    );

    let address = config.server.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;

    let shutdown = CancellationToken::new();
    let server = tokio::spawn(gateway::serve(
        listener,
        gateway::build_router(state),
        shutdown.clone(),
    ));

    let restore = config.whatsapp.restore_sessions;
    let restorer = {
        let whatsapp = whatsapp.clone();
        let devices = devices.clone();
        tokio::spawn(async move {
            if let Err(e) = restore_sessions(whatsapp.as_ref(), devices.as_ref(), restore).await {
                tracing::error!("WhatsApp: session restore failed: {:#}", e);
            }
        })
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutdown signal received");

    shutdown.cancel();
    restorer.abort();
    match server.await {
        Ok(Err(e)) => tracing::error!("Gateway: server error: {}", e),
        Err(e) => tracing::error!("Gateway: server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    receiver.abort();
    registry.shutdown().await;
    db.close().await?;
    Ok(())
}
