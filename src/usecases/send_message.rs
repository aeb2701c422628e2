//! Outbound send: picks the device whose session carries the message.

use crate::db::{Device, DeviceRepository};
use crate::error::{GatewayError, Result};
use crate::whatsapp::{ContentKind, MediaPayload, Message, MessageContent, WhatsAppService};
use std::sync::Arc;

pub struct SendMessage {
    whatsapp: Arc<dyn WhatsAppService>,
    devices: Arc<dyn DeviceRepository>,
}

impl SendMessage {
    pub fn new(whatsapp: Arc<dyn WhatsAppService>, devices: Arc<dyn DeviceRepository>) -> Self {
        Self { whatsapp, devices }
    }

    async fn pick_device(&self, device_id: Option<&str>) -> Result<Device> {
        match device_id {
            Some(id) => {
                let device = self
                    .devices
                    .find_by_id(id)
                    .await?
                    .ok_or_else(|| GatewayError::DeviceNotFound(id.to_string()))?;
                if !device.is_active {
                    return Err(GatewayError::DeviceNotActive(id.to_string()));
                }
                Ok(device)
            }
            None => self
                .devices
                .find_all()
                .await?
                .into_iter()
                .find(|d| d.is_active)
                .ok_or(GatewayError::NoActiveDevice),
        }
    }

    /// Send `content` to `to` through the chosen device, or the first
    /// active device when none is named.
    pub async fn execute(
        &self,
        to: &str,
        content: MessageContent,
        device_id: Option<&str>,
    ) -> Result<Message> {
        let result = async {
            let kind = content.kind()?;
            let device = self.pick_device(device_id).await?;
            let session_id = Some(device.session_id.as_str());

            match kind {
                ContentKind::Text(text) => {
                    self.whatsapp.send_text_message(to, text, session_id).await
                }
                ContentKind::Media(data) => {
                    let media = MediaPayload::new(
                        data.to_vec(),
                        content.media_type.clone(),
                        content.caption.clone(),
                    );
                    self.whatsapp.send_media_message(to, media, session_id).await
                }
            }
        }
        .await;

        match &result {
            Ok(message) => tracing::info!("Messages: sent {} to {}", message.id, message.to),
            Err(e) => tracing::error!("Messages: failed to send to {}: {}", to, e),
        }
        result
    }
}
