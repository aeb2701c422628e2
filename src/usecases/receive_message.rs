//! Inbound auto-reply
//!
//! Every inbound text is forwarded to the LLM backend and the reply is sent
//! back to the sender on the session the message arrived on.

use crate::llm::{LlmService, MessageContext};
use crate::whatsapp::{EventScope, Message, SessionEventKind, WhatsAppService};
use std::sync::Arc;
use tokio::task::JoinHandle;

pub struct ReceiveMessage {
    whatsapp: Arc<dyn WhatsAppService>,
    llm: Arc<dyn LlmService>,
}

impl ReceiveMessage {
    pub fn new(whatsapp: Arc<dyn WhatsAppService>, llm: Arc<dyn LlmService>) -> Self {
        Self { whatsapp, llm }
    }

    /// Handle one inbound message. Failures are logged and never propagate.
    pub async fn execute(&self, message: &Message, session_id: &str) {
        if message.is_from_me {
            return;
        }
        let Some(text) = message.content.text_body() else {
            tracing::debug!("Messages: ignoring non-text message {} from {}", message.id, message.from);
            return;
        };

        tracing::info!(
            "Messages: received {} from {} on session {}",
            message.id,
            message.from,
            session_id
        );

        let context = MessageContext {
            from: message.from.clone(),
            timestamp: message.timestamp,
            session_id: session_id.to_string(),
        };

        let reply = match self.llm.process_message(text, &context).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!("Messages: failed to generate reply to {}: {}", message.id, e);
                return;
            }
        };

        if let Err(e) = self
            .whatsapp
            .send_text_message(&message.from, &reply, Some(session_id))
            .await
        {
            tracing::error!("Messages: failed to reply to {}: {}", message.from, e);
        }
    }

    /// Subscribe to inbound messages on every session, current and future.
    /// Each message is answered on its own task.
    pub fn register(self: Arc<Self>) -> JoinHandle<()> {
        let mut events = self.whatsapp.subscribe(EventScope::All);
        tracing::info!("Messages: auto-reply handler registered");

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let SessionEventKind::Message(message) = event.kind {
                    let this = self.clone();
                    let session_id = event.session_id;
                    tokio::spawn(async move {
                        this.execute(&message, &session_id).await;
                    });
                }
            }
            tracing::debug!("Messages: event stream closed, auto-reply handler stopped");
        })
    }
}
