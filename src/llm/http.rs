//! HTTP LLM adapter
//!
//! Posts the message to a configurable endpoint. The request body can be
//! templated (`{message}`, `{context}`) and the reply located with a dotted
//! path, so most chat-completion style APIs work without code changes.

use super::{LlmService, MessageContext};
use crate::config::LlmConfig;
use crate::error::Result;
use anyhow::Context;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};
use std::time::Duration;

/// Returned when no endpoint is configured
pub const UNAVAILABLE_REPLY: &str =
    "Auto-reply is not available. Ask the administrator to configure the LLM API URL.";

/// Returned when the backend call fails
pub const APOLOGY_REPLY: &str =
    "Sorry, something went wrong while processing your message. Please try again later.";

/// Returned when `response_path` does not resolve
pub const MISSING_RESPONSE: &str = "Response not found in the expected format";

pub struct HttpLlmAdapter {
    client: reqwest::Client,
    config: LlmConfig,
    placeholder: Regex,
}

impl HttpLlmAdapter {
    pub fn new(config: LlmConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build LLM HTTP client")?;
        let placeholder = Regex::new(r"\{(\w+)\}").context("Invalid placeholder pattern")?;

        if !config.is_configured() {
            tracing::warn!("LLM: API URL not configured, auto-replies are disabled");
        }

        Ok(Self {
            client,
            config,
            placeholder,
        })
    }

    /// Request body: the configured template when it parses, else the default shape
    fn build_payload(&self, text: &str, context: &MessageContext) -> Value {
        let context_json = serde_json::to_value(context).unwrap_or(Value::Null);

        if !self.config.request_format.trim().is_empty() {
            match serde_json::from_str::<Value>(&self.config.request_format) {
                Ok(template) => {
                    let context_text = context_json.to_string();
                    return self.fill_template(template, text, &context_text);
                }
                Err(e) => {
                    tracing::error!("LLM: invalid request_format template, using default: {}", e)
                }
            }
        }

        json!({
            "prompt": text,
            "model": self.config.model,
            "context": context_json,
        })
    }

    fn fill_template(&self, template: Value, message: &str, context: &str) -> Value {
        match template {
            Value::String(s) => {
                let filled = self.placeholder.replace_all(&s, |caps: &regex::Captures| {
                    match &caps[1] {
                        "message" => message.to_string(),
                        "context" => context.to_string(),
                        _ => caps[0].to_string(),
                    }
                });
                Value::String(filled.into_owned())
            }
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| self.fill_template(item, message, context))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, self.fill_template(v, message, context)))
                    .collect(),
            ),
            other => other,
        }
    }

    async fn call(&self, text: &str, context: &MessageContext) -> anyhow::Result<String> {
        let payload = self.build_payload(text, context);

        let mut request = self.client.post(&self.config.api_url).json(&payload);
        if !self.config.api_key.is_empty() {
            request = request.bearer_auth(&self.config.api_key);
        }

        let response = request
            .send()
            .await
            .context("request failed")?
            .error_for_status()
            .context("backend returned an error status")?;
        let body: Value = response.json().await.context("invalid JSON response")?;

        Ok(extract_response(&body, &self.config.response_path))
    }
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Text form of a JSON value; `None` for null, empty strings and `false`
fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn walk<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(root, |node, segment| match node {
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        Value::Object(map) => map.get(segment),
        _ => None,
    })
}

/// Locate the reply text in a backend response
pub(crate) fn extract_response(body: &Value, response_path: &str) -> String {
    let root = match body.get("result") {
        Some(result) if !result.is_null() => result,
        _ => body,
    };

    if !response_path.is_empty() {
        return walk(root, response_path)
            .and_then(text_of)
            .unwrap_or_else(|| MISSING_RESPONSE.to_string());
    }

    if let Value::String(s) = root {
        return s.clone();
    }

    for key in ["text", "response", "message"] {
        if let Some(found) = root.get(key).and_then(text_of) {
            return found;
        }
    }

    if let Some(choice) = root.get("choices").and_then(|c| c.get(0)) {
        return choice
            .pointer("/message/content")
            .and_then(text_of)
            .or_else(|| choice.get("text").and_then(text_of))
            .unwrap_or_default();
    }

    if let Some(content) = root.get("content").and_then(text_of) {
        return content;
    }

    root.to_string()
}

#[async_trait]
impl LlmService for HttpLlmAdapter {
    async fn process_message(&self, text: &str, context: &MessageContext) -> Result<String> {
        if !self.config.is_configured() {
            return Ok(UNAVAILABLE_REPLY.to_string());
        }

        tracing::info!("LLM: forwarding message \"{}...\"", truncate(text, 50));
        match self.call(text, context).await {
            Ok(reply) => {
                tracing::debug!("LLM: reply \"{}...\"", truncate(&reply, 50));
                Ok(reply)
            }
            Err(e) => {
                tracing::error!("LLM: failed to process message: {:#}", e);
                Ok(APOLOGY_REPLY.to_string())
            }
        }
    }
}
