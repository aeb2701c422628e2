//! Configuration sections

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default QR image service. `{data}` receives the URL-encoded QR payload.
pub const DEFAULT_QR_IMAGE_URL: &str =
    "https://api.qrserver.com/v1/create-qr-code/?size=250x250&data={data}";

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub whatsapp: WhatsAppConfig,
    pub llm: LlmConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: super::gateway_home().join("gateway.db"),
        }
    }
}

/// WhatsApp session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppConfig {
    /// Root directory for per-session provider credentials
    pub auth_dir: PathBuf,
    /// QR image URL template, must contain `{data}`
    pub qr_image_url: String,
    /// Re-open the sessions of persisted devices at startup
    pub restore_sessions: bool,
    pub init_timeout_secs: u64,
    pub qr_refresh_secs: u64,
    pub qr_timeout_secs: u64,
    pub auth_settle_secs: u64,
    pub reconnect_delay_secs: u64,
    pub reconnect_settle_secs: u64,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            auth_dir: super::gateway_home().join("auth"),
            qr_image_url: DEFAULT_QR_IMAGE_URL.to_string(),
            restore_sessions: true,
            init_timeout_secs: 60,
            qr_refresh_secs: 15,
            qr_timeout_secs: 600,
            auth_settle_secs: 5,
            reconnect_delay_secs: 5,
            reconnect_settle_secs: 1,
        }
    }
}

impl WhatsAppConfig {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }

    pub fn qr_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.qr_refresh_secs)
    }

    pub fn qr_timeout(&self) -> Duration {
        Duration::from_secs(self.qr_timeout_secs)
    }

    pub fn auth_settle_delay(&self) -> Duration {
        Duration::from_secs(self.auth_settle_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn reconnect_settle_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_settle_secs)
    }
}

/// External LLM endpoint used for auto-replies
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Empty disables auto-replies
    pub api_url: String,
    pub api_key: String,
    /// JSON template with `{message}` / `{context}` placeholders
    pub request_format: String,
    /// Dotted path into the response body, e.g. `choices.0.message.content`
    pub response_path: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_key: String::new(),
            request_format: String::new(),
            response_path: String::new(),
            model: "llama-3.2-1b-preview".to_string(),
            timeout_secs: 30,
        }
    }
}

impl LlmConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_url.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    /// When set, logs are also written to a daily rolling file here
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            directory: None,
        }
    }
}
