//! Configuration
//!
//! Layered settings: built-in defaults, then `config.toml`, then
//! `WA_GATEWAY__SECTION__KEY` environment variables, then the flat legacy
//! variables (`PORT`, `LLM_API_URL`, `LOG_LEVEL` and friends).

mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment prefix for structured overrides
const ENV_PREFIX: &str = "WA_GATEWAY";

/// Legacy environment variables and the keys they override
const LEGACY_ENV: &[(&str, &str)] = &[
    ("PORT", "server.port"),
    ("HOST", "server.host"),
    ("LLM_API_URL", "llm.api_url"),
    ("LLM_API_KEY", "llm.api_key"),
    ("LLM_REQUEST_FORMAT", "llm.request_format"),
    ("LLM_RESPONSE_PATH", "llm.response_path"),
    ("LOG_LEVEL", "logging.level"),
];

/// Gateway home directory (`~/.wa-gateway`)
pub fn gateway_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".wa-gateway")
}

/// Default location of the config file
pub fn default_config_path() -> PathBuf {
    gateway_home().join("config.toml")
}

impl Config {
    /// Load configuration. An explicit `path` must exist; the default path is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (file, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (default_config_path(), false),
        };

        let defaults = config::Config::try_from(&Config::default())
            .context("Failed to serialize default configuration")?;

        let mut builder = config::Config::builder()
            .add_source(defaults)
            .add_source(config::File::from(file.as_path()).required(required))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            );

        for (var, key) in LEGACY_ENV {
            let value = std::env::var(var).ok().filter(|v| !v.is_empty());
            builder = builder
                .set_override_option(*key, value)
                .with_context(|| format!("Invalid override for {}", key))?;
        }

        let config: Config = builder
            .build()
            .with_context(|| format!("Failed to load configuration from {}", file.display()))?
            .try_deserialize()
            .context("Invalid configuration")?;

        tracing::debug!("Configuration loaded (file: {})", file.display());
        Ok(config)
    }

    /// Render as TOML, for the `config` subcommand
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render configuration")
    }
}
