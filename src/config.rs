// config.rs
use anyhow::{Context, Result};
use config::builder::{ConfigBuilder, DefaultState};
use serde::{Deserialize, Serialize};

use crate::client::{ClientConfig, Greeting, DEFAULT_API};
use crate::webhook::WebhookConfig;

/// Optional config file, looked up with any supported extension.
const CONFIG_FILE: &str = "fbot";
/// Environment variables `FBOT_PAGE_TOKEN`, `FBOT_APP_SECRET`, ...
const ENV_PREFIX: &str = "FBOT";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub page_token: String,
    pub app_secret: String,
    pub verify_token: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,
    /// Applied at startup as the Get Started button payload when set.
    #[serde(default)]
    pub get_started_payload: Option<String>,
    /// Applied at startup as the default-locale greeting when set.
    #[serde(default)]
    pub greeting: Option<String>,
}

fn default_api_url() -> String {
    DEFAULT_API.to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_webhook_path() -> String {
    "/webhook".to_string()
}

impl Config {
    /// Loads `fbot.toml` (if present) overlaid with `FBOT_*` variables.
    pub fn load() -> Result<Self> {
        Self::from_builder(
            config::Config::builder()
                .add_source(config::File::with_name(CONFIG_FILE).required(false))
                .add_source(config::Environment::with_prefix(ENV_PREFIX)),
        )
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let config: Config = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("page_token", &self.page_token),
            ("app_secret", &self.app_secret),
            ("verify_token", &self.verify_token),
        ] {
            if value.is_empty() {
                anyhow::bail!("{} must not be empty", name);
            }
        }
        if !self.webhook_path.starts_with('/') {
            anyhow::bail!("webhook_path must start with '/': {}", self.webhook_path);
        }
        Ok(())
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            token: self.page_token.clone(),
            secret: self.app_secret.clone(),
            api: Some(self.api_url.clone()),
        }
    }

    /// Greetings to publish, if a greeting text is configured.
    pub fn greetings(&self) -> Vec<Greeting> {
        self.greeting
            .iter()
            .map(|text| Greeting {
                locale: "default".to_string(),
                text: text.clone(),
            })
            .collect()
    }

    pub fn webhook_config(&self) -> WebhookConfig {
        WebhookConfig {
            app_secret: self.app_secret.clone(),
            verify_token: self.verify_token.clone(),
        }
    }
}
