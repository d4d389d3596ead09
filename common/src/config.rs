use serde::Deserialize;
use std::{error::Error, fs};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CommonConfig {
    pub project_name: String,
    pub database_url: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct BackendConfig {
    pub server_address: String,
    pub log_level: String,
    #[serde(default = "default_cors_origin")]
    pub cors_allow_origin: String,
}

fn default_cors_origin() -> String {
    "http://localhost:3000".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PaymentsConfig {
    /// Secret API key for the card gateway.
    pub secret_key: String,
    /// Shared secret the gateway signs webhook deliveries with.
    pub webhook_secret: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Gateway API base URL. Overridable so tests can point at a stub server.
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_currency() -> String {
    "usd".to_string()
}

fn default_api_base() -> String {
    "https://api.stripe.com".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    pub common: CommonConfig,
    pub backend: BackendConfig,
    pub payments: PaymentsConfig,
}

impl Config {
    pub fn load(config_path: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let contents = fs::read_to_string(config_path)?;
        let config = serde_yml::from_str(&contents)?;

        Ok(config)
    }
}
