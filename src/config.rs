use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;

const DEFAULT_MAX_CONNECTIONS: u32 = 20;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub host: String,
    pub port: u16,

    // Key material for the card number codec. Changing it orphans every stored identifier.
    pub card_number_key: Secret<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists (for local development)
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::Environment::default().separator("__"))
            .build()?;

        let card_number_key = Secret::new(config.get::<String>("card_number_key")?);
        if card_number_key.expose_secret().trim().is_empty() {
            return Err(config::ConfigError::Message(
                "card_number_key must not be blank".to_string(),
            ));
        }

        Ok(Self {
            database_url: config.get("database_url")?,
            database_max_connections: config
                .get("database_max_connections")
                .unwrap_or(DEFAULT_MAX_CONNECTIONS),
            host: config.get("host").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: config.get("port")?,
            card_number_key,
        })
    }
}
