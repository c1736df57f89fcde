use config::{ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub environment: String,
    /// Host part of every address minted locally; also how other mints
    /// address this one.
    pub mint_host: String,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub transaction: TransactionConfig,
    pub propagation: PropagationConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    /// SQLite file path. Empty selects `~/.mint/mint-<environment>.db`;
    /// `:memory:` selects an in-memory store.
    pub path: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TransactionConfig {
    /// Reservation lifetime. Must stay well above worst-case propagation
    /// round-trip plus clock skew between mints.
    pub expiry_ms: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PropagationConfig {
    pub timeout_secs: u64,
    pub max_retry_attempts: u32,
    pub retry_delay_seconds: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let mut builder = config::Config::builder()
            .set_default("environment", environment.clone())?
            .set_default("mint_host", "127.0.0.1:2406")?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 2406)?
            .set_default("server.workers", 4)?
            .set_default("database.path", "")?
            .set_default("database.max_connections", 1)?
            .set_default("transaction.expiry_ms", 3_600_000)?
            .set_default("propagation.timeout_secs", 10)?
            .set_default("propagation.max_retry_attempts", 8)?
            .set_default("propagation.retry_delay_seconds", 2)?;

        if let Ok(config_file) = env::var("CONFIG_FILE") {
            builder = builder.add_source(File::with_name(&config_file).required(false));
        } else {
            builder = builder
                .add_source(File::with_name(&format!("config/{}", environment)).required(false));
        }

        builder = builder.add_source(Environment::with_prefix("MINT").separator("__"));

        if let Ok(host) = env::var("MINT_HOST") {
            builder = builder.set_override("mint_host", host)?;
        }
        if let Ok(port) = env::var("MINT_PORT") {
            builder = builder.set_override("server.port", port)?;
        }
        if let Ok(path) = env::var("DATABASE_PATH") {
            builder = builder.set_override("database.path", path)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.mint_host.is_empty() {
            return Err("mint_host is required".to_string());
        }
        if self.server.port == 0 {
            return Err("Server port cannot be 0".to_string());
        }
        if self.transaction.expiry_ms < 0 {
            return Err("Transaction expiry cannot be negative".to_string());
        }
        if self.propagation.max_retry_attempts == 0 {
            return Err("At least one propagation attempt is required".to_string());
        }
        Ok(())
    }
}
