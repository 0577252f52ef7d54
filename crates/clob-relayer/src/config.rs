//! Relayer configuration.

use std::path::Path;

use serde::Deserialize;

use clob_settlement::SettlementConfig;

use crate::error::{AppError, AppResult};

/// Top-level relayer configuration, loaded from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub chain: ChainConfig,
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub lock: LockConfig,
}

/// RPC endpoint and operator key source.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// Ethereum JSON-RPC endpoint.
    pub rpc_url: String,
    /// Environment variable holding the operator's private key.
    /// The key itself never appears in a config file.
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,
}

fn default_private_key_env() -> String {
    "CLOB_RELAYER_PRIVATE_KEY".to_string()
}

/// Durable store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    /// In-process only; recovery does not survive a restart.
    #[default]
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Postgres connection string, required for the postgres backend.
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            database_url: None,
            max_connections: default_max_connections(),
        }
    }
}

/// Recovery lock backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockBackend {
    Redis,
    /// In-process only; safe for a single relayer instance.
    #[default]
    Memory,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LockConfig {
    #[serde(default)]
    pub backend: LockBackend,
    /// Redis endpoint, required for the redis backend.
    #[serde(default)]
    pub redis_url: Option<String>,
}

impl AppConfig {
    /// Load from `CLOB_RELAYER_CONFIG` or the default path.
    pub fn load() -> AppResult<Self> {
        let config_path = std::env::var("CLOB_RELAYER_CONFIG")
            .unwrap_or_else(|_| "config/default.toml".to_string());
        Self::from_file(&config_path)
    }

    /// Load from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// Resolve the operator's private key from the environment.
    pub fn private_key(&self) -> AppResult<String> {
        std::env::var(&self.chain.private_key_env).map_err(|_| {
            AppError::Config(format!(
                "private key environment variable {} is not set",
                self.chain.private_key_env
            ))
        })
    }

    /// Postgres connection string, if the postgres backend is selected.
    pub fn database_url(&self) -> AppResult<&str> {
        self.store
            .database_url
            .as_deref()
            .ok_or_else(|| AppError::Config("store.database_url is required".to_string()))
    }

    /// Redis endpoint, if the redis backend is selected.
    pub fn redis_url(&self) -> AppResult<&str> {
        self.lock
            .redis_url
            .as_deref()
            .ok_or_else(|| AppError::Config("lock.redis_url is required".to_string()))
    }
}
