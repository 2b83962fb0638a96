use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use tracing::trace;

use crate::monitor::Monitor;

/// Storage backend configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database (default for most deployments)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./upwatch.db")
}

/// Control API configuration
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ApiConfig {
    /// Address to bind the HTTP server to
    #[serde(default = "default_bind", alias = "bind_addr")]
    pub bind: SocketAddr,

    /// Bearer token required for all routes except health
    #[serde(default, alias = "auth_token")]
    pub token: Option<String>,

    /// Allow cross-origin requests
    #[serde(default = "default_cors", alias = "enable_cors")]
    pub cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            token: None,
            cors: default_cors(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_cors() -> bool {
    true
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    /// Storage configuration (defaults to SQLite)
    pub storage: Option<StorageConfig>,

    /// Control API configuration (defaults to localhost:8080)
    pub api: Option<ApiConfig>,

    /// Monitors seeded into storage on startup
    #[serde(default)]
    pub monitors: Vec<Monitor>,
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
    serde_json::from_str(&file_content)
        .context("invalid configuration file provided")
        .inspect(|config| trace!("loaded config: {config:?}"))
}
