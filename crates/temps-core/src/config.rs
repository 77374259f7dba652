//! Configuration management utilities

use serde::{Deserialize, Serialize};

fn default_max_connections() -> u32 {
    100
}

fn default_min_connections() -> u32 {
    5
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
        }
    }

    /// SQLite in-memory databases live inside a single connection, so the pool
    /// must never open a second one.
    pub fn is_sqlite_memory(&self) -> bool {
        self.url.starts_with("sqlite::memory:") || self.url.contains("mode=memory")
    }
}
