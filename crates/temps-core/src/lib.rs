//! Core utilities and types shared across all Temps crates

pub mod config;
pub mod error;
pub mod notifications;
pub mod types;

// Re-export commonly used types
pub use config::*;
pub use error::*;
pub use types::*;

// Re-export external dependencies
pub use anyhow;
pub use async_trait;
pub use chrono;
pub use serde;
pub use serde_json;
pub use thiserror;
pub use tokio;
pub use tracing;
