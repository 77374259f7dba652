//! Outbound notification contract.
//!
//! The PKI engine hands fully described messages to a [`NotificationService`];
//! rendering the named template and SMTP delivery belong to the implementor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Binary attachment carried by an [`EmailMessage`], e.g. a PKCS#12 bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailAttachment {
    pub filename: String,
    pub content_type: String,
    #[serde(with = "serde_bytes_base64")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmailMessage {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub from: Option<String>,
    /// Template the delivery side should render, e.g. `pki_certificate`.
    pub template: Option<String>,
    pub header: Option<String>,
    pub footer: Option<String>,
    /// Values substituted into the template.
    pub variables: HashMap<String, String>,
    pub attachments: Vec<EmailAttachment>,
}

#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn send_email(&self, message: EmailMessage) -> Result<(), NotificationError>;
    /// Whether delivery is set up at all; callers skip sending when it is not.
    async fn is_configured(&self) -> Result<bool, NotificationError>;
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Failed to send notification: {0}")]
    SendError(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

mod serde_bytes_base64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        use base64::Engine;
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        use base64::Engine;
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
