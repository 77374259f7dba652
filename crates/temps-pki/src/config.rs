//! Engine configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_renewal_interval_secs() -> u64 {
    3600
}

fn default_mail_from() -> String {
    "root@localhost".to_string()
}

fn default_p12_password_length() -> usize {
    16
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PkiConfig {
    /// Period between two renewal sweeps.
    #[serde(default = "default_renewal_interval_secs")]
    pub renewal_interval_secs: u64,
    /// Last-resort recipient for renewal reminders and PKCS#12 mails.
    #[serde(default)]
    pub alert_email: Option<String>,
    /// Sender used when a profile does not define one.
    #[serde(default = "default_mail_from")]
    pub mail_from: String,
    #[serde(default = "default_p12_password_length")]
    pub p12_password_length: usize,
    /// Profile bound to the SCEP responder when a request names none.
    #[serde(default)]
    pub scep_profile: Option<String>,
}

impl Default for PkiConfig {
    fn default() -> Self {
        Self {
            renewal_interval_secs: default_renewal_interval_secs(),
            alert_email: None,
            mail_from: default_mail_from(),
            p12_password_length: default_p12_password_length(),
            scep_profile: None,
        }
    }
}

impl PkiConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            renewal_interval_secs: lookup("TEMPS_PKI_RENEWAL_INTERVAL")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.renewal_interval_secs),
            alert_email: lookup("TEMPS_PKI_ALERT_EMAIL").filter(|s| !s.is_empty()),
            mail_from: lookup("TEMPS_PKI_MAIL_FROM")
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.mail_from),
            p12_password_length: lookup("TEMPS_PKI_P12_PASSWORD_LENGTH")
                .and_then(|s| s.parse().ok())
                .filter(|len| *len >= 8)
                .unwrap_or(defaults.p12_password_length),
            scep_profile: lookup("TEMPS_PKI_SCEP_PROFILE").filter(|s| !s.is_empty()),
        }
    }

    pub fn renewal_interval(&self) -> Duration {
        Duration::from_secs(self.renewal_interval_secs.max(1))
    }
}
