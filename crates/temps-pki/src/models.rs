//! Request and result types of the engine's operations.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::{KeyType, SignatureAlgorithm, SubjectAttributes};
use crate::error::{PkiError, PkiResult};

/// Request to create a certificate authority
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCa {
    pub cn: String,
    pub mail: Option<String>,
    #[serde(flatten)]
    pub subject: SubjectAttributes,
    #[serde(default)]
    pub key_type: KeyType,
    pub key_size: i32,
    #[serde(default)]
    pub digest: SignatureAlgorithm,
    pub key_usage: Option<String>,
    pub extended_key_usage: Option<String>,
    pub days: i32,
    pub ocsp_url: Option<String>,
}

/// Request to create a profile. Unset fields take the usual defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NewProfile {
    pub name: String,
    pub ca_id: i32,
    pub mail: Option<String>,
    #[serde(flatten)]
    pub subject: SubjectAttributes,
    pub validity: i32,
    pub key_type: KeyType,
    pub key_size: i32,
    pub digest: SignatureAlgorithm,
    pub key_usage: Option<String>,
    pub extended_key_usage: Option<String>,
    pub ocsp_url: Option<String>,
    pub p12_mail_password: bool,
    pub p12_mail_subject: Option<String>,
    pub p12_mail_from: Option<String>,
    pub p12_mail_header: Option<String>,
    pub p12_mail_footer: Option<String>,
    pub scep_enabled: bool,
    pub scep_challenge_password: Option<String>,
    pub scep_days_before_renewal: i32,
    pub days_before_renewal: i32,
    pub renewal_mail: bool,
    pub days_before_renewal_mail: i32,
    pub renewal_mail_subject: String,
    pub renewal_mail_from: Option<String>,
    pub renewal_mail_header: Option<String>,
    pub renewal_mail_footer: Option<String>,
    pub revoked_valid_until: i32,
    pub cloud_enabled: bool,
    pub cloud_service: Option<String>,
    pub scep_server_enabled: bool,
    pub scep_server_id: Option<i32>,
}

impl Default for NewProfile {
    fn default() -> Self {
        Self {
            name: String::new(),
            ca_id: 0,
            mail: None,
            subject: SubjectAttributes::default(),
            validity: 365,
            key_type: KeyType::Rsa,
            key_size: 2048,
            digest: SignatureAlgorithm::Default,
            key_usage: None,
            extended_key_usage: None,
            ocsp_url: None,
            p12_mail_password: false,
            p12_mail_subject: None,
            p12_mail_from: None,
            p12_mail_header: None,
            p12_mail_footer: None,
            scep_enabled: false,
            scep_challenge_password: None,
            scep_days_before_renewal: 14,
            days_before_renewal: 14,
            renewal_mail: true,
            days_before_renewal_mail: 14,
            renewal_mail_subject: "Certificate expiration".to_string(),
            renewal_mail_from: None,
            renewal_mail_header: None,
            renewal_mail_footer: None,
            revoked_valid_until: 14,
            cloud_enabled: false,
            cloud_service: None,
            scep_server_enabled: false,
            scep_server_id: None,
        }
    }
}

impl NewProfile {
    pub fn new(name: impl Into<String>, ca_id: i32) -> Self {
        Self {
            name: name.into(),
            ca_id,
            ..Default::default()
        }
    }
}

/// Mutable profile fields. `None` keeps the stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileUpdate {
    pub mail: Option<String>,
    pub organisation: Option<String>,
    pub organisational_unit: Option<String>,
    pub country: Option<String>,
    pub state: Option<String>,
    pub locality: Option<String>,
    pub street_address: Option<String>,
    pub postal_code: Option<String>,
    pub validity: Option<i32>,
    pub key_usage: Option<String>,
    pub extended_key_usage: Option<String>,
    pub ocsp_url: Option<String>,
    pub p12_mail_password: Option<bool>,
    pub p12_mail_subject: Option<String>,
    pub p12_mail_from: Option<String>,
    pub p12_mail_header: Option<String>,
    pub p12_mail_footer: Option<String>,
    pub scep_enabled: Option<bool>,
    pub scep_challenge_password: Option<String>,
    pub scep_days_before_renewal: Option<i32>,
    pub days_before_renewal: Option<i32>,
    pub renewal_mail: Option<bool>,
    pub days_before_renewal_mail: Option<i32>,
    pub renewal_mail_subject: Option<String>,
    pub renewal_mail_from: Option<String>,
    pub renewal_mail_header: Option<String>,
    pub renewal_mail_footer: Option<String>,
    pub revoked_valid_until: Option<i32>,
    pub cloud_enabled: Option<bool>,
    pub cloud_service: Option<String>,
    pub scep_server_enabled: Option<bool>,
    pub scep_server_id: Option<i32>,
}

/// Profile addressed by id or by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileRef {
    Id(i32),
    Name(String),
}

impl From<i32> for ProfileRef {
    fn from(id: i32) -> Self {
        ProfileRef::Id(id)
    }
}

impl From<&str> for ProfileRef {
    fn from(name: &str) -> Self {
        ProfileRef::Name(name.to_string())
    }
}

impl fmt::Display for ProfileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfileRef::Id(id) => write!(f, "{}", id),
            ProfileRef::Name(name) => f.write_str(name),
        }
    }
}

/// Identity of a certificate to issue under a profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IssueRequest {
    pub cn: String,
    /// Comma separated addresses; replaces the profile mail when set.
    pub mail: Option<String>,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<String>,
    #[serde(flatten)]
    pub subject: SubjectAttributes,
}

impl IssueRequest {
    pub fn new(cn: impl Into<String>) -> Self {
        Self {
            cn: cn.into(),
            ..Default::default()
        }
    }
}

/// Active certificate addressed by id or by `(cn, profile name)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertRef {
    Id(i32),
    Identity { cn: String, profile_name: String },
}

impl CertRef {
    pub fn identity(cn: &str, profile_name: &str) -> Self {
        CertRef::Identity {
            cn: cn.to_string(),
            profile_name: profile_name.to_string(),
        }
    }
}

impl fmt::Display for CertRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertRef::Id(id) => write!(f, "{}", id),
            CertRef::Identity { cn, profile_name } => write!(f, "{} ({})", cn, profile_name),
        }
    }
}

/// CRL reason codes of RFC 5280.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum RevocationReason {
    Unspecified,
    KeyCompromise,
    CaCompromise,
    AffiliationChanged,
    Superseded,
    CessationOfOperation,
    CertificateHold,
    RemoveFromCrl,
    PrivilegeWithdrawn,
    AaCompromise,
}

impl RevocationReason {
    pub fn from_code(code: i32) -> PkiResult<Self> {
        Ok(match code {
            0 => RevocationReason::Unspecified,
            1 => RevocationReason::KeyCompromise,
            2 => RevocationReason::CaCompromise,
            3 => RevocationReason::AffiliationChanged,
            4 => RevocationReason::Superseded,
            5 => RevocationReason::CessationOfOperation,
            6 => RevocationReason::CertificateHold,
            8 => RevocationReason::RemoveFromCrl,
            9 => RevocationReason::PrivilegeWithdrawn,
            10 => RevocationReason::AaCompromise,
            other => {
                return Err(PkiError::Validation(format!(
                    "revocation reason {} unsupported",
                    other
                )))
            }
        })
    }

    pub fn code(self) -> i32 {
        match self {
            RevocationReason::Unspecified => 0,
            RevocationReason::KeyCompromise => 1,
            RevocationReason::CaCompromise => 2,
            RevocationReason::AffiliationChanged => 3,
            RevocationReason::Superseded => 4,
            RevocationReason::CessationOfOperation => 5,
            RevocationReason::CertificateHold => 6,
            RevocationReason::RemoveFromCrl => 8,
            RevocationReason::PrivilegeWithdrawn => 9,
            RevocationReason::AaCompromise => 10,
        }
    }
}

impl TryFrom<i32> for RevocationReason {
    type Error = PkiError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        RevocationReason::from_code(code)
    }
}

impl From<RevocationReason> for i32 {
    fn from(reason: RevocationReason) -> Self {
        reason.code()
    }
}

/// A SCEP PKCSReq after the transport removed the PKCS#7 envelope.
#[derive(Debug, Clone, Default)]
pub struct ScepRequest {
    pub csr_der: Vec<u8>,
    pub challenge_password: Option<String>,
    pub transaction_id: Option<String>,
}

/// Outcome of a PKCS#12 export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pkcs12Delivery {
    /// Bundle returned to the caller who chose the password.
    Bundle { der: Vec<u8>, password: String },
    /// Bundle mailed; the password is only returned when the mail omits it.
    Mailed {
        recipient: String,
        password: Option<String>,
    },
}

/// What one renewal sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub revoked: usize,
    pub notified: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} revoked, {} notified, {} skipped, {} failed",
            self.revoked, self.notified, self.skipped, self.failed
        )
    }
}

/// Splits a comma list, dropping blanks.
pub(crate) fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub(crate) fn join_list(values: &[String]) -> Option<String> {
    if values.is_empty() {
        None
    } else {
        Some(values.join(","))
    }
}
