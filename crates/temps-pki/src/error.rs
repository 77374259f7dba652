use sea_orm::{DbErr, SqlErr};
use temps_core::ServiceError;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug)]
pub enum PkiError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{resource} not found: {key}")]
    NotFound { resource: String, key: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Cryptographic failure: {0}")]
    Crypto(String),

    /// Details are logged where the error is converted, never returned.
    #[error("a database error occurred")]
    Database,

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("SCEP request rejected: {0}")]
    ScepRejected(String),
}

impl PkiError {
    pub fn not_found(resource: &str, key: impl ToString) -> Self {
        PkiError::NotFound {
            resource: resource.to_string(),
            key: key.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        PkiError::Validation(message.into())
    }
}

/// Caller-facing text for a unique violation; the raw detail names tables and columns.
fn conflict_message(detail: &str) -> &'static str {
    if detail.contains("serial") {
        "serial number already used by this CA"
    } else if detail.contains("subject") {
        "certificate with this subject already exists"
    } else if detail.contains("pki_cas") {
        "a CA with this common name already exists"
    } else if detail.contains("pki_profiles") {
        "a profile with this name already exists"
    } else if detail.contains("pki_scep_servers") {
        "a SCEP server with this name already exists"
    } else {
        "record already exists"
    }
}

impl From<DbErr> for PkiError {
    fn from(err: DbErr) -> Self {
        if let Some(SqlErr::UniqueConstraintViolation(detail)) = err.sql_err() {
            warn!("Unique constraint violated: {}", detail);
            return PkiError::Conflict(conflict_message(&detail).to_string());
        }
        match err {
            DbErr::RecordNotFound(what) => PkiError::NotFound {
                resource: "record".to_string(),
                key: what,
            },
            other => {
                error!("Database error: {}", other);
                PkiError::Database
            }
        }
    }
}

impl From<openssl::error::ErrorStack> for PkiError {
    fn from(err: openssl::error::ErrorStack) -> Self {
        PkiError::Crypto(err.to_string())
    }
}

impl From<temps_core::notifications::NotificationError> for PkiError {
    fn from(err: temps_core::notifications::NotificationError) -> Self {
        PkiError::Notification(err.to_string())
    }
}

impl From<PkiError> for ServiceError {
    fn from(err: PkiError) -> Self {
        match err {
            PkiError::Validation(message) => ServiceError::Validation { message },
            PkiError::ScepRejected(message) => ServiceError::EnrollmentRejected { message },
            PkiError::NotFound { resource, key } => ServiceError::NotFound { resource, key },
            PkiError::Conflict(message) => ServiceError::Conflict { message },
            PkiError::Configuration(message) => ServiceError::Configuration { message },
            PkiError::Notification(message) => ServiceError::Notification { message },
            PkiError::Database => ServiceError::database("logged where the DbErr was converted"),
            PkiError::Crypto(message) => ServiceError::Crypto { message },
        }
    }
}

pub type PkiResult<T> = Result<T, PkiError>;
