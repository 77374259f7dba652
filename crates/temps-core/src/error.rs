//! Errors returned across the boundary of the PKI engine

use thiserror::Error;

/// Failure of an engine operation, classified by what the caller can do about it.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// `detail` is for operator logs only; callers see a fixed message.
    #[error("a database error occurred")]
    Database { detail: String },

    #[error("{resource} not found: {key}")]
    NotFound { resource: String, key: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Duplicate active subject, or a re-issue before the renewal window opens.
    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Key, signature or certificate handling failed.
    #[error("Cryptographic failure: {message}")]
    Crypto { message: String },

    #[error("Enrollment rejected: {message}")]
    EnrollmentRejected { message: String },

    #[error("Notification delivery failed: {message}")]
    Notification { message: String },
}

impl ServiceError {
    pub fn database(detail: impl ToString) -> Self {
        ServiceError::Database {
            detail: detail.to_string(),
        }
    }

    /// True when the request itself was wrong and retrying it unchanged cannot succeed.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServiceError::NotFound { .. }
                | ServiceError::Validation { .. }
                | ServiceError::Conflict { .. }
                | ServiceError::EnrollmentRejected { .. }
        )
    }

    /// Message for the operator, including details hidden from API callers.
    pub fn operator_message(&self) -> String {
        match self {
            ServiceError::Database { detail } => format!("{}: {}", self, detail),
            other => other.to_string(),
        }
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_detail_stays_out_of_display() {
        let err = ServiceError::database("relation \"pki_certs\" does not exist");
        assert_eq!(err.to_string(), "a database error occurred");
        assert!(err.operator_message().contains("pki_certs"));
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_client_errors() {
        let conflict = ServiceError::Conflict {
            message: "certificate with this subject already exists".to_string(),
        };
        assert!(conflict.is_client_error());
        let crypto = ServiceError::Crypto {
            message: "bad signature".to_string(),
        };
        assert!(!crypto.is_client_error());
        assert_eq!(crypto.operator_message(), "Cryptographic failure: bad signature");
    }
}
