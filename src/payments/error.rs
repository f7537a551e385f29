use serde::Serialize;
use thiserror::Error;

use crate::database::error::{DatabaseError, DatabaseErrorKind};

pub type PaymentResult<T> = Result<T, PaymentError>;

/// Coarse classification used for HTTP mapping, retry decisions and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Configuration,
    Input,
    Transient,
    ProviderDeclined,
    Integrity,
    Unknown,
}

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Missing credentials: {}", keys.join(", "))]
    MissingCredential { keys: Vec<String> },

    #[error("Unknown payment provider: {code}")]
    UnknownProvider { code: String },

    #[error("Payment provider is inactive: {code}")]
    ProviderInactive { code: String },

    #[error("Invalid amount '{amount}': {reason}")]
    InvalidAmount { amount: String, reason: String },

    #[error("Invalid phone format: {phone}")]
    InvalidPhoneFormat { phone: String },

    #[error("No payer phone number available for user {username}")]
    MissingPayerPhone { username: String },

    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Payment {payment_id} is {status}: {message}")]
    IllegalState {
        payment_id: i64,
        status: String,
        message: String,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: String, id: String },

    #[error("Unknown transaction for external id {external_id}")]
    UnknownTransaction { external_id: String },

    #[error("Token acquisition failed for {provider}: {reason}")]
    TokenAcquisitionFailed {
        provider: String,
        reason: String,
        http_status: Option<u16>,
    },

    #[error("Provider timeout: provider={provider}, message={message}")]
    ProviderTimeout { provider: String, message: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Provider rejected request: provider={provider}, message={message}")]
    ProviderRejected {
        provider: String,
        code: Option<String>,
        message: String,
        retryable: bool,
    },

    #[error("Payment {payment_id} already has an active transaction")]
    DuplicateActiveTransaction { payment_id: i64 },

    #[error("Amount mismatch for {external_id}: expected {expected}, received {received}")]
    AmountMismatch {
        external_id: String,
        expected: String,
        received: String,
    },

    #[error("Conflicting callback for {external_id}: transaction is {current}, callback says {received}")]
    ConflictingCallback {
        external_id: String,
        current: String,
        received: String,
    },

    #[error("Unauthorized callback: {reason}")]
    Unauthorized { reason: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl PaymentError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            PaymentError::MissingCredential { .. }
            | PaymentError::UnknownProvider { .. }
            | PaymentError::ProviderInactive { .. } => ErrorCategory::Configuration,
            PaymentError::InvalidAmount { .. }
            | PaymentError::InvalidPhoneFormat { .. }
            | PaymentError::MissingPayerPhone { .. }
            | PaymentError::ValidationError { .. }
            | PaymentError::IllegalState { .. }
            | PaymentError::NotFound { .. }
            | PaymentError::UnknownTransaction { .. } => ErrorCategory::Input,
            PaymentError::TokenAcquisitionFailed { .. }
            | PaymentError::ProviderTimeout { .. }
            | PaymentError::NetworkError { .. } => ErrorCategory::Transient,
            PaymentError::ProviderRejected { .. } => ErrorCategory::ProviderDeclined,
            PaymentError::DuplicateActiveTransaction { .. }
            | PaymentError::AmountMismatch { .. }
            | PaymentError::ConflictingCallback { .. }
            | PaymentError::Unauthorized { .. } => ErrorCategory::Integrity,
            PaymentError::Storage { .. } | PaymentError::Internal { .. } => {
                ErrorCategory::Unknown
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ProviderRejected { retryable, .. } => *retryable,
            other => other.category() == ErrorCategory::Transient,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::MissingCredential { .. }
            | PaymentError::UnknownProvider { .. }
            | PaymentError::ProviderInactive { .. } => 503,
            PaymentError::InvalidAmount { .. }
            | PaymentError::InvalidPhoneFormat { .. }
            | PaymentError::MissingPayerPhone { .. }
            | PaymentError::ValidationError { .. } => 400,
            PaymentError::IllegalState { .. } => 409,
            PaymentError::NotFound { .. } | PaymentError::UnknownTransaction { .. } => 404,
            PaymentError::TokenAcquisitionFailed { .. } | PaymentError::NetworkError { .. } => 503,
            PaymentError::ProviderTimeout { .. } => 504,
            PaymentError::ProviderRejected { .. } => 402,
            PaymentError::DuplicateActiveTransaction { .. }
            | PaymentError::ConflictingCallback { .. } => 409,
            PaymentError::AmountMismatch { .. } => 422,
            PaymentError::Unauthorized { .. } => 401,
            PaymentError::Storage { .. } | PaymentError::Internal { .. } => 500,
        }
    }

    /// Short reason safe to show to end users. Provider payloads stay server-side.
    pub fn user_message(&self) -> String {
        match self {
            PaymentError::MissingCredential { .. }
            | PaymentError::UnknownProvider { .. }
            | PaymentError::ProviderInactive { .. } => {
                "Payment method is currently unavailable".to_string()
            }
            PaymentError::InvalidAmount { reason, .. } => format!("Invalid amount: {}", reason),
            PaymentError::InvalidPhoneFormat { .. } => {
                "Phone number must be a Tanzanian number (e.g. 0712345678)".to_string()
            }
            PaymentError::MissingPayerPhone { .. } => {
                "Add a phone number to your profile before paying".to_string()
            }
            PaymentError::ValidationError { message, .. } => message.clone(),
            PaymentError::IllegalState { message, .. } => message.clone(),
            PaymentError::NotFound { entity, .. } => format!("{} not found", entity),
            PaymentError::UnknownTransaction { .. } => "Transaction not found".to_string(),
            PaymentError::TokenAcquisitionFailed { .. }
            | PaymentError::ProviderTimeout { .. }
            | PaymentError::NetworkError { .. } => {
                "Payment provider is temporarily unavailable, please try again".to_string()
            }
            PaymentError::ProviderRejected { message, .. } => {
                format!("Payment was declined: {}", message)
            }
            PaymentError::DuplicateActiveTransaction { .. } => {
                "A payment attempt is already in progress".to_string()
            }
            PaymentError::AmountMismatch { .. }
            | PaymentError::ConflictingCallback { .. }
            | PaymentError::Unauthorized { .. } => "Payment could not be verified".to_string(),
            PaymentError::Storage { .. } | PaymentError::Internal { .. } => {
                "Something went wrong, please try again later".to_string()
            }
        }
    }

    /// Field the error refers to, for 4xx field-level messages.
    pub fn field(&self) -> Option<&str> {
        match self {
            PaymentError::InvalidAmount { .. } => Some("amount"),
            PaymentError::InvalidPhoneFormat { .. } | PaymentError::MissingPayerPhone { .. } => {
                Some("phone")
            }
            PaymentError::ValidationError { field, .. } => field.as_deref(),
            _ => None,
        }
    }
}

impl From<DatabaseError> for PaymentError {
    fn from(err: DatabaseError) -> Self {
        match err.kind {
            DatabaseErrorKind::NotFound { entity, id } => PaymentError::NotFound { entity, id },
            _ => PaymentError::Storage {
                message: err.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_follow_taxonomy() {
        assert_eq!(
            PaymentError::MissingCredential {
                keys: vec!["AZAM_PAY_API_KEY".to_string()]
            }
            .category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            PaymentError::MissingPayerPhone {
                username: "U99".to_string()
            }
            .category(),
            ErrorCategory::Input
        );
        assert_eq!(
            PaymentError::ProviderTimeout {
                provider: "azampay".to_string(),
                message: "timed out".to_string()
            }
            .category(),
            ErrorCategory::Transient
        );
        assert_eq!(
            PaymentError::Unauthorized {
                reason: "bad signature".to_string()
            }
            .category(),
            ErrorCategory::Integrity
        );
    }

    #[test]
    fn retryable_flags_are_set() {
        assert!(PaymentError::NetworkError {
            message: "connection reset".to_string()
        }
        .is_retryable());
        assert!(!PaymentError::ProviderRejected {
            provider: "azampay".to_string(),
            code: None,
            message: "Invalid msisdn".to_string(),
            retryable: false,
        }
        .is_retryable());
        assert!(!PaymentError::AmountMismatch {
            external_id: "42-abc".to_string(),
            expected: "10000".to_string(),
            received: "9000".to_string(),
        }
        .is_retryable());
    }

    #[test]
    fn error_http_status_mapping_is_correct() {
        assert_eq!(
            PaymentError::UnknownTransaction {
                external_id: "x".to_string()
            }
            .http_status_code(),
            404
        );
        assert_eq!(
            PaymentError::InvalidPhoneFormat {
                phone: "123".to_string()
            }
            .http_status_code(),
            400
        );
        assert_eq!(
            PaymentError::DuplicateActiveTransaction { payment_id: 1 }.http_status_code(),
            409
        );
    }

    #[test]
    fn storage_not_found_becomes_not_found() {
        let err: PaymentError = DatabaseError::not_found("Property", 7).into();
        assert_eq!(err.http_status_code(), 404);
        assert_eq!(err.user_message(), "Property not found");
    }

    #[test]
    fn missing_credential_lists_keys() {
        let err = PaymentError::MissingCredential {
            keys: vec![
                "AZAM_PAY_CLIENT_ID".to_string(),
                "AZAM_PAY_API_KEY".to_string(),
            ],
        };
        assert_eq!(
            err.to_string(),
            "Missing credentials: AZAM_PAY_CLIENT_ID, AZAM_PAY_API_KEY"
        );
    }
}
