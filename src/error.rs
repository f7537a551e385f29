//! Application error type for the HTTP surface.
//!
//! Wraps payment-domain errors and request-level problems, mapping each to an
//! HTTP status, a stable error code and a message safe to show to users.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::database::error::DatabaseError;
use crate::payments::error::PaymentError;

/// Machine-readable error codes returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    #[serde(rename = "PROVIDER_UNAVAILABLE")]
    ProviderUnavailable,
    #[serde(rename = "INVALID_AMOUNT")]
    InvalidAmount,
    #[serde(rename = "INVALID_PHONE")]
    InvalidPhone,
    #[serde(rename = "PAYER_PHONE_REQUIRED")]
    PayerPhoneRequired,
    #[serde(rename = "INVALID_STATE")]
    InvalidState,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "TRANSACTION_NOT_FOUND")]
    TransactionNotFound,
    #[serde(rename = "PAYMENT_PROVIDER_ERROR")]
    PaymentProviderError,
    #[serde(rename = "PAYMENT_DECLINED")]
    PaymentDeclined,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,
    #[serde(rename = "DUPLICATE_TRANSACTION")]
    DuplicateTransaction,
    #[serde(rename = "AMOUNT_MISMATCH")]
    AmountMismatch,
    #[serde(rename = "CONFLICTING_CALLBACK")]
    ConflictingCallback,
    #[serde(rename = "UNAUTHORIZED")]
    Unauthorized,
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Request-shape problems caught before any service runs.
#[derive(Debug, Clone)]
pub enum ValidationError {
    MissingField { field: String },
    InvalidField { field: String, reason: String },
}

#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Configuration { message: String },
}

#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Payment(PaymentError),
    Validation(ValidationError),
    Infrastructure(InfrastructureError),
    /// No caller identity on a user-scoped endpoint.
    Unauthenticated,
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::MissingField {
            field: field.into(),
        }))
    }

    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }))
    }

    pub fn unauthenticated() -> Self {
        Self::new(AppErrorKind::Unauthenticated)
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Payment(err) => err.http_status_code(),
            AppErrorKind::Validation(_) => 400,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => 500,
                InfrastructureError::Configuration { .. } => 503,
            },
            AppErrorKind::Unauthenticated => 401,
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Payment(err) => match err {
                PaymentError::MissingCredential { .. }
                | PaymentError::UnknownProvider { .. }
                | PaymentError::ProviderInactive { .. } => ErrorCode::ProviderUnavailable,
                PaymentError::InvalidAmount { .. } => ErrorCode::InvalidAmount,
                PaymentError::InvalidPhoneFormat { .. } => ErrorCode::InvalidPhone,
                PaymentError::MissingPayerPhone { .. } => ErrorCode::PayerPhoneRequired,
                PaymentError::ValidationError { .. } => ErrorCode::ValidationError,
                PaymentError::IllegalState { .. } => ErrorCode::InvalidState,
                PaymentError::NotFound { .. } => ErrorCode::NotFound,
                PaymentError::UnknownTransaction { .. } => ErrorCode::TransactionNotFound,
                PaymentError::TokenAcquisitionFailed { .. } | PaymentError::NetworkError { .. } => {
                    ErrorCode::PaymentProviderError
                }
                PaymentError::ProviderTimeout { .. } => ErrorCode::ExternalServiceTimeout,
                PaymentError::ProviderRejected { .. } => ErrorCode::PaymentDeclined,
                PaymentError::DuplicateActiveTransaction { .. } => ErrorCode::DuplicateTransaction,
                PaymentError::AmountMismatch { .. } => ErrorCode::AmountMismatch,
                PaymentError::ConflictingCallback { .. } => ErrorCode::ConflictingCallback,
                PaymentError::Unauthorized { .. } => ErrorCode::Unauthorized,
                PaymentError::Storage { .. } => ErrorCode::DatabaseError,
                PaymentError::Internal { .. } => ErrorCode::InternalError,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::Unauthenticated => ErrorCode::Unauthorized,
        }
    }

    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Payment(err) => err.user_message(),
            AppErrorKind::Validation(err) => match err {
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::Unauthenticated => "Authentication required".to_string(),
        }
    }

    /// Field the error refers to, if any.
    pub fn field(&self) -> Option<&str> {
        match &self.kind {
            AppErrorKind::Payment(err) => err.field(),
            AppErrorKind::Validation(ValidationError::MissingField { field })
            | AppErrorKind::Validation(ValidationError::InvalidField { field, .. }) => {
                Some(field.as_str())
            }
            AppErrorKind::Infrastructure(_) | AppErrorKind::Unauthenticated => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Payment(err) => err.is_retryable(),
            AppErrorKind::Validation(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::Unauthenticated => false,
        }
    }

    /// Unknown-category failures page the operations team.
    pub fn needs_alert(&self) -> bool {
        matches!(
            self.kind,
            AppErrorKind::Payment(PaymentError::Storage { .. })
                | AppErrorKind::Payment(PaymentError::Internal { .. })
                | AppErrorKind::Infrastructure(_)
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            AppErrorKind::Payment(err) => write!(f, "{}", err),
            _ => write!(f, "{}", self.user_message()),
        }
    }
}

impl std::error::Error for AppError {}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        AppError::new(AppErrorKind::Payment(err))
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        AppError::new(AppErrorKind::Payment(PaymentError::from(err)))
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_phone_maps_to_bad_request() {
        let error = AppError::from(PaymentError::MissingPayerPhone {
            username: "U99".to_string(),
        });

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::PayerPhoneRequired);
        assert_eq!(error.field(), Some("phone"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_timeout_is_retryable() {
        let error = AppError::from(PaymentError::ProviderTimeout {
            provider: "azampay".to_string(),
            message: "read timed out".to_string(),
        });

        assert_eq!(error.status_code(), 504);
        assert_eq!(error.error_code(), ErrorCode::ExternalServiceTimeout);
        assert!(error.is_retryable());
    }

    #[test]
    fn test_storage_errors_hide_details() {
        let error = AppError::from(PaymentError::Storage {
            message: "relation \"payment\" does not exist".to_string(),
        });

        assert_eq!(error.status_code(), 500);
        assert!(!error.user_message().contains("relation"));
    }

    #[test]
    fn test_validation_error() {
        let error = AppError::missing_field("payment_method");

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::ValidationError);
        assert!(error.user_message().contains("payment_method"));
    }
}
