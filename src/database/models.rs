use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::payments::state::{PaymentStatus, TransactionStatus, VisitStatus};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Payment {
    pub id: i64,
    pub tenant_id: i64,
    pub booking_id: Option<i64>,
    pub provider_code: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub status_reason: Option<String>,
    /// Channel-specific checkout inputs (bank account, OTP).
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub tenant_id: i64,
    pub booking_id: Option<i64>,
    pub provider_code: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub metadata: JsonValue,
}

/// One outbound checkout attempt.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PaymentTransaction {
    pub id: Uuid,
    pub payment_id: i64,
    pub provider_code: String,
    pub external_id: String,
    pub provider_ref: Option<String>,
    pub status: TransactionStatus,
    pub status_reason: Option<String>,
    pub payer_msisdn: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub request_payload: JsonValue,
    pub response_payload: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub payment_id: i64,
    pub provider_code: String,
    pub external_id: String,
    pub payer_msisdn: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub request_payload: JsonValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertTransactionOutcome {
    Created(PaymentTransaction),
    /// Another attempt is still active for the payment.
    ActiveExists(PaymentTransaction),
    /// `(provider_code, external_id)` is already used.
    ExternalIdTaken,
}

#[derive(Debug, Clone)]
pub struct TransactionUpdate {
    pub status: TransactionStatus,
    pub reason: Option<String>,
    pub response_payload: Option<JsonValue>,
    pub provider_ref: Option<String>,
}

impl TransactionUpdate {
    pub fn status(status: TransactionStatus) -> Self {
        Self {
            status,
            reason: None,
            response_payload: None,
            provider_ref: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_response(mut self, payload: JsonValue) -> Self {
        self.response_payload = Some(payload);
        self
    }

    pub fn with_provider_ref(mut self, provider_ref: Option<String>) -> Self {
        self.provider_ref = provider_ref;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    PaymentSucceeded,
    PaymentFailed,
    PaymentRefunded,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::PaymentSucceeded => "payment_succeeded",
            NotificationKind::PaymentFailed => "payment_failed",
            NotificationKind::PaymentRefunded => "payment_refunded",
        }
    }

    pub fn from_db(raw: &str) -> Option<Self> {
        match raw {
            "payment_succeeded" => Some(NotificationKind::PaymentSucceeded),
            "payment_failed" => Some(NotificationKind::PaymentFailed),
            "payment_refunded" => Some(NotificationKind::PaymentRefunded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: i64,
    pub kind: NotificationKind,
    pub message: String,
    pub payment_id: Option<i64>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: i64,
    pub kind: NotificationKind,
    pub message: String,
    pub payment_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Visit {
    pub id: i64,
    pub user_id: i64,
    pub property_id: i64,
    pub status: VisitStatus,
    pub payment_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PropertyContact {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// What a viewing costs and who to contact once it is paid.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyVisitTerms {
    pub property_id: i64,
    pub visit_fee: BigDecimal,
    pub currency: String,
    pub contact: PropertyContact,
}
