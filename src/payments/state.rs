//! Status enums and transition rules for payments, transactions and visits.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::payments::error::PaymentError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Initiated,
    Succeeded,
    Failed,
    Cancelled,
    Refunded,
}

impl PaymentStatus {
    /// `initiated -> pending` reopens a payment whose attempt failed while
    /// retries remain.
    pub fn valid_transitions(&self) -> &'static [PaymentStatus] {
        match self {
            PaymentStatus::Pending => &[
                PaymentStatus::Initiated,
                PaymentStatus::Failed,
                PaymentStatus::Cancelled,
            ],
            PaymentStatus::Initiated => &[
                PaymentStatus::Succeeded,
                PaymentStatus::Failed,
                PaymentStatus::Cancelled,
                PaymentStatus::Pending,
            ],
            PaymentStatus::Succeeded => &[PaymentStatus::Refunded],
            PaymentStatus::Failed | PaymentStatus::Cancelled | PaymentStatus::Refunded => &[],
        }
    }

    pub fn can_transition_to(&self, target: PaymentStatus) -> bool {
        self.valid_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Succeeded
                | PaymentStatus::Failed
                | PaymentStatus::Cancelled
                | PaymentStatus::Refunded
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Initiated => "initiated",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(PaymentStatus::Pending),
            "initiated" => Ok(PaymentStatus::Initiated),
            "succeeded" => Ok(PaymentStatus::Succeeded),
            "failed" => Ok(PaymentStatus::Failed),
            "cancelled" => Ok(PaymentStatus::Cancelled),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(PaymentError::Internal {
                message: format!("unknown payment status '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Sent,
    Acknowledged,
    Succeeded,
    Failed,
    Timeout,
}

impl TransactionStatus {
    pub const ACTIVE: [TransactionStatus; 3] = [
        TransactionStatus::Pending,
        TransactionStatus::Sent,
        TransactionStatus::Acknowledged,
    ];

    pub fn valid_transitions(&self) -> &'static [TransactionStatus] {
        match self {
            TransactionStatus::Pending => &[
                TransactionStatus::Sent,
                TransactionStatus::Succeeded,
                TransactionStatus::Failed,
                TransactionStatus::Timeout,
            ],
            TransactionStatus::Sent => &[
                TransactionStatus::Acknowledged,
                TransactionStatus::Succeeded,
                TransactionStatus::Failed,
                TransactionStatus::Timeout,
            ],
            TransactionStatus::Acknowledged => &[
                TransactionStatus::Succeeded,
                TransactionStatus::Failed,
                TransactionStatus::Timeout,
            ],
            TransactionStatus::Succeeded | TransactionStatus::Failed | TransactionStatus::Timeout => {
                &[]
            }
        }
    }

    pub fn can_transition_to(&self, target: TransactionStatus) -> bool {
        self.valid_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Succeeded | TransactionStatus::Failed | TransactionStatus::Timeout
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Sent => "sent",
            TransactionStatus::Acknowledged => "acknowledged",
            TransactionStatus::Succeeded => "succeeded",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Timeout => "timeout",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(TransactionStatus::Pending),
            "sent" => Ok(TransactionStatus::Sent),
            "acknowledged" => Ok(TransactionStatus::Acknowledged),
            "succeeded" => Ok(TransactionStatus::Succeeded),
            "failed" => Ok(TransactionStatus::Failed),
            "timeout" => Ok(TransactionStatus::Timeout),
            other => Err(PaymentError::Internal {
                message: format!("unknown transaction status '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VisitStatus {
    Unpaid,
    Paying,
    Paid,
    Expired,
}

impl VisitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisitStatus::Unpaid => "unpaid",
            VisitStatus::Paying => "paying",
            VisitStatus::Paid => "paid",
            VisitStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for VisitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VisitStatus {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "unpaid" => Ok(VisitStatus::Unpaid),
            "paying" => Ok(VisitStatus::Paying),
            "paid" => Ok(VisitStatus::Paid),
            "expired" => Ok(VisitStatus::Expired),
            other => Err(PaymentError::Internal {
                message: format!("unknown visit status '{}'", other),
            }),
        }
    }
}

/// Outcome carried by a provider callback. `Processing` is an interim
/// progress report; the others are final.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallbackOutcome {
    Processing,
    Success,
    Failure,
    Refunded,
}

impl CallbackOutcome {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "success" | "successful" | "succeeded" | "completed" => Some(CallbackOutcome::Success),
            "failure" | "failed" | "fail" | "cancelled" | "rejected" | "declined" => {
                Some(CallbackOutcome::Failure)
            }
            "refunded" | "reversed" => Some(CallbackOutcome::Refunded),
            "pending" | "processing" | "in_progress" | "acknowledged" => {
                Some(CallbackOutcome::Processing)
            }
            _ => None,
        }
    }

    /// Transaction status this outcome settles on.
    pub fn transaction_status(&self) -> TransactionStatus {
        match self {
            CallbackOutcome::Processing => TransactionStatus::Acknowledged,
            CallbackOutcome::Success | CallbackOutcome::Refunded => TransactionStatus::Succeeded,
            CallbackOutcome::Failure => TransactionStatus::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackOutcome::Processing => "processing",
            CallbackOutcome::Success => "success",
            CallbackOutcome::Failure => "failure",
            CallbackOutcome::Refunded => "refunded",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_state_machine_allows_documented_paths() {
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Initiated));
        assert!(PaymentStatus::Initiated.can_transition_to(PaymentStatus::Succeeded));
        assert!(PaymentStatus::Succeeded.can_transition_to(PaymentStatus::Refunded));
        assert!(!PaymentStatus::Succeeded.can_transition_to(PaymentStatus::Failed));
        assert!(!PaymentStatus::Pending.can_transition_to(PaymentStatus::Succeeded));
        assert!(PaymentStatus::Refunded.valid_transitions().is_empty());
    }

    #[test]
    fn terminal_transactions_have_no_transitions() {
        for status in [
            TransactionStatus::Succeeded,
            TransactionStatus::Failed,
            TransactionStatus::Timeout,
        ] {
            assert!(status.is_terminal());
            assert!(status.valid_transitions().is_empty());
        }
        for status in TransactionStatus::ACTIVE {
            assert!(status.is_active());
        }
    }

    #[test]
    fn statuses_round_trip_through_db_strings() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Initiated,
            PaymentStatus::Succeeded,
            PaymentStatus::Failed,
            PaymentStatus::Cancelled,
            PaymentStatus::Refunded,
        ] {
            assert_eq!(status.as_str().parse::<PaymentStatus>().unwrap(), status);
        }
        assert!("settled".parse::<TransactionStatus>().is_err());
    }

    #[test]
    fn callback_outcome_parsing_accepts_provider_spellings() {
        assert_eq!(CallbackOutcome::parse("success"), Some(CallbackOutcome::Success));
        assert_eq!(CallbackOutcome::parse("SUCCESSFUL"), Some(CallbackOutcome::Success));
        assert_eq!(CallbackOutcome::parse("failure"), Some(CallbackOutcome::Failure));
        assert_eq!(CallbackOutcome::parse("reversed"), Some(CallbackOutcome::Refunded));
        assert_eq!(
            CallbackOutcome::parse("processing"),
            Some(CallbackOutcome::Processing)
        );
        assert_eq!(
            CallbackOutcome::Processing.transaction_status(),
            TransactionStatus::Acknowledged
        );
        assert_eq!(CallbackOutcome::parse("settled"), None);
    }
}
