//! Callback Reconciler
//!
//! Applies provider callbacks to transactions and payments. The reconciler is
//! the only place a payment becomes `succeeded` or `refunded`.

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::database::models::{Notification, PaymentTransaction, TransactionUpdate};
use crate::database::repository::{PaymentStore, PaymentUnitOfWork};
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::factory::PaymentProviderFactory;
use crate::payments::state::{CallbackOutcome, PaymentStatus, TransactionStatus};
use crate::payments::types::CallbackPayload;
use crate::services::domain_events::{transition_payment, DomainEventHook};

/// Reason prefix stored on transactions failed by an amount check.
pub const AMOUNT_MISMATCH_REASON: &str = "AmountMismatch";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReconcileResult {
    pub external_id: String,
    pub transaction_status: TransactionStatus,
    pub payment_status: PaymentStatus,
    /// False when the callback repeated an already applied outcome.
    pub applied: bool,
}

pub struct CallbackReconciler {
    store: Arc<dyn PaymentStore>,
    providers: PaymentProviderFactory,
    hook: DomainEventHook,
    max_retries: u32,
}

impl CallbackReconciler {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        providers: PaymentProviderFactory,
        hook: DomainEventHook,
        max_retries: u32,
    ) -> Self {
        Self {
            store,
            providers,
            hook,
            max_retries,
        }
    }

    /// Authenticates, parses and applies a raw callback body.
    pub async fn handle(
        &self,
        body: &[u8],
        header_signature: Option<&str>,
    ) -> PaymentResult<ReconcileResult> {
        let payload = CallbackPayload::from_slice(body)?;

        let verification = self.providers.verify_callback(&payload, header_signature);
        if !verification.valid {
            let reason = verification
                .reason
                .unwrap_or_else(|| "signature mismatch".to_string());
            warn!(external_id = %payload.external_id, reason = %reason, "callback rejected");
            return Err(PaymentError::Unauthorized { reason });
        }

        self.reconcile(&payload).await
    }

    /// Applies an authenticated callback.
    pub async fn reconcile(&self, payload: &CallbackPayload) -> PaymentResult<ReconcileResult> {
        let tx = match self
            .store
            .find_transaction_by_external_id(&payload.external_id)
            .await?
        {
            Some(tx) => tx,
            None => {
                warn!(external_id = %payload.external_id, "callback for unknown transaction");
                return Err(PaymentError::UnknownTransaction {
                    external_id: payload.external_id.clone(),
                });
            }
        };

        let mut uow = self.store.begin_for_payment(tx.payment_id).await?;
        // Re-read under the payment lock; the initiator or another callback may
        // have moved it since.
        let tx = uow
            .find_transaction(tx.id)
            .await?
            .ok_or_else(|| PaymentError::UnknownTransaction {
                external_id: payload.external_id.clone(),
            })?;

        info!(
            external_id = %payload.external_id,
            transaction_id = %tx.id,
            payment_id = tx.payment_id,
            current = %tx.status,
            outcome = %payload.outcome.as_str(),
            "applying callback"
        );

        let mut notifications: Vec<Notification> = Vec::new();

        match payload.outcome {
            CallbackOutcome::Refunded => {
                let applied = self
                    .apply_refund(uow.as_mut(), &tx, payload, &mut notifications)
                    .await?;
                self.finish(uow, &tx.external_id, tx.status, applied, notifications)
                    .await
            }
            CallbackOutcome::Processing => {
                if !tx.status.can_transition_to(TransactionStatus::Acknowledged) {
                    info!(
                        external_id = %tx.external_id,
                        status = %tx.status,
                        "progress callback ignored"
                    );
                    return self
                        .finish(uow, &tx.external_id, tx.status, false, notifications)
                        .await;
                }
                let updated = uow
                    .update_transaction(
                        tx.id,
                        TransactionUpdate::status(TransactionStatus::Acknowledged)
                            .with_response(payload.raw.clone())
                            .with_provider_ref(
                                payload.provider_ref.clone().or(tx.provider_ref.clone()),
                            ),
                    )
                    .await?;
                self.finish(uow, &tx.external_id, updated.status, true, notifications)
                    .await
            }
            _ if tx.status.is_terminal() => self.repeat_or_conflict(uow.as_ref(), &tx, payload),
            CallbackOutcome::Success => {
                if let Err(mismatch) = check_amount(&tx, payload) {
                    let reason = format!("{}: {}", AMOUNT_MISMATCH_REASON, mismatch);
                    uow.update_transaction(
                        tx.id,
                        TransactionUpdate::status(TransactionStatus::Failed)
                            .with_reason(reason.clone())
                            .with_response(payload.raw.clone())
                            .with_provider_ref(payload.provider_ref.clone()),
                    )
                    .await?;
                    if uow.payment().status.can_transition_to(PaymentStatus::Failed) {
                        transition_payment(uow.as_mut(), PaymentStatus::Failed, Some(reason.as_str()))
                            .await?;
                        notifications
                            .push(self.hook.on_payment_failed(uow.as_mut(), &reason).await?);
                    }
                    uow.commit().await?;
                    self.hook.announce(&notifications);
                    error!(
                        alert = true,
                        external_id = %payload.external_id,
                        expected_amount = %tx.amount,
                        expected_currency = %tx.currency,
                        received_amount = %payload.amount_raw,
                        received_currency = ?payload.currency,
                        "callback amount does not match transaction, not crediting"
                    );
                    return Err(amount_mismatch(&tx, payload));
                }

                let updated = uow
                    .update_transaction(
                        tx.id,
                        TransactionUpdate::status(TransactionStatus::Succeeded)
                            .with_response(payload.raw.clone())
                            .with_provider_ref(
                                payload.provider_ref.clone().or(tx.provider_ref.clone()),
                            ),
                    )
                    .await?;
                if uow.payment().status == PaymentStatus::Pending {
                    transition_payment(uow.as_mut(), PaymentStatus::Initiated, None).await?;
                }
                transition_payment(uow.as_mut(), PaymentStatus::Succeeded, None).await?;
                notifications.push(self.hook.on_payment_succeeded(uow.as_mut()).await?);
                self.finish(uow, &tx.external_id, updated.status, true, notifications)
                    .await
            }
            CallbackOutcome::Failure => {
                let reason = payload
                    .message
                    .clone()
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| format!("provider reported {}", payload.status));
                let updated = uow
                    .update_transaction(
                        tx.id,
                        TransactionUpdate::status(TransactionStatus::Failed)
                            .with_reason(reason.clone())
                            .with_response(payload.raw.clone())
                            .with_provider_ref(
                                payload.provider_ref.clone().or(tx.provider_ref.clone()),
                            ),
                    )
                    .await?;

                let attempts = uow.count_transactions().await?;
                let exhausted = attempts >= 1 + i64::from(self.max_retries);
                let status = uow.payment().status;
                if exhausted && status.can_transition_to(PaymentStatus::Failed) {
                    transition_payment(uow.as_mut(), PaymentStatus::Failed, Some(reason.as_str())).await?;
                    notifications.push(self.hook.on_payment_failed(uow.as_mut(), &reason).await?);
                } else if status == PaymentStatus::Initiated {
                    transition_payment(uow.as_mut(), PaymentStatus::Pending, Some(reason.as_str())).await?;
                    info!(
                        payment_id = tx.payment_id,
                        attempts,
                        "attempt failed, payment reopened for another try"
                    );
                }
                self.finish(uow, &tx.external_id, updated.status, true, notifications)
                    .await
            }
        }
    }

    async fn apply_refund(
        &self,
        uow: &mut dyn PaymentUnitOfWork,
        tx: &PaymentTransaction,
        payload: &CallbackPayload,
        notifications: &mut Vec<Notification>,
    ) -> PaymentResult<bool> {
        if tx.status != TransactionStatus::Succeeded {
            error!(
                alert = true,
                external_id = %tx.external_id,
                current = %tx.status,
                "refund callback for a transaction that never succeeded"
            );
            return Err(PaymentError::ConflictingCallback {
                external_id: tx.external_id.clone(),
                current: tx.status.to_string(),
                received: payload.status.clone(),
            });
        }
        if uow.payment().status == PaymentStatus::Refunded {
            info!(external_id = %tx.external_id, "refund already applied");
            return Ok(false);
        }
        if let Err(mismatch) = check_amount(tx, payload) {
            error!(
                alert = true,
                external_id = %tx.external_id,
                detail = %mismatch,
                "partial or mismatched refund, not applied"
            );
            return Err(amount_mismatch(tx, payload));
        }
        transition_payment(uow, PaymentStatus::Refunded, Some("refunded by provider")).await?;
        notifications.push(self.hook.on_payment_refunded(uow).await?);
        Ok(true)
    }

    /// Terminal transaction: same outcome is a no-op, anything else is a
    /// conflict. Nothing is written either way.
    fn repeat_or_conflict(
        &self,
        uow: &dyn PaymentUnitOfWork,
        tx: &PaymentTransaction,
        payload: &CallbackPayload,
    ) -> PaymentResult<ReconcileResult> {
        let received = payload.outcome.transaction_status();
        if tx.status == received {
            info!(
                external_id = %tx.external_id,
                status = %tx.status,
                "duplicate callback, already applied"
            );
            return Ok(ReconcileResult {
                external_id: tx.external_id.clone(),
                transaction_status: tx.status,
                payment_status: uow.payment().status,
                applied: false,
            });
        }

        let amount_rejected = tx
            .status_reason
            .as_deref()
            .is_some_and(|r| r.starts_with(AMOUNT_MISMATCH_REASON));
        if amount_rejected && payload.outcome == CallbackOutcome::Success {
            warn!(external_id = %tx.external_id, "repeated callback for an amount-rejected transaction");
            return Err(amount_mismatch(tx, payload));
        }

        error!(
            alert = true,
            external_id = %tx.external_id,
            current = %tx.status,
            received = %payload.status,
            "callback conflicts with terminal transaction state"
        );
        Err(PaymentError::ConflictingCallback {
            external_id: tx.external_id.clone(),
            current: tx.status.to_string(),
            received: payload.status.clone(),
        })
    }

    async fn finish(
        &self,
        uow: Box<dyn PaymentUnitOfWork>,
        external_id: &str,
        transaction_status: TransactionStatus,
        applied: bool,
        notifications: Vec<Notification>,
    ) -> PaymentResult<ReconcileResult> {
        let payment_status = uow.payment().status;
        uow.commit().await?;
        self.hook.announce(&notifications);
        if applied {
            info!(
                external_id,
                transaction_status = %transaction_status,
                payment_status = %payment_status,
                "callback reconciled"
            );
        }
        Ok(ReconcileResult {
            external_id: external_id.to_string(),
            transaction_status,
            payment_status,
            applied,
        })
    }
}

fn check_amount(tx: &PaymentTransaction, payload: &CallbackPayload) -> Result<(), String> {
    if payload.amount != tx.amount {
        return Err(format!(
            "expected {} {}, received {}",
            tx.amount, tx.currency, payload.amount_raw
        ));
    }
    if let Some(currency) = &payload.currency {
        if !currency.eq_ignore_ascii_case(&tx.currency) {
            return Err(format!(
                "expected currency {}, received {}",
                tx.currency, currency
            ));
        }
    }
    Ok(())
}

fn amount_mismatch(tx: &PaymentTransaction, payload: &CallbackPayload) -> PaymentError {
    PaymentError::AmountMismatch {
        external_id: tx.external_id.clone(),
        expected: format!("{} {}", tx.amount, tx.currency),
        received: format!(
            "{} {}",
            payload.amount_raw,
            payload.currency.as_deref().unwrap_or(&tx.currency)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;

    fn tx(amount: &str) -> PaymentTransaction {
        let now = chrono::Utc::now();
        PaymentTransaction {
            id: uuid::Uuid::new_v4(),
            payment_id: 1,
            provider_code: "airtel".to_string(),
            external_id: "1-abc".to_string(),
            provider_ref: None,
            status: TransactionStatus::Sent,
            status_reason: None,
            payer_msisdn: "+255712345678".to_string(),
            amount: BigDecimal::from_str(amount).unwrap(),
            currency: "TZS".to_string(),
            request_payload: serde_json::json!({}),
            response_payload: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    fn payload(amount: &str, currency: Option<&str>) -> CallbackPayload {
        let body = serde_json::json!({
            "externalId": "1-abc",
            "status": "success",
            "amount": amount,
            "currency": currency,
        });
        CallbackPayload::from_slice(body.to_string().as_bytes()).unwrap()
    }

    #[test]
    fn amount_check_ignores_scale() {
        assert!(check_amount(&tx("10000"), &payload("10000.00", Some("TZS"))).is_ok());
        assert!(check_amount(&tx("10000"), &payload("10000", None)).is_ok());
    }

    #[test]
    fn amount_check_rejects_short_payment_and_foreign_currency() {
        assert!(check_amount(&tx("10000"), &payload("9000", Some("TZS"))).is_err());
        assert!(check_amount(&tx("10000"), &payload("10000", Some("USD"))).is_err());
    }
}
