//! Visit-Payment Flow: paying the viewing fee for a (user, property) pair.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::models::{NewPayment, Payment, PropertyContact, PropertyVisitTerms, Visit};
use crate::database::repository::PaymentStore;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::state::{PaymentStatus, TransactionStatus, VisitStatus};
use crate::services::checkout_initiator::CheckoutInitiator;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VisitPaymentStatus {
    pub property_id: i64,
    pub has_paid: bool,
    pub amount_due: BigDecimal,
    pub currency: String,
    pub visit_status: Option<VisitStatus>,
    pub payment_id: Option<i64>,
    /// Only revealed once the visit is paid.
    pub contact: Option<PropertyContact>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VisitInitiateResult {
    pub visit_id: i64,
    pub payment_id: i64,
    pub transaction_id: Uuid,
    pub provider_status: TransactionStatus,
    pub payment_status: PaymentStatus,
    pub provider_message: Option<String>,
    pub next_action: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VisitVerifyResult {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
    pub payment_status: PaymentStatus,
    pub has_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct VisitPaymentService {
    store: Arc<dyn PaymentStore>,
    initiator: Arc<CheckoutInitiator>,
}

impl VisitPaymentService {
    pub fn new(store: Arc<dyn PaymentStore>, initiator: Arc<CheckoutInitiator>) -> Self {
        Self { store, initiator }
    }

    pub async fn status(&self, user_id: i64, property_id: i64) -> PaymentResult<VisitPaymentStatus> {
        let terms = self.terms(property_id).await?;
        let visit = self.store.find_visit(user_id, property_id).await?;
        let has_paid = visit
            .as_ref()
            .is_some_and(|v| v.status == VisitStatus::Paid);

        Ok(VisitPaymentStatus {
            property_id,
            has_paid,
            amount_due: if has_paid {
                BigDecimal::from(0)
            } else {
                terms.visit_fee.clone()
            },
            currency: terms.currency.clone(),
            visit_status: visit.as_ref().map(|v| v.status),
            payment_id: visit.as_ref().and_then(|v| v.payment_id),
            contact: has_paid.then(|| terms.contact.clone()),
        })
    }

    /// Creates or reuses the visit's payment and starts the checkout.
    pub async fn initiate(
        &self,
        user_id: i64,
        property_id: i64,
        payment_method: &str,
        metadata: JsonValue,
    ) -> PaymentResult<VisitInitiateResult> {
        let provider = self.initiator.registry().get(payment_method)?.clone();
        let terms = self.terms(property_id).await?;
        if terms.visit_fee <= BigDecimal::from(0) {
            return Err(PaymentError::InvalidAmount {
                amount: terms.visit_fee.to_string(),
                reason: "property has no visit fee configured".to_string(),
            });
        }

        let visit = self.store.find_or_create_visit(user_id, property_id).await?;
        ensure_unpaid(&visit)?;

        let (payment, created) = match self.reusable_payment(&visit, &provider.code).await? {
            Some(payment) => (payment, false),
            None => {
                let payment = self
                    .store
                    .create_payment(NewPayment {
                        tenant_id: user_id,
                        booking_id: None,
                        provider_code: provider.code.clone(),
                        amount: terms.visit_fee.clone(),
                        currency: terms.currency.clone(),
                        metadata,
                    })
                    .await?;
                (payment, true)
            }
        };

        let (visit, payment) = match self
            .store
            .claim_visit_payment(visit.id, visit.payment_id, payment.id)
            .await?
        {
            Some(visit) => {
                if created {
                    info!(
                        payment_id = payment.id,
                        visit_id = visit.id,
                        provider = %provider.code,
                        amount = %payment.amount,
                        "visit payment created"
                    );
                }
                (visit, payment)
            }
            None => self.join_concurrent_payment(user_id, property_id, payment, created).await?,
        };

        let result = self.initiator.initiate(payment.id).await?;
        Ok(VisitInitiateResult {
            visit_id: visit.id,
            payment_id: payment.id,
            transaction_id: result.transaction_id,
            provider_status: result.status,
            payment_status: result.payment_status,
            provider_message: result.provider_message,
            next_action: result.next_action,
        })
    }

    /// Reports the transaction as stored. Never re-initiates.
    pub async fn verify(
        &self,
        user_id: i64,
        property_id: i64,
        transaction_id: Uuid,
    ) -> PaymentResult<VisitVerifyResult> {
        let unknown = || PaymentError::UnknownTransaction {
            external_id: transaction_id.to_string(),
        };

        let tx = self
            .store
            .find_transaction(transaction_id)
            .await?
            .ok_or_else(unknown)?;
        let payment = self
            .store
            .find_payment(tx.payment_id)
            .await?
            .ok_or_else(unknown)?;
        let visit = self.store.find_visit(user_id, property_id).await?;
        let belongs_to_visit = visit.is_some_and(|v| v.payment_id == Some(payment.id));
        // Someone else's transaction looks exactly like a missing one.
        if payment.tenant_id != user_id || !belongs_to_visit {
            return Err(unknown());
        }

        let has_paid = tx.status == TransactionStatus::Succeeded;
        Ok(VisitVerifyResult {
            transaction_id: tx.id,
            status: tx.status,
            payment_status: payment.status,
            has_paid,
            paid_at: if has_paid { tx.completed_at } else { None },
        })
    }

    /// Another initiate linked its own payment to the visit first. Ours is
    /// cancelled before any checkout and the caller follows the winner's.
    async fn join_concurrent_payment(
        &self,
        user_id: i64,
        property_id: i64,
        ours: Payment,
        created: bool,
    ) -> PaymentResult<(Visit, Payment)> {
        if created {
            if let Err(e) = self.initiator.cancel(ours.id).await {
                warn!(payment_id = ours.id, error = %e, "could not cancel unused visit payment");
            }
        }

        let visit = self
            .store
            .find_visit(user_id, property_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound {
                entity: "Visit".to_string(),
                id: format!("{}/{}", user_id, property_id),
            })?;
        ensure_unpaid(&visit)?;

        let winner = match visit.payment_id {
            Some(id) => self.store.find_payment(id).await?,
            None => None,
        };
        let Some(winner) = winner else {
            return Err(PaymentError::Internal {
                message: format!("visit {} lost its payment link", visit.id),
            });
        };
        info!(
            payment_id = winner.id,
            visit_id = visit.id,
            "visit payment started concurrently, joining it"
        );
        Ok((visit, winner))
    }

    async fn terms(&self, property_id: i64) -> PaymentResult<PropertyVisitTerms> {
        self.store
            .property_visit_terms(property_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound {
                entity: "Property".to_string(),
                id: property_id.to_string(),
            })
    }

    /// An open payment on the visit is reused when it targets the same
    /// provider or already has an attempt in flight. A pending payment for a
    /// different provider is cancelled.
    async fn reusable_payment(
        &self,
        visit: &Visit,
        provider_code: &str,
    ) -> PaymentResult<Option<Payment>> {
        let Some(payment_id) = visit.payment_id else {
            return Ok(None);
        };
        let Some(payment) = self.store.find_payment(payment_id).await? else {
            return Ok(None);
        };

        match payment.status {
            PaymentStatus::Initiated => Ok(Some(payment)),
            PaymentStatus::Pending if payment.provider_code.eq_ignore_ascii_case(provider_code) => {
                Ok(Some(payment))
            }
            PaymentStatus::Pending => {
                if let Err(e) = self.initiator.cancel(payment.id).await {
                    warn!(
                        payment_id = payment.id,
                        error = %e,
                        "could not cancel superseded visit payment"
                    );
                    if e.http_status_code() == 409 {
                        // An attempt is in flight; let the initiator report it.
                        return Ok(Some(payment));
                    }
                }
                Ok(None)
            }
            _ => Ok(None),
        }
    }
}

fn ensure_unpaid(visit: &Visit) -> PaymentResult<()> {
    if visit.status == VisitStatus::Paid {
        return Err(PaymentError::IllegalState {
            payment_id: visit.payment_id.unwrap_or_default(),
            status: PaymentStatus::Succeeded.to_string(),
            message: "visit fee already paid".to_string(),
        });
    }
    Ok(())
}
