//! Side effects of terminal payment transitions.
//!
//! Everything here runs inside the reconciler's or initiator's unit of work,
//! so it commits or rolls back together with the status change.

use chrono::Utc;

use crate::database::models::{Notification, NotificationKind, Payment};
use crate::database::repository::PaymentUnitOfWork;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::state::{PaymentStatus, VisitStatus};
use crate::services::notification::NotificationService;

/// Moves the locked payment along the state machine.
pub async fn transition_payment(
    uow: &mut dyn PaymentUnitOfWork,
    to: PaymentStatus,
    reason: Option<&str>,
) -> PaymentResult<Payment> {
    let current = uow.payment().status;
    if !current.can_transition_to(to) {
        return Err(PaymentError::IllegalState {
            payment_id: uow.payment().id,
            status: current.to_string(),
            message: format!("cannot move payment from {} to {}", current, to),
        });
    }
    Ok(uow.update_payment_status(to, reason).await?)
}

#[derive(Debug, Clone, Default)]
pub struct DomainEventHook {
    notifications: NotificationService,
}

impl DomainEventHook {
    pub fn new(notifications: NotificationService) -> Self {
        Self { notifications }
    }

    /// Tenant notification, linked visits paid, booking stamped.
    pub async fn on_payment_succeeded(
        &self,
        uow: &mut dyn PaymentUnitOfWork,
    ) -> PaymentResult<Notification> {
        let payment = uow.payment().clone();
        let notification = self
            .notifications
            .record(
                uow,
                payment.tenant_id,
                NotificationKind::PaymentSucceeded,
                format!(
                    "Payment of {} {} received. Thank you!",
                    payment.amount, payment.currency
                ),
            )
            .await?;
        uow.set_visit_status(&[VisitStatus::Unpaid, VisitStatus::Paying], VisitStatus::Paid)
            .await?;
        if let Some(booking_id) = payment.booking_id {
            uow.mark_booking_paid(booking_id, Utc::now()).await?;
        }
        Ok(notification)
    }

    /// Tenant notification with the provider's reason; visits awaiting this
    /// payment go back to unpaid.
    pub async fn on_payment_failed(
        &self,
        uow: &mut dyn PaymentUnitOfWork,
        reason: &str,
    ) -> PaymentResult<Notification> {
        let payment = uow.payment().clone();
        let notification = self
            .notifications
            .record(
                uow,
                payment.tenant_id,
                NotificationKind::PaymentFailed,
                format!(
                    "Payment of {} {} failed: {}",
                    payment.amount, payment.currency, reason
                ),
            )
            .await?;
        uow.set_visit_status(&[VisitStatus::Paying], VisitStatus::Unpaid)
            .await?;
        Ok(notification)
    }

    pub async fn on_payment_refunded(
        &self,
        uow: &mut dyn PaymentUnitOfWork,
    ) -> PaymentResult<Notification> {
        let payment = uow.payment().clone();
        Ok(self
            .notifications
            .record(
                uow,
                payment.tenant_id,
                NotificationKind::PaymentRefunded,
                format!(
                    "Payment of {} {} has been refunded",
                    payment.amount, payment.currency
                ),
            )
            .await?)
    }

    /// Logs notifications after their unit of work committed.
    pub fn announce(&self, notifications: &[Notification]) {
        for notification in notifications {
            self.notifications.announce(notification);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::{BookingRecord, InMemoryPaymentStore};
    use crate::database::models::NewPayment;
    use crate::database::repository::PaymentStore;
    use bigdecimal::BigDecimal;

    async fn setup(booking: bool) -> (InMemoryPaymentStore, Payment) {
        let store = InMemoryPaymentStore::new();
        if booking {
            store
                .insert_booking(BookingRecord {
                    id: 5,
                    customer_phone: None,
                    paid_at: None,
                })
                .await;
        }
        let payment = store
            .create_payment(NewPayment {
                tenant_id: 42,
                booking_id: booking.then_some(5),
                provider_code: "airtel".to_string(),
                amount: BigDecimal::from(10000),
                currency: "TZS".to_string(),
                metadata: serde_json::json!({}),
            })
            .await
            .unwrap();
        (store, payment)
    }

    #[tokio::test]
    async fn success_hook_notifies_and_stamps_booking() {
        let (store, payment) = setup(true).await;
        let visit = store.find_or_create_visit(42, 9).await.unwrap();
        store
            .claim_visit_payment(visit.id, None, payment.id)
            .await
            .unwrap()
            .expect("fresh visit can be claimed");

        let hook = DomainEventHook::default();
        let mut uow = store.begin_for_payment(payment.id).await.unwrap();
        transition_payment(uow.as_mut(), PaymentStatus::Initiated, None)
            .await
            .unwrap();
        transition_payment(uow.as_mut(), PaymentStatus::Succeeded, None)
            .await
            .unwrap();
        let notification = hook.on_payment_succeeded(uow.as_mut()).await.unwrap();
        uow.commit().await.unwrap();

        assert_eq!(notification.kind, NotificationKind::PaymentSucceeded);
        assert_eq!(store.list_notifications(42).await.unwrap().len(), 1);
        assert_eq!(store.visit(visit.id).await.unwrap().status, VisitStatus::Paid);
        assert!(store.booking(5).await.unwrap().paid_at.is_some());
    }

    #[tokio::test]
    async fn failure_hook_rolls_visit_back_to_unpaid() {
        let (store, payment) = setup(false).await;
        let visit = store.find_or_create_visit(42, 9).await.unwrap();
        store
            .claim_visit_payment(visit.id, None, payment.id)
            .await
            .unwrap()
            .expect("fresh visit can be claimed");

        let hook = DomainEventHook::default();
        let mut uow = store.begin_for_payment(payment.id).await.unwrap();
        transition_payment(uow.as_mut(), PaymentStatus::Failed, Some("Insufficient balance"))
            .await
            .unwrap();
        let notification = hook
            .on_payment_failed(uow.as_mut(), "Insufficient balance")
            .await
            .unwrap();
        uow.commit().await.unwrap();

        assert!(notification.message.contains("Insufficient balance"));
        assert_eq!(store.visit(visit.id).await.unwrap().status, VisitStatus::Unpaid);
    }

    #[tokio::test]
    async fn illegal_transition_is_rejected() {
        let (store, payment) = setup(false).await;
        let mut uow = store.begin_for_payment(payment.id).await.unwrap();
        let err = transition_payment(uow.as_mut(), PaymentStatus::Succeeded, None)
            .await
            .expect_err("pending cannot jump to succeeded");
        assert!(matches!(err, PaymentError::IllegalState { .. }));
    }
}
