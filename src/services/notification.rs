use crate::database::models::{NewNotification, Notification, NotificationKind};
use crate::database::repository::{DbResult, PaymentUnitOfWork};
use tracing::{info, warn};

/// Persists user notifications inside the caller's unit of work and emits
/// the notification log line once the work is committed.
#[derive(Debug, Clone, Default)]
pub struct NotificationService;

impl NotificationService {
    pub fn new() -> Self {
        Self
    }

    pub async fn record(
        &self,
        uow: &mut dyn PaymentUnitOfWork,
        user_id: i64,
        kind: NotificationKind,
        message: String,
    ) -> DbResult<Notification> {
        let payment_id = uow.payment().id;
        uow.insert_notification(NewNotification {
            user_id,
            kind,
            message,
            payment_id: Some(payment_id),
        })
        .await
    }

    pub fn announce(&self, notification: &Notification) {
        match notification.kind {
            NotificationKind::PaymentSucceeded => {
                info!(
                    notification_id = %notification.id,
                    user_id = notification.user_id,
                    payment_id = ?notification.payment_id,
                    "🔔 NOTIFICATION: Payment Succeeded - {}", notification.message
                );
            }
            NotificationKind::PaymentFailed => {
                warn!(
                    notification_id = %notification.id,
                    user_id = notification.user_id,
                    payment_id = ?notification.payment_id,
                    "🔔 NOTIFICATION: Payment Failed - {}", notification.message
                );
            }
            NotificationKind::PaymentRefunded => {
                info!(
                    notification_id = %notification.id,
                    user_id = notification.user_id,
                    payment_id = ?notification.payment_id,
                    "🔔 NOTIFICATION: Payment Refunded - {}", notification.message
                );
            }
        }
    }
}
