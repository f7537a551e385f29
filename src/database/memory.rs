//! In-process store for development runs and tests.
//!
//! A single async mutex guards all state. A unit of work holds it for its
//! whole lifetime and edits a copy that replaces the shared state on commit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::database::error::DatabaseError;
use crate::database::models::{
    InsertTransactionOutcome, NewNotification, NewPayment, NewTransaction, Notification, Payment,
    PaymentTransaction, PropertyVisitTerms, TransactionUpdate, Visit,
};
use crate::database::repository::{DbResult, PaymentStore, PaymentUnitOfWork};
use crate::payments::phone::{PayerContext, UserRole};
use crate::payments::state::{PaymentStatus, TransactionStatus, VisitStatus};
use crate::payments::types::ProviderRecord;

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub role: UserRole,
    pub phone: Option<String>,
    pub profile_phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookingRecord {
    pub id: i64,
    pub customer_phone: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    payments: BTreeMap<i64, Payment>,
    transactions: BTreeMap<Uuid, PaymentTransaction>,
    notifications: Vec<Notification>,
    visits: BTreeMap<i64, Visit>,
    providers: BTreeMap<String, ProviderRecord>,
    users: HashMap<i64, UserRecord>,
    bookings: HashMap<i64, BookingRecord>,
    properties: HashMap<i64, PropertyVisitTerms>,
    next_payment_id: i64,
    next_visit_id: i64,
}

impl MemoryState {
    fn active_for(&self, payment_id: i64) -> Option<&PaymentTransaction> {
        self.transactions
            .values()
            .find(|tx| tx.payment_id == payment_id && tx.status.is_active())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryPaymentStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: UserRecord) {
        self.state.lock().await.users.insert(user.id, user);
    }

    pub async fn insert_booking(&self, booking: BookingRecord) {
        self.state.lock().await.bookings.insert(booking.id, booking);
    }

    pub async fn insert_property(&self, terms: PropertyVisitTerms) {
        self.state
            .lock()
            .await
            .properties
            .insert(terms.property_id, terms);
    }

    pub async fn booking(&self, booking_id: i64) -> Option<BookingRecord> {
        self.state.lock().await.bookings.get(&booking_id).cloned()
    }

    pub async fn transactions_for_payment(&self, payment_id: i64) -> Vec<PaymentTransaction> {
        let state = self.state.lock().await;
        let mut txs: Vec<PaymentTransaction> = state
            .transactions
            .values()
            .filter(|tx| tx.payment_id == payment_id)
            .cloned()
            .collect();
        txs.sort_by_key(|tx| tx.created_at);
        txs
    }

    pub async fn visit(&self, visit_id: i64) -> Option<Visit> {
        self.state.lock().await.visits.get(&visit_id).cloned()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn ping(&self) -> DbResult<()> {
        Ok(())
    }

    async fn begin_for_payment(&self, payment_id: i64) -> DbResult<Box<dyn PaymentUnitOfWork>> {
        let guard = self.state.clone().lock_owned().await;
        let work = (*guard).clone();
        let payment = work
            .payments
            .get(&payment_id)
            .cloned()
            .ok_or_else(|| DatabaseError::not_found("Payment", payment_id))?;
        Ok(Box::new(MemoryUnitOfWork {
            guard,
            work,
            payment,
        }))
    }

    async fn create_payment(&self, new: NewPayment) -> DbResult<Payment> {
        let mut state = self.state.lock().await;
        state.next_payment_id += 1;
        let now = Utc::now();
        let payment = Payment {
            id: state.next_payment_id,
            tenant_id: new.tenant_id,
            booking_id: new.booking_id,
            provider_code: new.provider_code,
            amount: new.amount,
            currency: new.currency,
            status: PaymentStatus::Pending,
            status_reason: None,
            metadata: new.metadata,
            created_at: now,
            updated_at: now,
        };
        state.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn find_payment(&self, payment_id: i64) -> DbResult<Option<Payment>> {
        Ok(self.state.lock().await.payments.get(&payment_id).cloned())
    }

    async fn find_transaction(&self, id: Uuid) -> DbResult<Option<PaymentTransaction>> {
        Ok(self.state.lock().await.transactions.get(&id).cloned())
    }

    async fn find_transaction_by_external_id(
        &self,
        external_id: &str,
    ) -> DbResult<Option<PaymentTransaction>> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .values()
            .find(|tx| tx.external_id == external_id)
            .cloned())
    }

    async fn latest_transaction(&self, payment_id: i64) -> DbResult<Option<PaymentTransaction>> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .values()
            .filter(|tx| tx.payment_id == payment_id)
            .max_by_key(|tx| tx.created_at)
            .cloned())
    }

    async fn load_payer_context(&self, payment_id: i64) -> DbResult<PayerContext> {
        let state = self.state.lock().await;
        let payment = state
            .payments
            .get(&payment_id)
            .ok_or_else(|| DatabaseError::not_found("Payment", payment_id))?;
        let user = state
            .users
            .get(&payment.tenant_id)
            .ok_or_else(|| DatabaseError::not_found("User", payment.tenant_id))?;
        let booking_customer_phone = payment
            .booking_id
            .and_then(|id| state.bookings.get(&id))
            .and_then(|b| b.customer_phone.clone());

        Ok(PayerContext {
            tenant_id: user.id,
            username: user.username.clone(),
            role: user.role,
            user_phone: user.phone.clone(),
            profile_phone: user.profile_phone.clone(),
            booking_customer_phone,
        })
    }

    async fn property_visit_terms(&self, property_id: i64) -> DbResult<Option<PropertyVisitTerms>> {
        Ok(self.state.lock().await.properties.get(&property_id).cloned())
    }

    async fn find_visit(&self, user_id: i64, property_id: i64) -> DbResult<Option<Visit>> {
        let state = self.state.lock().await;
        Ok(state
            .visits
            .values()
            .filter(|v| v.user_id == user_id && v.property_id == property_id)
            .max_by_key(|v| v.id)
            .cloned())
    }

    async fn find_or_create_visit(&self, user_id: i64, property_id: i64) -> DbResult<Visit> {
        let mut state = self.state.lock().await;
        if let Some(visit) = state
            .visits
            .values()
            .find(|v| v.user_id == user_id && v.property_id == property_id)
        {
            return Ok(visit.clone());
        }
        state.next_visit_id += 1;
        let now = Utc::now();
        let visit = Visit {
            id: state.next_visit_id,
            user_id,
            property_id,
            status: VisitStatus::Unpaid,
            payment_id: None,
            created_at: now,
            updated_at: now,
        };
        state.visits.insert(visit.id, visit.clone());
        Ok(visit)
    }

    async fn claim_visit_payment(
        &self,
        visit_id: i64,
        expected_payment_id: Option<i64>,
        payment_id: i64,
    ) -> DbResult<Option<Visit>> {
        let mut state = self.state.lock().await;
        let visit = state
            .visits
            .get_mut(&visit_id)
            .ok_or_else(|| DatabaseError::not_found("Visit", visit_id))?;
        if visit.status == VisitStatus::Paid || visit.payment_id != expected_payment_id {
            return Ok(None);
        }
        visit.payment_id = Some(payment_id);
        visit.status = VisitStatus::Paying;
        visit.updated_at = Utc::now();
        Ok(Some(visit.clone()))
    }

    async fn list_notifications(&self, user_id: i64) -> DbResult<Vec<Notification>> {
        let state = self.state.lock().await;
        let mut items: Vec<Notification> = state
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    async fn list_providers(&self) -> DbResult<Vec<ProviderRecord>> {
        Ok(self.state.lock().await.providers.values().cloned().collect())
    }

    async fn upsert_provider(&self, record: &ProviderRecord) -> DbResult<()> {
        let mut state = self.state.lock().await;
        let key = record.code.to_lowercase();
        let is_active = state
            .providers
            .get(&key)
            .map(|existing| existing.is_active)
            .unwrap_or(record.is_active);
        state.providers.insert(
            key,
            ProviderRecord {
                is_active,
                ..record.clone()
            },
        );
        Ok(())
    }
}

struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryState>,
    work: MemoryState,
    payment: Payment,
}

#[async_trait]
impl PaymentUnitOfWork for MemoryUnitOfWork {
    fn payment(&self) -> &Payment {
        &self.payment
    }

    async fn find_transaction(&mut self, id: Uuid) -> DbResult<Option<PaymentTransaction>> {
        Ok(self.work.transactions.get(&id).cloned())
    }

    async fn active_transaction(&mut self) -> DbResult<Option<PaymentTransaction>> {
        Ok(self.work.active_for(self.payment.id).cloned())
    }

    async fn count_transactions(&mut self) -> DbResult<i64> {
        let id = self.payment.id;
        Ok(self
            .work
            .transactions
            .values()
            .filter(|tx| tx.payment_id == id)
            .count() as i64)
    }

    async fn insert_transaction(
        &mut self,
        new: NewTransaction,
    ) -> DbResult<InsertTransactionOutcome> {
        if let Some(active) = self.work.active_for(new.payment_id) {
            return Ok(InsertTransactionOutcome::ActiveExists(active.clone()));
        }
        let taken = self
            .work
            .transactions
            .values()
            .any(|tx| tx.provider_code == new.provider_code && tx.external_id == new.external_id);
        if taken {
            return Ok(InsertTransactionOutcome::ExternalIdTaken);
        }

        let now = Utc::now();
        let tx = PaymentTransaction {
            id: Uuid::new_v4(),
            payment_id: new.payment_id,
            provider_code: new.provider_code,
            external_id: new.external_id,
            provider_ref: None,
            status: TransactionStatus::Pending,
            status_reason: None,
            payer_msisdn: new.payer_msisdn,
            amount: new.amount,
            currency: new.currency,
            request_payload: new.request_payload,
            response_payload: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.work.transactions.insert(tx.id, tx.clone());
        Ok(InsertTransactionOutcome::Created(tx))
    }

    async fn update_transaction(
        &mut self,
        id: Uuid,
        update: TransactionUpdate,
    ) -> DbResult<PaymentTransaction> {
        let tx = self
            .work
            .transactions
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::not_found("Transaction", id))?;
        let now = Utc::now();
        tx.status = update.status;
        if update.reason.is_some() {
            tx.status_reason = update.reason;
        }
        if update.response_payload.is_some() {
            tx.response_payload = update.response_payload;
        }
        if update.provider_ref.is_some() {
            tx.provider_ref = update.provider_ref;
        }
        if tx.status.is_terminal() && tx.completed_at.is_none() {
            tx.completed_at = Some(now);
        }
        tx.updated_at = now;
        Ok(tx.clone())
    }

    async fn update_payment_status(
        &mut self,
        status: PaymentStatus,
        reason: Option<&str>,
    ) -> DbResult<Payment> {
        let payment = self
            .work
            .payments
            .get_mut(&self.payment.id)
            .ok_or_else(|| DatabaseError::not_found("Payment", self.payment.id))?;
        payment.status = status;
        payment.status_reason = reason.map(str::to_string);
        payment.updated_at = Utc::now();
        self.payment = payment.clone();
        Ok(self.payment.clone())
    }

    async fn insert_notification(&mut self, new: NewNotification) -> DbResult<Notification> {
        let notification = Notification {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            kind: new.kind,
            message: new.message,
            payment_id: new.payment_id,
            is_read: false,
            created_at: Utc::now(),
        };
        self.work.notifications.push(notification.clone());
        Ok(notification)
    }

    async fn set_visit_status(&mut self, from: &[VisitStatus], to: VisitStatus) -> DbResult<u64> {
        let payment_id = self.payment.id;
        let mut changed = 0;
        for visit in self.work.visits.values_mut() {
            if visit.payment_id == Some(payment_id) && from.contains(&visit.status) {
                visit.status = to;
                visit.updated_at = Utc::now();
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn mark_booking_paid(&mut self, booking_id: i64, paid_at: DateTime<Utc>) -> DbResult<()> {
        if let Some(booking) = self.work.bookings.get_mut(&booking_id) {
            booking.paid_at.get_or_insert(paid_at);
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> DbResult<()> {
        let MemoryUnitOfWork {
            mut guard, work, ..
        } = *self;
        *guard = work;
        Ok(())
    }
}
