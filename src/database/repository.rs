//! Storage seams used by the payment services.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::database::error::DatabaseError;
use crate::database::models::{
    InsertTransactionOutcome, NewNotification, NewPayment, NewTransaction, Notification, Payment,
    PaymentTransaction, PropertyVisitTerms, TransactionUpdate, Visit,
};
use crate::payments::phone::PayerContext;
use crate::payments::state::{PaymentStatus, VisitStatus};
use crate::payments::types::ProviderRecord;

pub type DbResult<T> = Result<T, DatabaseError>;

/// Reads plus the entry point for locked writes.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn ping(&self) -> DbResult<()>;

    /// Opens a unit of work holding the payment's row lock until it is
    /// committed or dropped. Dropping without commit rolls back.
    async fn begin_for_payment(&self, payment_id: i64) -> DbResult<Box<dyn PaymentUnitOfWork>>;

    async fn create_payment(&self, new: NewPayment) -> DbResult<Payment>;

    async fn find_payment(&self, payment_id: i64) -> DbResult<Option<Payment>>;

    async fn find_transaction(&self, id: Uuid) -> DbResult<Option<PaymentTransaction>>;

    async fn find_transaction_by_external_id(
        &self,
        external_id: &str,
    ) -> DbResult<Option<PaymentTransaction>>;

    async fn latest_transaction(&self, payment_id: i64) -> DbResult<Option<PaymentTransaction>>;

    async fn load_payer_context(&self, payment_id: i64) -> DbResult<PayerContext>;

    async fn property_visit_terms(&self, property_id: i64) -> DbResult<Option<PropertyVisitTerms>>;

    async fn find_visit(&self, user_id: i64, property_id: i64) -> DbResult<Option<Visit>>;

    /// Returns the (user, property) visit, creating it if missing. Concurrent
    /// callers get the same row.
    async fn find_or_create_visit(&self, user_id: i64, property_id: i64) -> DbResult<Visit>;

    /// Links `payment_id` and moves the visit to `paying`, but only while the
    /// visit is unpaid and still linked to `expected_payment_id`. `None` means
    /// another caller changed the visit first.
    async fn claim_visit_payment(
        &self,
        visit_id: i64,
        expected_payment_id: Option<i64>,
        payment_id: i64,
    ) -> DbResult<Option<Visit>>;

    async fn list_notifications(&self, user_id: i64) -> DbResult<Vec<Notification>>;

    async fn list_providers(&self) -> DbResult<Vec<ProviderRecord>>;

    /// Inserts or refreshes a catalogue entry. An existing `is_active` flag is
    /// left alone.
    async fn upsert_provider(&self, record: &ProviderRecord) -> DbResult<()>;
}

/// Writes performed under one payment's lock, committed atomically.
#[async_trait]
pub trait PaymentUnitOfWork: Send {
    /// The locked payment as of the last write.
    fn payment(&self) -> &Payment;

    async fn find_transaction(&mut self, id: Uuid) -> DbResult<Option<PaymentTransaction>>;

    async fn active_transaction(&mut self) -> DbResult<Option<PaymentTransaction>>;

    async fn count_transactions(&mut self) -> DbResult<i64>;

    async fn insert_transaction(
        &mut self,
        new: NewTransaction,
    ) -> DbResult<InsertTransactionOutcome>;

    async fn update_transaction(
        &mut self,
        id: Uuid,
        update: TransactionUpdate,
    ) -> DbResult<PaymentTransaction>;

    async fn update_payment_status(
        &mut self,
        status: PaymentStatus,
        reason: Option<&str>,
    ) -> DbResult<Payment>;

    async fn insert_notification(&mut self, new: NewNotification) -> DbResult<Notification>;

    /// Moves visits linked to the locked payment from any of `from` to `to`.
    async fn set_visit_status(&mut self, from: &[VisitStatus], to: VisitStatus) -> DbResult<u64>;

    async fn mark_booking_paid(&mut self, booking_id: i64, paid_at: DateTime<Utc>) -> DbResult<()>;

    async fn commit(self: Box<Self>) -> DbResult<()>;
}
