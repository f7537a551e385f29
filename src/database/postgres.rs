use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool, Postgres};
use std::str::FromStr;
use uuid::Uuid;

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::models::{
    InsertTransactionOutcome, NewNotification, NewPayment, NewTransaction, Notification,
    NotificationKind, Payment, PaymentTransaction, PropertyContact, PropertyVisitTerms,
    TransactionUpdate, Visit,
};
use crate::database::repository::{DbResult, PaymentStore, PaymentUnitOfWork};
use crate::payments::phone::{PayerContext, UserRole};
use crate::payments::state::{PaymentStatus, TransactionStatus, VisitStatus};
use crate::payments::types::{ProviderKind, ProviderRecord};

const PAYMENT_COLUMNS: &str = "id, tenant_id, booking_id, provider_code, amount, currency, status, \
     status_reason, metadata, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, payment_id, provider_code, external_id, provider_ref, status, \
     status_reason, payer_msisdn, amount, currency, request_payload, response_payload, \
     created_at, updated_at, completed_at";

const NOTIFICATION_COLUMNS: &str = "id, user_id, kind, message, payment_id, is_read, created_at";

const VISIT_COLUMNS: &str = "id, user_id, property_id, status, payment_id, created_at, updated_at";

fn corrupt(entity: &str, value: &str) -> DatabaseError {
    DatabaseError::new(DatabaseErrorKind::Unknown {
        message: format!("unexpected {} value '{}' in database", entity, value),
    })
}

#[derive(Debug, FromRow)]
struct PaymentRow {
    id: i64,
    tenant_id: i64,
    booking_id: Option<i64>,
    provider_code: String,
    amount: BigDecimal,
    currency: String,
    status: String,
    status_reason: Option<String>,
    metadata: JsonValue,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = DatabaseError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let status =
            PaymentStatus::from_str(&row.status).map_err(|_| corrupt("payment status", &row.status))?;
        Ok(Payment {
            id: row.id,
            tenant_id: row.tenant_id,
            booking_id: row.booking_id,
            provider_code: row.provider_code,
            amount: row.amount,
            currency: row.currency,
            status,
            status_reason: row.status_reason,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct TransactionRow {
    id: Uuid,
    payment_id: i64,
    provider_code: String,
    external_id: String,
    provider_ref: Option<String>,
    status: String,
    status_reason: Option<String>,
    payer_msisdn: String,
    amount: BigDecimal,
    currency: String,
    request_payload: JsonValue,
    response_payload: Option<JsonValue>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<TransactionRow> for PaymentTransaction {
    type Error = DatabaseError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let status = TransactionStatus::from_str(&row.status)
            .map_err(|_| corrupt("transaction status", &row.status))?;
        Ok(PaymentTransaction {
            id: row.id,
            payment_id: row.payment_id,
            provider_code: row.provider_code,
            external_id: row.external_id,
            provider_ref: row.provider_ref,
            status,
            status_reason: row.status_reason,
            payer_msisdn: row.payer_msisdn,
            amount: row.amount,
            currency: row.currency,
            request_payload: row.request_payload,
            response_payload: row.response_payload,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct NotificationRow {
    id: Uuid,
    user_id: i64,
    kind: String,
    message: String,
    payment_id: Option<i64>,
    is_read: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = DatabaseError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        let kind = NotificationKind::from_db(&row.kind).ok_or_else(|| corrupt("notification kind", &row.kind))?;
        Ok(Notification {
            id: row.id,
            user_id: row.user_id,
            kind,
            message: row.message,
            payment_id: row.payment_id,
            is_read: row.is_read,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct VisitRow {
    id: i64,
    user_id: i64,
    property_id: i64,
    status: String,
    payment_id: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<VisitRow> for Visit {
    type Error = DatabaseError;

    fn try_from(row: VisitRow) -> Result<Self, Self::Error> {
        let status =
            VisitStatus::from_str(&row.status).map_err(|_| corrupt("visit status", &row.status))?;
        Ok(Visit {
            id: row.id,
            user_id: row.user_id,
            property_id: row.property_id,
            status,
            payment_id: row.payment_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ProviderRow {
    code: String,
    display_name: String,
    provider_type: String,
    is_active: bool,
    fee_percent: BigDecimal,
}

impl TryFrom<ProviderRow> for ProviderRecord {
    type Error = DatabaseError;

    fn try_from(row: ProviderRow) -> Result<Self, Self::Error> {
        let kind = ProviderKind::from_str(&row.provider_type)
            .map_err(|_| corrupt("provider type", &row.provider_type))?;
        Ok(ProviderRecord {
            code: row.code,
            display_name: row.display_name,
            kind,
            is_active: row.is_active,
            fee_percent: row.fee_percent,
        })
    }
}

#[derive(Debug, FromRow)]
struct PayerRow {
    id: i64,
    username: String,
    role: String,
    phone: Option<String>,
    profile_phone: Option<String>,
    customer_phone: Option<String>,
}

#[derive(Debug, FromRow)]
struct PropertyRow {
    id: i64,
    visit_fee: BigDecimal,
    currency: String,
    contact_name: Option<String>,
    contact_phone: Option<String>,
    contact_email: Option<String>,
}

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PgPaymentStore {
    pool: PgPool,
}

impl PgPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn ping(&self) -> DbResult<()> {
        super::health_check(&self.pool).await
    }

    async fn begin_for_payment(&self, payment_id: i64) -> DbResult<Box<dyn PaymentUnitOfWork>> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payment WHERE id = $1 FOR UPDATE",
            PAYMENT_COLUMNS
        ))
        .bind(payment_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or_else(|| DatabaseError::not_found("Payment", payment_id))?;

        Ok(Box::new(PgUnitOfWork {
            tx,
            payment: row.try_into()?,
        }))
    }

    async fn create_payment(&self, new: NewPayment) -> DbResult<Payment> {
        sqlx::query_as::<_, PaymentRow>(&format!(
            "INSERT INTO payment (tenant_id, booking_id, provider_code, amount, currency, status, metadata) \
             VALUES ($1, $2, $3, $4, $5, 'pending', $6) RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(new.tenant_id)
        .bind(new.booking_id)
        .bind(&new.provider_code)
        .bind(&new.amount)
        .bind(&new.currency)
        .bind(&new.metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .try_into()
    }

    async fn find_payment(&self, payment_id: i64) -> DbResult<Option<Payment>> {
        sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payment WHERE id = $1",
            PAYMENT_COLUMNS
        ))
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(Payment::try_from)
        .transpose()
    }

    async fn find_transaction(&self, id: Uuid) -> DbResult<Option<PaymentTransaction>> {
        sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transaction WHERE id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(PaymentTransaction::try_from)
        .transpose()
    }

    async fn find_transaction_by_external_id(
        &self,
        external_id: &str,
    ) -> DbResult<Option<PaymentTransaction>> {
        sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transaction WHERE external_id = $1 ORDER BY created_at DESC LIMIT 1",
            TRANSACTION_COLUMNS
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(PaymentTransaction::try_from)
        .transpose()
    }

    async fn latest_transaction(&self, payment_id: i64) -> DbResult<Option<PaymentTransaction>> {
        sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transaction WHERE payment_id = $1 ORDER BY created_at DESC LIMIT 1",
            TRANSACTION_COLUMNS
        ))
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(PaymentTransaction::try_from)
        .transpose()
    }

    async fn load_payer_context(&self, payment_id: i64) -> DbResult<PayerContext> {
        let row = sqlx::query_as::<_, PayerRow>(
            "SELECT u.id, u.username, u.role, u.phone, pr.phone AS profile_phone, b.customer_phone \
             FROM payment p \
             JOIN app_user u ON u.id = p.tenant_id \
             LEFT JOIN user_profile pr ON pr.user_id = u.id \
             LEFT JOIN booking b ON b.id = p.booking_id \
             WHERE p.id = $1",
        )
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or_else(|| DatabaseError::not_found("Payment", payment_id))?;

        Ok(PayerContext {
            tenant_id: row.id,
            username: row.username,
            role: UserRole::from_db(&row.role),
            user_phone: row.phone,
            profile_phone: row.profile_phone,
            booking_customer_phone: row.customer_phone,
        })
    }

    async fn property_visit_terms(&self, property_id: i64) -> DbResult<Option<PropertyVisitTerms>> {
        let row = sqlx::query_as::<_, PropertyRow>(
            "SELECT id, visit_fee, currency, contact_name, contact_phone, contact_email \
             FROM property WHERE id = $1",
        )
        .bind(property_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(row.map(|r| PropertyVisitTerms {
            property_id: r.id,
            visit_fee: r.visit_fee,
            currency: r.currency,
            contact: PropertyContact {
                name: r.contact_name,
                phone: r.contact_phone,
                email: r.contact_email,
            },
        }))
    }

    async fn find_visit(&self, user_id: i64, property_id: i64) -> DbResult<Option<Visit>> {
        sqlx::query_as::<_, VisitRow>(&format!(
            "SELECT {} FROM visit WHERE user_id = $1 AND property_id = $2 ORDER BY id DESC LIMIT 1",
            VISIT_COLUMNS
        ))
        .bind(user_id)
        .bind(property_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(Visit::try_from)
        .transpose()
    }

    async fn find_or_create_visit(&self, user_id: i64, property_id: i64) -> DbResult<Visit> {
        let inserted = sqlx::query_as::<_, VisitRow>(&format!(
            "INSERT INTO visit (user_id, property_id, status) VALUES ($1, $2, 'unpaid') \
             ON CONFLICT (user_id, property_id) DO NOTHING RETURNING {}",
            VISIT_COLUMNS
        ))
        .bind(user_id)
        .bind(property_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        match inserted {
            Some(row) => row.try_into(),
            None => self
                .find_visit(user_id, property_id)
                .await?
                .ok_or_else(|| DatabaseError::not_found("Visit", format!("{}/{}", user_id, property_id))),
        }
    }

    async fn claim_visit_payment(
        &self,
        visit_id: i64,
        expected_payment_id: Option<i64>,
        payment_id: i64,
    ) -> DbResult<Option<Visit>> {
        sqlx::query_as::<_, VisitRow>(&format!(
            "UPDATE visit SET payment_id = $3, status = 'paying', updated_at = NOW() \
             WHERE id = $1 AND status <> 'paid' AND payment_id IS NOT DISTINCT FROM $2 \
             RETURNING {}",
            VISIT_COLUMNS
        ))
        .bind(visit_id)
        .bind(expected_payment_id)
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(Visit::try_from)
        .transpose()
    }

    async fn list_notifications(&self, user_id: i64) -> DbResult<Vec<Notification>> {
        sqlx::query_as::<_, NotificationRow>(&format!(
            "SELECT {} FROM notification WHERE user_id = $1 ORDER BY created_at DESC",
            NOTIFICATION_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .into_iter()
        .map(Notification::try_from)
        .collect()
    }

    async fn list_providers(&self) -> DbResult<Vec<ProviderRecord>> {
        sqlx::query_as::<_, ProviderRow>(
            "SELECT code, display_name, provider_type, is_active, fee_percent \
             FROM payment_provider ORDER BY code",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .into_iter()
        .map(ProviderRecord::try_from)
        .collect()
    }

    async fn upsert_provider(&self, record: &ProviderRecord) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO payment_provider (code, display_name, provider_type, is_active, fee_percent) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (code) DO UPDATE SET \
               display_name = EXCLUDED.display_name, \
               provider_type = EXCLUDED.provider_type, \
               fee_percent = EXCLUDED.fee_percent, \
               updated_at = NOW()",
        )
        .bind(record.code.to_lowercase())
        .bind(&record.display_name)
        .bind(record.kind.as_str())
        .bind(record.is_active)
        .bind(&record.fee_percent)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }
}

struct PgUnitOfWork {
    tx: sqlx::Transaction<'static, Postgres>,
    payment: Payment,
}

#[async_trait]
impl PaymentUnitOfWork for PgUnitOfWork {
    fn payment(&self) -> &Payment {
        &self.payment
    }

    async fn find_transaction(&mut self, id: Uuid) -> DbResult<Option<PaymentTransaction>> {
        sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transaction WHERE id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(PaymentTransaction::try_from)
        .transpose()
    }

    async fn active_transaction(&mut self) -> DbResult<Option<PaymentTransaction>> {
        sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transaction \
             WHERE payment_id = $1 AND status IN ('pending', 'sent', 'acknowledged') LIMIT 1",
            TRANSACTION_COLUMNS
        ))
        .bind(self.payment.id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(PaymentTransaction::try_from)
        .transpose()
    }

    async fn count_transactions(&mut self) -> DbResult<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM transaction WHERE payment_id = $1")
                .bind(self.payment.id)
                .fetch_one(&mut *self.tx)
                .await
                .map_err(DatabaseError::from_sqlx)?;
        Ok(count)
    }

    async fn insert_transaction(
        &mut self,
        new: NewTransaction,
    ) -> DbResult<InsertTransactionOutcome> {
        // ON CONFLICT keeps the transaction usable; the caller learns which
        // constraint fired from the follow-up lookup.
        let inserted = sqlx::query_as::<_, TransactionRow>(&format!(
            "INSERT INTO transaction \
               (id, payment_id, provider_code, external_id, status, payer_msisdn, amount, currency, request_payload) \
             VALUES ($1, $2, $3, $4, 'pending', $5, $6, $7, $8) \
             ON CONFLICT DO NOTHING RETURNING {}",
            TRANSACTION_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(new.payment_id)
        .bind(&new.provider_code)
        .bind(&new.external_id)
        .bind(&new.payer_msisdn)
        .bind(&new.amount)
        .bind(&new.currency)
        .bind(&new.request_payload)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        match inserted {
            Some(row) => Ok(InsertTransactionOutcome::Created(row.try_into()?)),
            None => match self.active_transaction().await? {
                Some(active) => Ok(InsertTransactionOutcome::ActiveExists(active)),
                None => Ok(InsertTransactionOutcome::ExternalIdTaken),
            },
        }
    }

    async fn update_transaction(
        &mut self,
        id: Uuid,
        update: TransactionUpdate,
    ) -> DbResult<PaymentTransaction> {
        sqlx::query_as::<_, TransactionRow>(&format!(
            "UPDATE transaction SET \
               status = $2, \
               status_reason = COALESCE($3, status_reason), \
               response_payload = COALESCE($4, response_payload), \
               provider_ref = COALESCE($5, provider_ref), \
               updated_at = NOW(), \
               completed_at = CASE WHEN $2 IN ('succeeded', 'failed', 'timeout') \
                              THEN COALESCE(completed_at, NOW()) ELSE completed_at END \
             WHERE id = $1 RETURNING {}",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .bind(update.status.as_str())
        .bind(update.reason)
        .bind(update.response_payload)
        .bind(update.provider_ref)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or_else(|| DatabaseError::not_found("Transaction", id))?
        .try_into()
    }

    async fn update_payment_status(
        &mut self,
        status: PaymentStatus,
        reason: Option<&str>,
    ) -> DbResult<Payment> {
        let payment: Payment = sqlx::query_as::<_, PaymentRow>(&format!(
            "UPDATE payment SET status = $2, status_reason = $3, updated_at = NOW() \
             WHERE id = $1 RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(self.payment.id)
        .bind(status.as_str())
        .bind(reason)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .try_into()?;
        self.payment = payment.clone();
        Ok(payment)
    }

    async fn insert_notification(&mut self, new: NewNotification) -> DbResult<Notification> {
        sqlx::query_as::<_, NotificationRow>(&format!(
            "INSERT INTO notification (id, user_id, kind, message, payment_id) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            NOTIFICATION_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(new.user_id)
        .bind(new.kind.as_str())
        .bind(&new.message)
        .bind(new.payment_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .try_into()
    }

    async fn set_visit_status(&mut self, from: &[VisitStatus], to: VisitStatus) -> DbResult<u64> {
        let from: Vec<&str> = from.iter().map(VisitStatus::as_str).collect();
        let result = sqlx::query(
            "UPDATE visit SET status = $2, updated_at = NOW() \
             WHERE payment_id = $1 AND status = ANY($3)",
        )
        .bind(self.payment.id)
        .bind(to.as_str())
        .bind(&from)
        .execute(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected())
    }

    async fn mark_booking_paid(&mut self, booking_id: i64, paid_at: DateTime<Utc>) -> DbResult<()> {
        sqlx::query("UPDATE booking SET paid_at = COALESCE(paid_at, $2) WHERE id = $1")
            .bind(booking_id)
            .bind(paid_at)
            .execute(&mut *self.tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> DbResult<()> {
        self.tx.commit().await.map_err(DatabaseError::from_sqlx)
    }
}
