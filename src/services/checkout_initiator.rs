//! Checkout Initiator
//!
//! Turns a pending payment into a provider checkout. Each attempt is written
//! as a `pending` transaction before the provider is called and updated after
//! the call returns; no database transaction stays open across the HTTP call.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::database::models::{
    InsertTransactionOutcome, NewTransaction, Notification, Payment, PaymentTransaction,
    TransactionUpdate,
};
use crate::database::repository::PaymentStore;
use crate::payments::credentials::ProviderEnv;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::factory::PaymentProviderFactory;
use crate::payments::phone::resolve_payer_phone;
use crate::payments::provider::PaymentProvider;
use crate::payments::registry::ProviderRegistry;
use crate::payments::state::{PaymentStatus, TransactionStatus, VisitStatus};
use crate::payments::token_cache::TokenCache;
use crate::payments::types::{CheckoutContext, CheckoutOutcome, CheckoutRequest, ProviderRecord};
use crate::services::domain_events::{transition_payment, DomainEventHook};

const NONCE_LEN: usize = 10;
const MAX_NONCE_ATTEMPTS: usize = 5;

/// Bounded exponential backoff for transient checkout failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay added or removed at random.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Un-jittered delay before retry number `retry` (1-based).
    pub fn base_delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        std::cmp::min(self.base_delay.saturating_mul(factor), self.max_delay)
    }

    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.base_delay_for(retry);
        if self.jitter <= 0.0 {
            return base;
        }
        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        base.mul_f64(1.0 + spread)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InitiateResult {
    pub payment_id: i64,
    pub transaction_id: Uuid,
    pub external_id: String,
    pub status: TransactionStatus,
    pub payment_status: PaymentStatus,
    pub provider_message: Option<String>,
    pub reused_existing: bool,
    pub attempts: u32,
    pub next_action: Option<String>,
}

impl InitiateResult {
    fn from_parts(payment: &Payment, tx: &PaymentTransaction, reused_existing: bool) -> Self {
        let next_action = match tx.status {
            TransactionStatus::Pending | TransactionStatus::Sent | TransactionStatus::Acknowledged => {
                Some("confirm_on_phone".to_string())
            }
            TransactionStatus::Failed | TransactionStatus::Timeout
                if payment.status == PaymentStatus::Pending =>
            {
                Some("retry_later".to_string())
            }
            _ => None,
        };
        Self {
            payment_id: payment.id,
            transaction_id: tx.id,
            external_id: tx.external_id.clone(),
            status: tx.status,
            payment_status: payment.status,
            provider_message: tx.status_reason.clone(),
            reused_existing,
            attempts: 1,
            next_action,
        }
    }
}

enum Attempt {
    Finished(InitiateResult),
    Retryable(InitiateResult),
}

/// What came back from one provider call.
enum CallResult {
    Outcome(CheckoutOutcome, serde_json::Value),
    Timeout(String),
    Transport { message: String, retryable: bool },
}

pub struct CheckoutInitiator {
    store: Arc<dyn PaymentStore>,
    registry: Arc<ProviderRegistry>,
    providers: PaymentProviderFactory,
    tokens: Arc<TokenCache>,
    env: Arc<ProviderEnv>,
    hook: DomainEventHook,
    retry: RetryPolicy,
}

impl CheckoutInitiator {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        registry: Arc<ProviderRegistry>,
        providers: PaymentProviderFactory,
        tokens: Arc<TokenCache>,
        env: Arc<ProviderEnv>,
        hook: DomainEventHook,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            registry,
            providers,
            tokens,
            env,
            hook,
            retry,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Starts (or reports) the checkout for a payment, retrying transient
    /// failures within the retry policy.
    pub async fn initiate(&self, payment_id: i64) -> PaymentResult<InitiateResult> {
        let mut retries = 0;
        loop {
            let attempt = self.attempt(payment_id).await;
            let retryable = match &attempt {
                Ok(Attempt::Finished(_)) => false,
                Ok(Attempt::Retryable(_)) => true,
                Err(e) => e.is_retryable(),
            };

            if !retryable || retries >= self.retry.max_retries {
                return match attempt {
                    Ok(Attempt::Finished(mut result)) | Ok(Attempt::Retryable(mut result)) => {
                        result.attempts = retries + 1;
                        Ok(result)
                    }
                    Err(e) => Err(e),
                };
            }

            retries += 1;
            let delay = self.retry.delay_for(retries);
            warn!(
                payment_id,
                retry = retries,
                max_retries = self.retry.max_retries,
                delay_ms = delay.as_millis() as u64,
                "checkout attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(&self, payment_id: i64) -> PaymentResult<Attempt> {
        // Cheap pre-check under the payment lock; nothing is written.
        let payment = {
            let mut uow = self.store.begin_for_payment(payment_id).await?;
            let payment = uow.payment().clone();
            if let Some(active) = uow.active_transaction().await? {
                info!(
                    payment_id,
                    transaction_id = %active.id,
                    status = %active.status,
                    "active checkout attempt exists, not creating another"
                );
                return Ok(Attempt::Finished(InitiateResult::from_parts(
                    &payment, &active, true,
                )));
            }
            payment
        };
        ensure_initiable(&payment)?;

        let record = self.registry.get(&payment.provider_code)?.clone();
        let adapter = self.providers.adapter_for(record.kind)?;

        let payer = self.store.load_payer_context(payment_id).await?;
        let msisdn = resolve_payer_phone(&payer)?;

        let credentials = self.env.credentials()?;
        let token_source = self.providers.token_source();
        let token = self.tokens.get_token(token_source.as_ref(), &self.env).await?;

        let mut ctx = CheckoutContext {
            external_id: String::new(),
            msisdn: msisdn.clone(),
            amount: payment.amount.clone(),
            currency: payment.currency.clone(),
            provider_channel: record.display_name.clone(),
            app_name: credentials.app_name.clone(),
            vendor_code: credentials.vendor_code.clone(),
            metadata: payment.metadata.clone(),
        };

        let (tx, request) = match self.insert_pending(&payment, &record, adapter.as_ref(), &mut ctx).await? {
            Inserted::Created(tx, request) => (tx, request),
            Inserted::Existing(result) => return Ok(Attempt::Finished(result)),
        };
        info!(
            payment_id,
            transaction_id = %tx.id,
            external_id = %tx.external_id,
            provider = %record.code,
            "checkout transaction created"
        );

        let call = match adapter.submit_checkout(&self.env, &token, &request).await {
            Ok(response) => {
                if response.http_status == 401 {
                    self.tokens.invalidate(token_source.as_ref(), &self.env).await;
                }
                let mut outcome = adapter.parse_checkout_response(&response);
                if let CheckoutOutcome::Declined { retryable, .. } = &mut outcome {
                    *retryable |= response.http_status == 401;
                }
                CallResult::Outcome(outcome, response.body)
            }
            Err(PaymentError::ProviderTimeout { message, .. }) => CallResult::Timeout(message),
            Err(e) => CallResult::Transport {
                retryable: e.is_retryable(),
                message: e.to_string(),
            },
        };

        self.apply_call_result(payment_id, tx.id, call).await
    }

    async fn insert_pending(
        &self,
        payment: &Payment,
        record: &ProviderRecord,
        adapter: &dyn PaymentProvider,
        ctx: &mut CheckoutContext,
    ) -> PaymentResult<Inserted> {
        let mut uow = self.store.begin_for_payment(payment.id).await?;
        ensure_initiable(uow.payment())?;

        for _ in 0..MAX_NONCE_ATTEMPTS {
            ctx.external_id = external_id_for(payment.id);
            let request = adapter.build_checkout_request(ctx)?;
            let outcome = uow
                .insert_transaction(NewTransaction {
                    payment_id: payment.id,
                    provider_code: record.code.clone(),
                    external_id: ctx.external_id.clone(),
                    payer_msisdn: ctx.msisdn.clone(),
                    amount: payment.amount.clone(),
                    currency: payment.currency.clone(),
                    request_payload: request.body.clone(),
                })
                .await?;

            match outcome {
                InsertTransactionOutcome::Created(tx) => {
                    uow.commit().await?;
                    return Ok(Inserted::Created(tx, request));
                }
                InsertTransactionOutcome::ActiveExists(active) => {
                    info!(
                        payment_id = payment.id,
                        transaction_id = %active.id,
                        "concurrent checkout won the race, reusing its transaction"
                    );
                    let locked = uow.payment().clone();
                    return Ok(Inserted::Existing(InitiateResult::from_parts(
                        &locked, &active, true,
                    )));
                }
                InsertTransactionOutcome::ExternalIdTaken => {
                    warn!(
                        payment_id = payment.id,
                        external_id = %ctx.external_id,
                        "external id collision, generating a new nonce"
                    );
                }
            }
        }

        Err(PaymentError::Internal {
            message: format!(
                "could not allocate a unique external id for payment {}",
                payment.id
            ),
        })
    }

    /// Records the provider's answer. If a callback already settled the
    /// transaction, its state wins and nothing is overwritten.
    async fn apply_call_result(
        &self,
        payment_id: i64,
        transaction_id: Uuid,
        call: CallResult,
    ) -> PaymentResult<Attempt> {
        let mut uow = self.store.begin_for_payment(payment_id).await?;
        let current = uow
            .find_transaction(transaction_id)
            .await?
            .ok_or_else(|| PaymentError::Internal {
                message: format!("transaction {} vanished", transaction_id),
            })?;

        if current.status != TransactionStatus::Pending {
            info!(
                payment_id,
                transaction_id = %transaction_id,
                status = %current.status,
                "transaction already advanced by a callback"
            );
            let payment = uow.payment().clone();
            return Ok(Attempt::Finished(InitiateResult::from_parts(
                &payment, &current, false,
            )));
        }

        let mut notifications: Vec<Notification> = Vec::new();
        let (tx, retryable) = match call {
            CallResult::Outcome(CheckoutOutcome::Accepted { provider_ref, message }, body) => {
                let tx = uow
                    .update_transaction(
                        transaction_id,
                        TransactionUpdate::status(TransactionStatus::Sent)
                            .with_reason(message)
                            .with_response(body)
                            .with_provider_ref(provider_ref),
                    )
                    .await?;
                if uow.payment().status == PaymentStatus::Pending {
                    transition_payment(uow.as_mut(), PaymentStatus::Initiated, None).await?;
                }
                info!(
                    payment_id,
                    transaction_id = %transaction_id,
                    provider_ref = ?tx.provider_ref,
                    "checkout accepted, awaiting callback"
                );
                (tx, false)
            }
            CallResult::Outcome(
                CheckoutOutcome::Declined {
                    code,
                    message,
                    retryable,
                },
                body,
            ) => {
                let tx = uow
                    .update_transaction(
                        transaction_id,
                        TransactionUpdate::status(TransactionStatus::Failed)
                            .with_reason(message.clone())
                            .with_response(body),
                    )
                    .await?;
                warn!(
                    payment_id,
                    transaction_id = %transaction_id,
                    code = ?code,
                    retryable,
                    reason = %message,
                    "checkout declined by provider"
                );
                if !retryable {
                    transition_payment(
                        uow.as_mut(),
                        PaymentStatus::Failed,
                        Some(message.as_str()),
                    )
                    .await?;
                    notifications.push(self.hook.on_payment_failed(uow.as_mut(), &message).await?);
                }
                (tx, retryable)
            }
            CallResult::Timeout(message) => {
                let tx = uow
                    .update_transaction(
                        transaction_id,
                        TransactionUpdate::status(TransactionStatus::Timeout).with_reason(message),
                    )
                    .await?;
                warn!(payment_id, transaction_id = %transaction_id, "checkout timed out");
                (tx, true)
            }
            CallResult::Transport { message, retryable } => {
                let tx = uow
                    .update_transaction(
                        transaction_id,
                        TransactionUpdate::status(TransactionStatus::Failed)
                            .with_reason(message.clone()),
                    )
                    .await?;
                error!(
                    payment_id,
                    transaction_id = %transaction_id,
                    error = %message,
                    "checkout request failed"
                );
                (tx, retryable)
            }
        };

        let payment = uow.payment().clone();
        uow.commit().await?;
        self.hook.announce(&notifications);

        let result = InitiateResult::from_parts(&payment, &tx, false);
        Ok(if retryable {
            Attempt::Retryable(result)
        } else {
            Attempt::Finished(result)
        })
    }

    /// Cancels a pending payment that has no attempt in flight.
    pub async fn cancel(&self, payment_id: i64) -> PaymentResult<Payment> {
        let mut uow = self.store.begin_for_payment(payment_id).await?;
        if uow.active_transaction().await?.is_some() {
            return Err(PaymentError::DuplicateActiveTransaction { payment_id });
        }
        if uow.payment().status != PaymentStatus::Pending {
            let status = uow.payment().status;
            return Err(PaymentError::IllegalState {
                payment_id,
                status: status.to_string(),
                message: "only pending payments can be cancelled".to_string(),
            });
        }
        let payment =
            transition_payment(uow.as_mut(), PaymentStatus::Cancelled, Some("cancelled")).await?;
        uow.set_visit_status(&[VisitStatus::Paying], VisitStatus::Unpaid)
            .await?;
        uow.commit().await?;
        info!(payment_id, "payment cancelled");
        Ok(payment)
    }
}

enum Inserted {
    Created(PaymentTransaction, CheckoutRequest),
    Existing(InitiateResult),
}

fn ensure_initiable(payment: &Payment) -> PaymentResult<()> {
    if payment.status != PaymentStatus::Pending {
        return Err(PaymentError::IllegalState {
            payment_id: payment.id,
            status: payment.status.to_string(),
            message: format!("payment is {}, expected pending", payment.status),
        });
    }
    if payment.amount <= bigdecimal::BigDecimal::from(0) {
        return Err(PaymentError::InvalidAmount {
            amount: payment.amount.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

/// `<payment id>-<random nonce>`.
pub fn external_id_for(payment_id: i64) -> String {
    let nonce: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(NONCE_LEN)
        .map(char::from)
        .collect();
    format!("{}-{}", payment_id, nonce.to_lowercase())
}
