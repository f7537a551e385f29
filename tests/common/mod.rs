//! Shared harness: in-memory store, scripted provider and a fixed token.
#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use makazi_payments::config::GatewayConfig;
use makazi_payments::database::memory::{BookingRecord, UserRecord};
use makazi_payments::database::models::{PropertyContact, PropertyVisitTerms};
use makazi_payments::database::{InMemoryPaymentStore, PaymentStore};
use makazi_payments::payments::credentials::{ProviderEnv, Secret};
use makazi_payments::payments::error::{PaymentError, PaymentResult};
use makazi_payments::payments::phone::UserRole;
use makazi_payments::payments::provider::PaymentProvider;
use makazi_payments::payments::token_cache::{AccessToken, TokenSource};
use makazi_payments::payments::types::{
    CallbackPayload, CheckoutContext, CheckoutOutcome, CheckoutRequest, ProviderKind,
    RawProviderResponse, WebhookVerificationResult,
};
use makazi_payments::payments::{PaymentProviderFactory, ProviderRegistry};
use makazi_payments::services::checkout_initiator::RetryPolicy;
use makazi_payments::AppState;

pub const TENANT_ID: i64 = 7;
pub const PROPERTY_ID: i64 = 100;
pub const GOOD_SIGNATURE: &str = "good-signature";

/// One scripted reply from the provider's checkout endpoint.
#[derive(Debug, Clone)]
pub enum Step {
    Accept,
    Decline { http_status: u16, message: &'static str },
    Slow(Duration),
    /// The HTTP call times out before any response arrives.
    Timeout,
}

/// Replays [`Step`]s in order; an exhausted script keeps accepting.
#[derive(Default)]
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    msisdns: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn push(&self, step: Step) {
        self.steps.lock().unwrap().push_back(step);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn msisdns(&self) -> Vec<String> {
        self.msisdns.lock().unwrap().clone()
    }
}

fn accepted(request: &CheckoutRequest) -> RawProviderResponse {
    RawProviderResponse {
        http_status: 200,
        body: serde_json::json!({
            "success": true,
            "message": "Request in progress. You will receive a callback shortly",
            "transactionId": format!("AZ-{}", request.body["externalId"].as_str().unwrap_or("")),
        }),
    }
}

#[async_trait]
impl PaymentProvider for ScriptedProvider {
    fn code(&self) -> &str {
        "scripted"
    }

    fn build_checkout_request(&self, ctx: &CheckoutContext) -> PaymentResult<CheckoutRequest> {
        self.msisdns.lock().unwrap().push(ctx.msisdn.clone());
        Ok(CheckoutRequest {
            path: "/checkout".to_string(),
            body: serde_json::json!({
                "externalId": ctx.external_id,
                "accountNumber": ctx.msisdn,
                "amount": ctx.amount.to_string(),
                "provider": ctx.provider_channel,
            }),
        })
    }

    async fn submit_checkout(
        &self,
        _env: &ProviderEnv,
        _token: &Secret,
        request: &CheckoutRequest,
    ) -> PaymentResult<RawProviderResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            None | Some(Step::Accept) => Ok(accepted(request)),
            Some(Step::Timeout) => Err(PaymentError::ProviderTimeout {
                provider: "scripted".to_string(),
                message: "operation timed out".to_string(),
            }),
            Some(Step::Slow(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(accepted(request))
            }
            Some(Step::Decline {
                http_status,
                message,
            }) => Ok(RawProviderResponse {
                http_status,
                body: serde_json::json!({ "success": false, "message": message }),
            }),
        }
    }

    fn parse_checkout_response(&self, response: &RawProviderResponse) -> CheckoutOutcome {
        let message = response.body["message"].as_str().unwrap_or("").to_string();
        if response.body["success"].as_bool() == Some(true) {
            CheckoutOutcome::Accepted {
                provider_ref: response.body["transactionId"].as_str().map(str::to_string),
                message,
            }
        } else {
            CheckoutOutcome::Declined {
                code: Some(response.http_status.to_string()),
                message,
                retryable: response.http_status >= 500,
            }
        }
    }

    fn verify_callback_signature(
        &self,
        payload: &CallbackPayload,
        header_signature: Option<&str>,
    ) -> WebhookVerificationResult {
        let valid = payload.signature.as_deref().or(header_signature) == Some(GOOD_SIGNATURE);
        WebhookVerificationResult {
            valid,
            reason: (!valid).then(|| "signature mismatch".to_string()),
        }
    }
}

#[derive(Default)]
pub struct FixedTokenSource {
    fetches: AtomicUsize,
}

impl FixedTokenSource {
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenSource for FixedTokenSource {
    fn provider(&self) -> &str {
        "scripted"
    }

    async fn fetch_token(&self, _env: &ProviderEnv) -> PaymentResult<AccessToken> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(AccessToken {
            value: Secret::new("test-token"),
            expires_at: Utc::now() + ChronoDuration::hours(1),
        })
    }
}

pub fn complete_env() -> ProviderEnv {
    ProviderEnv::from_lookup(|key| {
        let value = match key {
            "AZAM_PAY_CLIENT_ID" => "client-id",
            "AZAM_PAY_CLIENT_SECRET" => "client-secret",
            "AZAM_PAY_API_KEY" => "api-key",
            "AZAM_PAY_APP_NAME" => "makazi",
            "AZAM_PAY_VENDOR" => "MAKAZI01",
            "BASE_URL" => "https://makazi.example",
            _ => return None,
        };
        Some(value.to_string())
    })
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        jitter: 0.0,
    }
}

pub struct Harness {
    pub store: Arc<InMemoryPaymentStore>,
    pub provider: Arc<ScriptedProvider>,
    pub tokens: Arc<FixedTokenSource>,
    pub state: AppState,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_env(complete_env()).await
    }

    pub async fn with_env(env: ProviderEnv) -> Self {
        let store = Arc::new(InMemoryPaymentStore::new());
        let provider = Arc::new(ScriptedProvider::default());
        let tokens = Arc::new(FixedTokenSource::default());

        let factory = PaymentProviderFactory::new(tokens.clone(), provider.clone())
            .with_adapter(ProviderKind::Bank, provider.clone());
        let dyn_store: Arc<dyn PaymentStore> = store.clone();
        let state = AppState::with_retry_policy(
            dyn_store,
            Arc::new(env),
            Arc::new(ProviderRegistry::builtin()),
            factory,
            GatewayConfig::default(),
            fast_retry(),
        );

        store
            .insert_user(UserRecord {
                id: TENANT_ID,
                username: "amina".to_string(),
                role: UserRole::Customer,
                phone: Some("0712345678".to_string()),
                profile_phone: None,
            })
            .await;
        store
            .insert_property(PropertyVisitTerms {
                property_id: PROPERTY_ID,
                visit_fee: BigDecimal::from(10000),
                currency: "TZS".to_string(),
                contact: PropertyContact {
                    name: Some("Juma".to_string()),
                    phone: Some("+255700000001".to_string()),
                    email: None,
                },
            })
            .await;

        Self {
            store,
            provider,
            tokens,
            state,
        }
    }

    pub async fn add_user(&self, id: i64, role: UserRole, phone: Option<&str>) {
        self.store
            .insert_user(UserRecord {
                id,
                username: format!("user{}", id),
                role,
                phone: phone.map(str::to_string),
                profile_phone: None,
            })
            .await;
    }

    pub async fn add_booking(&self, id: i64, customer_phone: Option<&str>) {
        self.store
            .insert_booking(BookingRecord {
                id,
                customer_phone: customer_phone.map(str::to_string),
                paid_at: None,
            })
            .await;
    }
}

pub fn callback_body(external_id: &str, amount: &str, status: &str) -> Vec<u8> {
    serde_json::json!({
        "externalId": external_id,
        "transactionId": format!("AZ-{}", external_id),
        "amount": amount,
        "status": status,
        "signature": GOOD_SIGNATURE,
    })
    .to_string()
    .into_bytes()
}
