//! JSON HTTP surface.

pub mod callbacks;
pub mod diagnostics;
pub mod health;
pub mod notifications;
pub mod visits;

use axum::{
    extract::FromRequestParts,
    http::request::Parts,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};

use crate::config::GatewayConfig;
use crate::database::repository::PaymentStore;
use crate::error::AppError;
use crate::health::HealthChecker;
use crate::middleware::error::get_request_id_from_headers;
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::payments::credentials::{ProviderEnv, CALLBACK_PATH};
use crate::payments::factory::PaymentProviderFactory;
use crate::payments::registry::ProviderRegistry;
use crate::payments::token_cache::TokenCache;
use crate::services::callback_reconciler::CallbackReconciler;
use crate::services::checkout_initiator::{CheckoutInitiator, RetryPolicy};
use crate::services::domain_events::DomainEventHook;
use crate::services::visit_payment::VisitPaymentService;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PaymentStore>,
    pub env: Arc<ProviderEnv>,
    pub providers: PaymentProviderFactory,
    pub initiator: Arc<CheckoutInitiator>,
    pub reconciler: Arc<CallbackReconciler>,
    pub visits: Arc<VisitPaymentService>,
    pub health: HealthChecker,
    pub gateway: GatewayConfig,
}

impl AppState {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        env: Arc<ProviderEnv>,
        registry: Arc<ProviderRegistry>,
        providers: PaymentProviderFactory,
        gateway: GatewayConfig,
    ) -> Self {
        let retry = RetryPolicy::with_max_retries(gateway.checkout_max_retries);
        Self::with_retry_policy(store, env, registry, providers, gateway, retry)
    }

    pub fn with_retry_policy(
        store: Arc<dyn PaymentStore>,
        env: Arc<ProviderEnv>,
        registry: Arc<ProviderRegistry>,
        providers: PaymentProviderFactory,
        gateway: GatewayConfig,
        retry: RetryPolicy,
    ) -> Self {
        let hook = DomainEventHook::default();
        let tokens = Arc::new(TokenCache::default());
        let initiator = Arc::new(CheckoutInitiator::new(
            store.clone(),
            registry,
            providers.clone(),
            tokens,
            env.clone(),
            hook.clone(),
            retry.clone(),
        ));
        let reconciler = Arc::new(CallbackReconciler::new(
            store.clone(),
            providers.clone(),
            hook,
            retry.max_retries,
        ));
        let visits = Arc::new(VisitPaymentService::new(store.clone(), initiator.clone()));
        let health = HealthChecker::new(store.clone(), env.clone());

        Self {
            store,
            env,
            providers,
            initiator,
            reconciler,
            visits,
            health,
            gateway,
        }
    }
}

/// Calling user, as set by the authentication layer in `x-user-id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerId(pub i64);

impl<S> FromRequestParts<S> for CallerId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let request_id = get_request_id_from_headers(&parts.headers);
        let with_id = |err: AppError| match &request_id {
            Some(id) => err.with_request_id(id.clone()),
            None => err,
        };

        let raw = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| with_id(AppError::unauthenticated()))?;
        raw.trim()
            .parse::<i64>()
            .map(CallerId)
            .map_err(|_| with_id(AppError::unauthenticated()))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        .route("/health/live", get(health::liveness))
        .route(
            "/api/v1/properties/{id}/visit/status/",
            get(visits::visit_status),
        )
        .route(
            "/api/v1/properties/{id}/visit/initiate/",
            post(visits::initiate_visit_payment),
        )
        .route(
            "/api/v1/properties/{id}/visit/verify/",
            post(visits::verify_visit_payment),
        )
        .route(CALLBACK_PATH, post(callbacks::azampay_callback))
        .route(
            "/api/v1/payments/diagnostics",
            get(diagnostics::payment_diagnostics),
        )
        .route(
            "/api/v1/payments/providers",
            get(diagnostics::list_providers),
        )
        .route(
            "/api/v1/notifications/",
            get(notifications::list_notifications),
        )
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}
