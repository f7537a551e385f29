//! Per-provider access-token cache with single-flight refresh.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, info, warn};

use crate::payments::credentials::{ProviderEnv, Secret};
use crate::payments::error::PaymentResult;

pub const DEFAULT_EXPIRY_SKEW_SECS: i64 = 30;

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub value: Secret,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self, skew: Duration, now: DateTime<Utc>) -> bool {
        self.expires_at - skew > now
    }
}

/// Exchanges credentials for a bearer token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    fn provider(&self) -> &str;

    async fn fetch_token(&self, env: &ProviderEnv) -> PaymentResult<AccessToken>;
}

/// The outcome of one exchange, shared by every caller that waited on it.
type Flight = Arc<OnceCell<PaymentResult<AccessToken>>>;

pub struct TokenCache {
    entries: RwLock<HashMap<String, AccessToken>>,
    in_flight: Mutex<HashMap<String, Flight>>,
    skew: Duration,
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_EXPIRY_SKEW_SECS))
    }
}

impl TokenCache {
    pub fn new(skew: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            skew,
        }
    }

    fn cache_key(source: &dyn TokenSource, env: &ProviderEnv) -> String {
        format!("{}:{}", source.provider(), env.mode().as_str())
    }

    async fn cached(&self, key: &str) -> Option<AccessToken> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|token| token.is_fresh(self.skew, Utc::now()))
            .cloned()
    }

    async fn join_flight(&self, key: &str) -> Flight {
        let mut flights = self.in_flight.lock().await;
        flights
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    async fn retire_flight(&self, key: &str, flight: &Flight) {
        let mut flights = self.in_flight.lock().await;
        if flights.get(key).is_some_and(|current| Arc::ptr_eq(current, flight)) {
            flights.remove(key);
        }
    }

    /// Returns a valid token, running at most one exchange per provider at a
    /// time.
    ///
    /// Callers that arrive while an exchange is running receive its result,
    /// success or failure. A failure is never cached: the next caller after
    /// it settles starts a fresh exchange.
    pub async fn get_token(
        &self,
        source: &dyn TokenSource,
        env: &ProviderEnv,
    ) -> PaymentResult<Secret> {
        let key = Self::cache_key(source, env);
        if let Some(token) = self.cached(&key).await {
            return Ok(token.value);
        }

        let flight = self.join_flight(&key).await;
        let slot = key.as_str();
        let result = flight
            .get_or_init(|| async move {
                if let Some(token) = self.cached(slot).await {
                    debug!(provider = %source.provider(), "token refreshed by a concurrent caller");
                    return Ok(token);
                }
                match source.fetch_token(env).await {
                    Ok(token) => {
                        info!(
                            provider = %source.provider(),
                            mode = %env.mode().as_str(),
                            expires_at = %token.expires_at,
                            "access token refreshed"
                        );
                        self.entries.write().await.insert(slot.to_string(), token.clone());
                        Ok(token)
                    }
                    Err(e) => {
                        warn!(provider = %source.provider(), error = %e, "access token refresh failed");
                        Err(e)
                    }
                }
            })
            .await
            .clone();
        self.retire_flight(&key, &flight).await;

        result.map(|token| token.value)
    }

    /// Drops the cached token, e.g. after the provider answered 401.
    pub async fn invalidate(&self, source: &dyn TokenSource, env: &ProviderEnv) {
        let key = Self::cache_key(source, env);
        self.entries.write().await.remove(&key);
    }
}
