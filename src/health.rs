//! Health check module
//! Reports store reachability and payment credential completeness.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::database::repository::PaymentStore;
use crate::payments::credentials::ProviderEnv;

#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

#[derive(Clone)]
pub struct HealthChecker {
    store: Arc<dyn PaymentStore>,
    env: Arc<ProviderEnv>,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn PaymentStore>, env: Arc<ProviderEnv>) -> Self {
        Self { store, env }
    }

    /// A down store makes the service unhealthy; missing provider
    /// credentials only degrade it.
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();
        let mut store_up = true;

        let start = Instant::now();
        match timeout(Duration::from_secs(5), self.store.ping()).await {
            Ok(Ok(())) => {
                let elapsed = start.elapsed().as_millis();
                health_status
                    .checks
                    .insert("database".to_string(), ComponentHealth::up(Some(elapsed)));
                info!("Database health check: OK ({}ms)", elapsed);
            }
            Ok(Err(e)) => {
                store_up = false;
                health_status.checks.insert(
                    "database".to_string(),
                    ComponentHealth::down(Some(e.to_string())),
                );
                error!("Database health check failed: {}", e);
            }
            Err(_) => {
                store_up = false;
                health_status.checks.insert(
                    "database".to_string(),
                    ComponentHealth::down(Some("Timeout".to_string())),
                );
                error!("Database health check timed out");
            }
        }

        let missing = self.env.missing_keys();
        let credentials_ok = missing.is_empty();
        if credentials_ok {
            health_status
                .checks
                .insert("payment_credentials".to_string(), ComponentHealth::up(None));
        } else {
            health_status.checks.insert(
                "payment_credentials".to_string(),
                ComponentHealth::warning(None, Some(format!("missing {}", missing.join(", ")))),
            );
            warn!(missing = ?missing, "Payment credentials incomplete");
        }

        health_status.status = match (store_up, credentials_ok) {
            (false, _) => HealthState::Unhealthy,
            (true, false) => HealthState::Degraded,
            (true, true) => HealthState::Healthy,
        };

        health_status
    }
}
