//! Read-only self-test of the AzamPay configuration.
//!
//! Reports which credentials are present (never their values), whether the
//! vendor account can be resolved and whether a token can be obtained.

use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::payments::credentials::{
    EnvironmentMode, ProviderEnv, ENV_API_KEY, ENV_CLIENT_ID, ENV_CLIENT_SECRET,
};
use crate::payments::token_cache::TokenSource;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TokenCheck {
    Ok,
    Failed { reason: String },
    Skipped { reason: String },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DiagnosticReport {
    pub mode: EnvironmentMode,
    pub summary: String,
    pub credentials_present: BTreeMap<String, bool>,
    pub vendor_account_resolvable: bool,
    pub token_acquisition: TokenCheck,
}

impl DiagnosticReport {
    pub fn is_healthy(&self) -> bool {
        self.exit_code() == 0
    }

    /// 1 missing credentials, 2 vendor unresolvable, 3 token failure.
    pub fn exit_code(&self) -> i32 {
        let missing_required = [ENV_CLIENT_ID, ENV_CLIENT_SECRET, ENV_API_KEY]
            .iter()
            .any(|key| !self.credentials_present.get(*key).copied().unwrap_or(false));
        if missing_required {
            1
        } else if !self.vendor_account_resolvable {
            2
        } else if !matches!(self.token_acquisition, TokenCheck::Ok) {
            3
        } else {
            0
        }
    }
}

fn vendor_code_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{2,64}$").ok())
        .as_ref()
}

pub fn vendor_account_resolvable(env: &ProviderEnv) -> bool {
    match (env.vendor_code.as_deref(), vendor_code_pattern()) {
        (Some(code), Some(pattern)) => pattern.is_match(code.trim()),
        _ => false,
    }
}

/// Runs the checks. The token exchange bypasses the cache so a stale token
/// cannot mask broken credentials.
pub async fn run_diagnostics(env: &ProviderEnv, tokens: &dyn TokenSource) -> DiagnosticReport {
    let credentials_present = env.credentials_present();
    let vendor_ok = vendor_account_resolvable(env);

    let token_acquisition = if !env.is_complete() {
        TokenCheck::Skipped {
            reason: format!("missing {}", env.missing_keys().join(", ")),
        }
    } else {
        match tokens.fetch_token(env).await {
            Ok(_) => TokenCheck::Ok,
            Err(e) => TokenCheck::Failed {
                reason: e.to_string(),
            },
        }
    };

    let report = DiagnosticReport {
        mode: env.mode(),
        summary: env.summary_line(),
        credentials_present,
        vendor_account_resolvable: vendor_ok,
        token_acquisition,
    };

    if report.is_healthy() {
        info!(summary = %report.summary, "payment diagnostics passed");
    } else {
        warn!(
            summary = %report.summary,
            exit_code = report.exit_code(),
            token = ?report.token_acquisition,
            "payment diagnostics found problems"
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::credentials::Secret;
    use crate::payments::error::{PaymentError, PaymentResult};
    use crate::payments::token_cache::AccessToken;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use std::collections::HashMap;

    struct FixedSource(bool);

    #[async_trait]
    impl TokenSource for FixedSource {
        fn provider(&self) -> &str {
            "azampay"
        }

        async fn fetch_token(&self, _env: &ProviderEnv) -> PaymentResult<AccessToken> {
            if self.0 {
                Ok(AccessToken {
                    value: Secret::new("tok"),
                    expires_at: Utc::now() + Duration::hours(1),
                })
            } else {
                Err(PaymentError::TokenAcquisitionFailed {
                    provider: "azampay".to_string(),
                    reason: "invalid client".to_string(),
                    http_status: Some(401),
                })
            }
        }
    }

    fn env(vars: &[(&str, &str)]) -> ProviderEnv {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ProviderEnv::from_lookup(|key| map.get(key).cloned())
    }

    fn full_env(vendor: &str) -> ProviderEnv {
        env(&[
            ("AZAM_PAY_CLIENT_ID", "id"),
            ("AZAM_PAY_CLIENT_SECRET", "s3cr3t-value"),
            ("AZAM_PAY_API_KEY", "k3y-value"),
            ("AZAM_PAY_APP_NAME", "Makazi"),
            ("AZAM_PAY_VENDOR", vendor),
        ])
    }

    #[tokio::test]
    async fn healthy_configuration_exits_zero() {
        let report = run_diagnostics(&full_env("MAKAZI01"), &FixedSource(true)).await;
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.token_acquisition, TokenCheck::Ok);
        assert_eq!(report.credentials_present.get("AZAM_PAY_API_KEY"), Some(&true));
        assert_eq!(report.credentials_present.get("BASE_URL"), Some(&false));
    }

    #[tokio::test]
    async fn missing_credentials_take_precedence() {
        let report = run_diagnostics(&env(&[]), &FixedSource(true)).await;
        assert_eq!(report.exit_code(), 1);
        assert!(matches!(report.token_acquisition, TokenCheck::Skipped { .. }));
    }

    #[tokio::test]
    async fn malformed_vendor_exits_two() {
        let report = run_diagnostics(&full_env("bad vendor!"), &FixedSource(true)).await;
        assert_eq!(report.exit_code(), 2);
    }

    #[tokio::test]
    async fn token_failure_exits_three_without_leaking_secrets() {
        let report = run_diagnostics(&full_env("MAKAZI01"), &FixedSource(false)).await;
        assert_eq!(report.exit_code(), 3);
        let json = serde_json::to_string(&report).unwrap();
        assert!(!json.contains("s3cr3t-value"));
        assert!(!json.contains("k3y-value"));
    }
}
