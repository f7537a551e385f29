//! AzamPay credentials and sandbox/production endpoint selection.
//!
//! Loading never fails: missing secrets are reported through
//! [`ProviderEnv::missing_keys`] and only become an error when a caller asks
//! for usable credentials.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

use crate::payments::error::{PaymentError, PaymentResult};

pub const SANDBOX_CHECKOUT_URL: &str = "https://sandbox.azampay.co.tz";
pub const SANDBOX_AUTH_URL: &str = "https://authenticator-sandbox.azampay.co.tz";
pub const PRODUCTION_CHECKOUT_URL: &str = "https://checkout.azampay.co.tz";
pub const PRODUCTION_AUTH_URL: &str = "https://authenticator.azampay.co.tz";

pub const ENV_CLIENT_ID: &str = "AZAM_PAY_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "AZAM_PAY_CLIENT_SECRET";
pub const ENV_API_KEY: &str = "AZAM_PAY_API_KEY";
pub const ENV_APP_NAME: &str = "AZAM_PAY_APP_NAME";
pub const ENV_VENDOR: &str = "AZAM_PAY_VENDOR";
pub const ENV_SANDBOX: &str = "AZAM_PAY_SANDBOX";
pub const ENV_BASE_URL: &str = "BASE_URL";

/// Path of the inbound callback, relative to `BASE_URL`.
pub const CALLBACK_PATH: &str = "/payments/callback/azampay/";

/// A secret value whose `Debug`/`Display` never reveal the contents.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentMode {
    Sandbox,
    Production,
}

impl EnvironmentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentMode::Sandbox => "sandbox",
            EnvironmentMode::Production => "production",
        }
    }
}

/// Usable credentials, only obtainable when all required keys are present.
#[derive(Debug, Clone)]
pub struct AzamPayCredentials {
    pub client_id: Secret,
    pub client_secret: Secret,
    pub api_key: Secret,
    pub app_name: String,
    pub vendor_code: String,
}

#[derive(Debug, Clone)]
pub struct ProviderEnv {
    pub sandbox: bool,
    pub checkout_base_url: String,
    pub auth_base_url: String,
    pub client_id: Option<Secret>,
    pub client_secret: Option<Secret>,
    pub api_key: Option<Secret>,
    pub app_name: Option<String>,
    pub vendor_code: Option<String>,
    pub callback_base_url: Option<String>,
}

impl ProviderEnv {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let sandbox = match non_empty(ENV_SANDBOX) {
            None => true,
            Some(raw) => parse_flag(&raw).unwrap_or_else(|| {
                warn!(value = %raw, "Unrecognized AZAM_PAY_SANDBOX value, defaulting to sandbox");
                true
            }),
        };
        let (checkout_base_url, auth_base_url) = if sandbox {
            (SANDBOX_CHECKOUT_URL, SANDBOX_AUTH_URL)
        } else {
            (PRODUCTION_CHECKOUT_URL, PRODUCTION_AUTH_URL)
        };

        Self {
            sandbox,
            checkout_base_url: checkout_base_url.to_string(),
            auth_base_url: auth_base_url.to_string(),
            client_id: non_empty(ENV_CLIENT_ID).map(Secret::new),
            client_secret: non_empty(ENV_CLIENT_SECRET).map(Secret::new),
            api_key: non_empty(ENV_API_KEY).map(Secret::new),
            app_name: non_empty(ENV_APP_NAME),
            vendor_code: non_empty(ENV_VENDOR),
            callback_base_url: non_empty(ENV_BASE_URL).map(|v| v.trim_end_matches('/').to_string()),
        }
    }

    /// Points the adapter at different hosts. Used by tests against a local
    /// mock server; production hosts are never read from the environment.
    pub fn with_endpoints(mut self, checkout_base_url: &str, auth_base_url: &str) -> Self {
        self.checkout_base_url = checkout_base_url.trim_end_matches('/').to_string();
        self.auth_base_url = auth_base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn mode(&self) -> EnvironmentMode {
        if self.sandbox {
            EnvironmentMode::Sandbox
        } else {
            EnvironmentMode::Production
        }
    }

    /// Required keys that are absent.
    pub fn missing_keys(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.client_id.is_none() {
            missing.push(ENV_CLIENT_ID);
        }
        if self.client_secret.is_none() {
            missing.push(ENV_CLIENT_SECRET);
        }
        if self.api_key.is_none() {
            missing.push(ENV_API_KEY);
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_keys().is_empty()
    }

    /// Presence of every configuration key, never the values.
    pub fn credentials_present(&self) -> BTreeMap<String, bool> {
        let mut present = BTreeMap::new();
        present.insert(ENV_CLIENT_ID.to_string(), self.client_id.is_some());
        present.insert(ENV_CLIENT_SECRET.to_string(), self.client_secret.is_some());
        present.insert(ENV_API_KEY.to_string(), self.api_key.is_some());
        present.insert(ENV_APP_NAME.to_string(), self.app_name.is_some());
        present.insert(ENV_VENDOR.to_string(), self.vendor_code.is_some());
        present.insert(ENV_BASE_URL.to_string(), self.callback_base_url.is_some());
        present
    }

    pub fn credentials(&self) -> PaymentResult<AzamPayCredentials> {
        match (&self.client_id, &self.client_secret, &self.api_key) {
            (Some(client_id), Some(client_secret), Some(api_key)) => Ok(AzamPayCredentials {
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
                api_key: api_key.clone(),
                app_name: self.app_name.clone().unwrap_or_default(),
                vendor_code: self.vendor_code.clone().unwrap_or_default(),
            }),
            _ => Err(PaymentError::MissingCredential {
                keys: self.missing_keys().iter().map(|k| k.to_string()).collect(),
            }),
        }
    }

    pub fn callback_url(&self) -> Option<String> {
        self.callback_base_url
            .as_ref()
            .map(|base| format!("{}{}", base, CALLBACK_PATH))
    }

    /// One-line summary for health checks and start-up logs.
    pub fn summary_line(&self) -> String {
        let flag = |set: bool| if set { "set" } else { "missing" };
        format!(
            "azampay mode={} client_id={} client_secret={} api_key={} app_name={} vendor={}",
            self.mode().as_str(),
            flag(self.client_id.is_some()),
            flag(self.client_secret.is_some()),
            flag(self.api_key.is_some()),
            flag(self.app_name.is_some()),
            self.vendor_code.as_deref().unwrap_or("missing"),
        )
    }
}

/// Parses truthy/falsey configuration strings.
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> ProviderEnv {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ProviderEnv::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn sandbox_flag_selects_compiled_hosts() {
        let sandbox = env_from(&[(ENV_SANDBOX, "true")]);
        assert_eq!(sandbox.checkout_base_url, SANDBOX_CHECKOUT_URL);
        assert_eq!(sandbox.auth_base_url, SANDBOX_AUTH_URL);

        let production = env_from(&[(ENV_SANDBOX, "false")]);
        assert_eq!(production.mode(), EnvironmentMode::Production);
        assert_eq!(production.checkout_base_url, PRODUCTION_CHECKOUT_URL);
        assert_eq!(production.auth_base_url, PRODUCTION_AUTH_URL);
    }

    #[test]
    fn missing_keys_are_reported_not_raised() {
        let env = env_from(&[(ENV_CLIENT_ID, "id"), (ENV_API_KEY, "  ")]);
        assert_eq!(env.missing_keys(), vec![ENV_CLIENT_SECRET, ENV_API_KEY]);
        let err = env.credentials().expect_err("incomplete credentials");
        assert!(matches!(err, PaymentError::MissingCredential { ref keys } if keys.len() == 2));
    }

    #[test]
    fn summary_line_never_contains_secrets() {
        let env = env_from(&[
            (ENV_CLIENT_ID, "client-123"),
            (ENV_CLIENT_SECRET, "very-secret"),
            (ENV_API_KEY, "key-456"),
            (ENV_VENDOR, "MAKAZI"),
            (ENV_SANDBOX, "0"),
        ]);
        let line = env.summary_line();
        assert_eq!(
            line,
            "azampay mode=production client_id=set client_secret=set api_key=set app_name=missing vendor=MAKAZI"
        );
        assert!(!format!("{:?}", env).contains("very-secret"));
    }

    #[test]
    fn callback_url_is_built_from_base_url() {
        let env = env_from(&[(ENV_BASE_URL, "https://makazi.example/")]);
        assert_eq!(
            env.callback_url().as_deref(),
            Some("https://makazi.example/payments/callback/azampay/")
        );
    }

    #[test]
    fn flag_parsing() {
        assert_eq!(parse_flag("Yes"), Some(true));
        assert_eq!(parse_flag("off"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
