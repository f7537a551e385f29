use crate::payments::credentials::{ProviderEnv, Secret};
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::signature::CallbackVerifier;
use crate::payments::token_cache::{AccessToken, TokenSource};
use crate::payments::types::{
    CallbackPayload, CheckoutContext, CheckoutOutcome, CheckoutRequest, RawProviderResponse,
    WebhookVerificationResult,
};
use crate::payments::utils::PaymentHttpClient;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{info, warn};

pub const TOKEN_PATH: &str = "/AppRegistration/GenerateToken";
pub const MNO_CHECKOUT_PATH: &str = "/azampay/mno/checkout";
pub const BANK_CHECKOUT_PATH: &str = "/azampay/bank/checkout";

const PROVIDER_NAME: &str = "azampay";
const TOKEN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);
const FALLBACK_TOKEN_LIFETIME_SECS: i64 = 3600;

#[derive(Debug, Deserialize)]
struct TokenEnvelope {
    data: Option<TokenData>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenData {
    #[serde(rename = "accessToken")]
    access_token: Option<String>,
    #[serde(default)]
    expire: Option<String>,
}

/// Client-credentials exchange against the AzamPay authenticator.
pub struct AzamPayTokenSource {
    http: PaymentHttpClient,
}

impl AzamPayTokenSource {
    pub fn new() -> PaymentResult<Self> {
        Ok(Self {
            http: PaymentHttpClient::with_total_timeout(PROVIDER_NAME, TOKEN_TIMEOUT)?,
        })
    }

    fn failure(reason: impl Into<String>, http_status: Option<u16>) -> PaymentError {
        PaymentError::TokenAcquisitionFailed {
            provider: PROVIDER_NAME.to_string(),
            reason: reason.into(),
            http_status,
        }
    }
}

#[async_trait]
impl TokenSource for AzamPayTokenSource {
    fn provider(&self) -> &str {
        PROVIDER_NAME
    }

    async fn fetch_token(&self, env: &ProviderEnv) -> PaymentResult<AccessToken> {
        let credentials = env.credentials()?;
        let body = serde_json::json!({
            "appName": credentials.app_name,
            "clientId": credentials.client_id.expose(),
            "clientSecret": credentials.client_secret.expose(),
        });
        let url = format!("{}{}", env.auth_base_url, TOKEN_PATH);

        let response = self
            .http
            .post_json(&url, None, &body, &[])
            .await
            .map_err(|e| Self::failure(e.to_string(), None))?;

        if !(200..300).contains(&response.http_status) {
            let reason = response_message(&response.body)
                .unwrap_or_else(|| format!("HTTP {}", response.http_status));
            return Err(Self::failure(reason, Some(response.http_status)));
        }

        let envelope: TokenEnvelope = serde_json::from_value(response.body.clone())
            .map_err(|e| Self::failure(format!("invalid token response: {}", e), None))?;
        let data = envelope.data.ok_or_else(|| {
            Self::failure(
                envelope
                    .message
                    .unwrap_or_else(|| "token response has no data".to_string()),
                Some(response.http_status),
            )
        })?;
        let token = data
            .access_token
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| Self::failure("token response has no accessToken", None))?;

        Ok(AccessToken {
            value: Secret::new(token),
            expires_at: parse_expiry(data.expire.as_deref()),
        })
    }
}

/// `expire` is an ISO timestamp; anything unparseable gets a one hour lease.
fn parse_expiry(raw: Option<&str>) -> DateTime<Utc> {
    let fallback = || Utc::now() + Duration::seconds(FALLBACK_TOKEN_LIFETIME_SECS);
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return fallback();
    };
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return parsed.with_timezone(&Utc);
    }
    match NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        Ok(naive) => naive.and_utc(),
        Err(_) => {
            warn!(expire = %raw, "unrecognized token expiry, assuming one hour");
            fallback()
        }
    }
}

fn response_message(body: &JsonValue) -> Option<String> {
    ["message", "msg", "raw"]
        .iter()
        .find_map(|key| body.get(*key).and_then(JsonValue::as_str))
        .map(str::to_string)
}

fn additional_properties(ctx: &CheckoutContext) -> JsonValue {
    let mut props = serde_json::Map::new();
    if let Some(extra) = ctx.metadata.get("additionalProperties").and_then(JsonValue::as_object) {
        props.extend(extra.clone());
    }
    props.insert("appName".to_string(), JsonValue::String(ctx.app_name.clone()));
    props.insert("vendor".to_string(), JsonValue::String(ctx.vendor_code.clone()));
    JsonValue::Object(props)
}

async fn submit(
    http: &PaymentHttpClient,
    env: &ProviderEnv,
    token: &Secret,
    request: &CheckoutRequest,
) -> PaymentResult<RawProviderResponse> {
    let credentials = env.credentials()?;
    let url = format!("{}{}", env.checkout_base_url, request.path);
    http.post_json(
        &url,
        Some(token.expose()),
        &request.body,
        &[("X-API-Key", credentials.api_key.expose())],
    )
    .await
}

/// 2xx with `success: true` is an acceptance; 429 and 5xx may be retried.
fn parse_response(response: &RawProviderResponse) -> CheckoutOutcome {
    let status = response.http_status;
    let message = response_message(&response.body).unwrap_or_else(|| format!("HTTP {}", status));
    let success = response
        .body
        .get("success")
        .and_then(JsonValue::as_bool)
        .unwrap_or(false);

    if (200..300).contains(&status) && success {
        let provider_ref = response
            .body
            .get("transactionId")
            .and_then(|v| match v {
                JsonValue::String(s) => Some(s.clone()),
                JsonValue::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.trim().is_empty());
        return CheckoutOutcome::Accepted {
            provider_ref,
            message,
        };
    }

    CheckoutOutcome::Declined {
        code: Some(status.to_string()),
        message,
        retryable: status == 429 || status >= 500,
    }
}

/// Mobile-network-operator push checkout.
pub struct AzamPayMnoProvider {
    http: PaymentHttpClient,
    verifier: Arc<dyn CallbackVerifier>,
}

impl AzamPayMnoProvider {
    pub fn new(verifier: Arc<dyn CallbackVerifier>) -> PaymentResult<Self> {
        Ok(Self {
            http: PaymentHttpClient::with_defaults(PROVIDER_NAME)?,
            verifier,
        })
    }
}

#[async_trait]
impl PaymentProvider for AzamPayMnoProvider {
    fn code(&self) -> &str {
        "azampay_mno"
    }

    fn build_checkout_request(&self, ctx: &CheckoutContext) -> PaymentResult<CheckoutRequest> {
        Ok(CheckoutRequest {
            path: MNO_CHECKOUT_PATH.to_string(),
            body: serde_json::json!({
                "accountNumber": ctx.msisdn,
                "amount": ctx.amount.to_string(),
                "currency": ctx.currency,
                "externalId": ctx.external_id,
                "provider": ctx.provider_channel,
                "additionalProperties": additional_properties(ctx),
            }),
        })
    }

    async fn submit_checkout(
        &self,
        env: &ProviderEnv,
        token: &Secret,
        request: &CheckoutRequest,
    ) -> PaymentResult<RawProviderResponse> {
        info!(path = %request.path, mode = %env.mode().as_str(), "submitting azampay mno checkout");
        submit(&self.http, env, token, request).await
    }

    fn parse_checkout_response(&self, response: &RawProviderResponse) -> CheckoutOutcome {
        parse_response(response)
    }

    fn verify_callback_signature(
        &self,
        payload: &CallbackPayload,
        header_signature: Option<&str>,
    ) -> WebhookVerificationResult {
        self.verifier.verify(payload, header_signature)
    }
}

/// Bank checkout; the merchant account and OTP come from checkout metadata.
pub struct AzamPayBankProvider {
    http: PaymentHttpClient,
    verifier: Arc<dyn CallbackVerifier>,
}

impl AzamPayBankProvider {
    pub fn new(verifier: Arc<dyn CallbackVerifier>) -> PaymentResult<Self> {
        Ok(Self {
            http: PaymentHttpClient::with_defaults(PROVIDER_NAME)?,
            verifier,
        })
    }

    fn required_metadata(ctx: &CheckoutContext, key: &str) -> PaymentResult<String> {
        ctx.metadata
            .get(key)
            .and_then(JsonValue::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or_else(|| PaymentError::ValidationError {
                message: format!("{} is required for bank checkout", key),
                field: Some(key.to_string()),
            })
    }
}

#[async_trait]
impl PaymentProvider for AzamPayBankProvider {
    fn code(&self) -> &str {
        "azampay_bank"
    }

    fn build_checkout_request(&self, ctx: &CheckoutContext) -> PaymentResult<CheckoutRequest> {
        let account_number = Self::required_metadata(ctx, "account_number")?;
        let otp = Self::required_metadata(ctx, "otp")?;
        let merchant_name = ctx
            .metadata
            .get("merchant_name")
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| ctx.app_name.clone());

        Ok(CheckoutRequest {
            path: BANK_CHECKOUT_PATH.to_string(),
            body: serde_json::json!({
                "amount": ctx.amount.to_string(),
                "currencyCode": ctx.currency,
                "merchantAccountNumber": account_number,
                "merchantMobileNumber": ctx.msisdn,
                "merchantName": merchant_name,
                "otp": otp,
                "provider": ctx.provider_channel,
                "referenceId": ctx.external_id,
                "additionalProperties": additional_properties(ctx),
            }),
        })
    }

    async fn submit_checkout(
        &self,
        env: &ProviderEnv,
        token: &Secret,
        request: &CheckoutRequest,
    ) -> PaymentResult<RawProviderResponse> {
        info!(path = %request.path, mode = %env.mode().as_str(), "submitting azampay bank checkout");
        submit(&self.http, env, token, request).await
    }

    fn parse_checkout_response(&self, response: &RawProviderResponse) -> CheckoutOutcome {
        parse_response(response)
    }

    fn verify_callback_signature(
        &self,
        payload: &CallbackPayload,
        header_signature: Option<&str>,
    ) -> WebhookVerificationResult {
        self.verifier.verify(payload, header_signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::signature::SharedSecretVerifier;
    use bigdecimal::BigDecimal;

    fn ctx(metadata: JsonValue) -> CheckoutContext {
        CheckoutContext {
            external_id: "42-a1b2c3d4e5".to_string(),
            msisdn: "+255712345678".to_string(),
            amount: BigDecimal::from(10000),
            currency: "TZS".to_string(),
            provider_channel: "Airtel".to_string(),
            app_name: "makazi".to_string(),
            vendor_code: "VENDOR1".to_string(),
            metadata,
        }
    }

    fn verifier() -> Arc<dyn CallbackVerifier> {
        Arc::new(SharedSecretVerifier::new(Secret::new("s")))
    }

    #[test]
    fn mno_request_carries_checkout_fields() {
        let provider = AzamPayMnoProvider::new(verifier()).unwrap();
        let request = provider
            .build_checkout_request(&ctx(serde_json::json!({})))
            .unwrap();
        assert_eq!(request.path, MNO_CHECKOUT_PATH);
        assert_eq!(request.body["accountNumber"], "+255712345678");
        assert_eq!(request.body["amount"], "10000");
        assert_eq!(request.body["externalId"], "42-a1b2c3d4e5");
        assert_eq!(request.body["provider"], "Airtel");
        assert_eq!(request.body["additionalProperties"]["vendor"], "VENDOR1");
    }

    #[test]
    fn bank_request_requires_account_and_otp() {
        let provider = AzamPayBankProvider::new(verifier()).unwrap();
        let err = provider
            .build_checkout_request(&ctx(serde_json::json!({"otp": "1234"})))
            .expect_err("account number missing");
        assert_eq!(err.field(), Some("account_number"));

        let request = provider
            .build_checkout_request(&ctx(
                serde_json::json!({"account_number": "0150000000", "otp": "1234"}),
            ))
            .unwrap();
        assert_eq!(request.path, BANK_CHECKOUT_PATH);
        assert_eq!(request.body["merchantAccountNumber"], "0150000000");
        assert_eq!(request.body["referenceId"], "42-a1b2c3d4e5");
        assert_eq!(request.body["merchantName"], "makazi");
    }

    #[test]
    fn response_parsing_distinguishes_accept_and_decline() {
        let accepted = parse_response(&RawProviderResponse {
            http_status: 200,
            body: serde_json::json!({"success": true, "message": "Request in progress", "transactionId": "ABC"}),
        });
        assert_eq!(
            accepted,
            CheckoutOutcome::Accepted {
                provider_ref: Some("ABC".to_string()),
                message: "Request in progress".to_string()
            }
        );

        let declined = parse_response(&RawProviderResponse {
            http_status: 200,
            body: serde_json::json!({"success": false, "message": "Invalid msisdn"}),
        });
        assert!(matches!(
            declined,
            CheckoutOutcome::Declined { retryable: false, ref message, .. } if message == "Invalid msisdn"
        ));

        let unavailable = parse_response(&RawProviderResponse {
            http_status: 503,
            body: serde_json::json!({"raw": "Service Unavailable"}),
        });
        assert!(matches!(unavailable, CheckoutOutcome::Declined { retryable: true, .. }));
    }

    #[test]
    fn expiry_parsing_falls_back_to_one_hour() {
        let parsed = parse_expiry(Some("2030-01-01T00:00:00Z"));
        assert_eq!(parsed.to_rfc3339(), "2030-01-01T00:00:00+00:00");
        let naive = parse_expiry(Some("2030-01-01T10:30:00.000"));
        assert_eq!(naive.to_rfc3339(), "2030-01-01T10:30:00+00:00");

        let fallback = parse_expiry(Some("tomorrow"));
        let remaining = fallback - Utc::now();
        assert!(remaining > Duration::minutes(59) && remaining <= Duration::hours(1));
    }
}
