use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::RawProviderResponse;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::Value as JsonValue;
use sha2::Sha256;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

type HmacSha256 = Hmac<Sha256>;

/// Thin JSON-over-HTTP client for provider calls.
///
/// Never retries on its own; the checkout initiator owns the retry policy so
/// that every attempt is recorded as a transaction.
#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    provider: String,
}

impl PaymentHttpClient {
    /// `read_timeout` bounds each wait for response data, not the whole
    /// exchange.
    pub fn new(provider: &str, connect_timeout: Duration, read_timeout: Duration) -> PaymentResult<Self> {
        let builder = Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout);
        Self::build(provider, builder)
    }

    /// One deadline for the whole exchange, connect included.
    pub fn with_total_timeout(provider: &str, total: Duration) -> PaymentResult<Self> {
        let builder = Client::builder().connect_timeout(total).timeout(total);
        Self::build(provider, builder)
    }

    fn build(provider: &str, builder: reqwest::ClientBuilder) -> PaymentResult<Self> {
        let client = builder.build().map_err(|e| PaymentError::NetworkError {
            message: format!("failed to initialize HTTP client: {}", e),
        })?;

        Ok(Self {
            client,
            provider: provider.to_string(),
        })
    }

    pub fn with_defaults(provider: &str) -> PaymentResult<Self> {
        Self::new(provider, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT)
    }

    /// POSTs `body` and returns the status with the decoded body. Non-2xx
    /// responses are returned, not raised; only transport failures error.
    pub async fn post_json(
        &self,
        url: &str,
        bearer_token: Option<&str>,
        body: &JsonValue,
        additional_headers: &[(&str, &str)],
    ) -> PaymentResult<RawProviderResponse> {
        let mut request = self.client.post(url).json(body);
        if let Some(token) = bearer_token {
            request = request.bearer_auth(token);
        }
        for (k, v) in additional_headers {
            request = request.header(*k, *v);
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| self.transport_error(e))?;
        debug!(provider = %self.provider, url = %url, status, "provider responded");

        Ok(RawProviderResponse {
            http_status: status,
            body: decode_body(&text),
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> PaymentError {
        if err.is_timeout() {
            PaymentError::ProviderTimeout {
                provider: self.provider.clone(),
                message: err.to_string(),
            }
        } else {
            PaymentError::NetworkError {
                message: format!("{} request failed: {}", self.provider, err),
            }
        }
    }
}

/// Providers occasionally answer with plain text; keep it under `raw`.
fn decode_body(text: &str) -> JsonValue {
    if text.trim().is_empty() {
        return JsonValue::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| serde_json::json!({ "raw": text }))
}

pub fn sign_hmac_sha256_hex(payload: &[u8], secret: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}

pub fn verify_hmac_sha256_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    match sign_hmac_sha256_hex(payload, secret) {
        Some(computed) => secure_eq(
            computed.as_bytes(),
            signature.trim().to_lowercase().as_bytes(),
        ),
        None => false,
    }
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_eq_behaves_correctly() {
        assert!(secure_eq(b"abc", b"abc"));
        assert!(!secure_eq(b"abc", b"abd"));
        assert!(!secure_eq(b"abc", b"ab"));
    }

    #[test]
    fn hmac_signature_round_trip_and_tamper() {
        let payload = b"42-abc|REF1|10000|success";
        let signature = sign_hmac_sha256_hex(payload, "secret").unwrap();
        assert!(verify_hmac_sha256_hex(payload, "secret", &signature));
        assert!(verify_hmac_sha256_hex(payload, "secret", &signature.to_uppercase()));
        assert!(!verify_hmac_sha256_hex(b"42-abc|REF1|9000|success", "secret", &signature));
        assert!(!verify_hmac_sha256_hex(payload, "other", &signature));
    }

    #[test]
    fn non_json_bodies_are_preserved() {
        assert_eq!(decode_body(""), JsonValue::Null);
        assert_eq!(decode_body("Bad Gateway"), serde_json::json!({"raw": "Bad Gateway"}));
        assert_eq!(decode_body(r#"{"success":true}"#), serde_json::json!({"success": true}));
    }
}
