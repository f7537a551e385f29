use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::state::CallbackOutcome;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Gateway,
    Bank,
    MobileMoney,
    Other,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Gateway => "gateway",
            ProviderKind::Bank => "bank",
            ProviderKind::MobileMoney => "mobile_money",
            ProviderKind::Other => "other",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gateway" => Ok(ProviderKind::Gateway),
            "bank" => Ok(ProviderKind::Bank),
            "mobile_money" | "mobilemoney" | "mno" => Ok(ProviderKind::MobileMoney),
            "other" => Ok(ProviderKind::Other),
            other => Err(PaymentError::ValidationError {
                message: format!("unknown provider type '{}'", other),
                field: Some("provider_type".to_string()),
            }),
        }
    }
}

/// Catalogue entry for a payment provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderRecord {
    pub code: String,
    pub display_name: String,
    pub kind: ProviderKind,
    pub is_active: bool,
    pub fee_percent: BigDecimal,
}

/// Everything an adapter needs to build one checkout request.
#[derive(Debug, Clone)]
pub struct CheckoutContext {
    pub external_id: String,
    pub msisdn: String,
    pub amount: BigDecimal,
    pub currency: String,
    /// Channel name the provider expects, e.g. `Airtel` or `CRDB`.
    pub provider_channel: String,
    pub app_name: String,
    pub vendor_code: String,
    pub metadata: JsonValue,
}

/// Provider-specific request ready to be POSTed.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutRequest {
    pub path: String,
    pub body: JsonValue,
}

/// Raw synchronous reply from the provider's checkout endpoint.
#[derive(Debug, Clone)]
pub struct RawProviderResponse {
    pub http_status: u16,
    pub body: JsonValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckoutOutcome {
    /// Provider accepted the push; confirmation arrives by callback.
    Accepted {
        provider_ref: Option<String>,
        message: String,
    },
    Declined {
        code: Option<String>,
        message: String,
        retryable: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookVerificationResult {
    pub valid: bool,
    pub reason: Option<String>,
}

/// Normalized provider callback.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackPayload {
    pub external_id: String,
    pub provider_ref: Option<String>,
    pub status: String,
    pub outcome: CallbackOutcome,
    pub amount: BigDecimal,
    pub amount_raw: String,
    pub currency: Option<String>,
    pub signature: Option<String>,
    pub message: Option<String>,
    pub raw: JsonValue,
}

#[derive(Debug, Deserialize)]
struct RawCallbackBody {
    #[serde(rename = "externalId", default)]
    external_id: Option<String>,
    #[serde(default)]
    utilityref: Option<String>,
    #[serde(rename = "transactionId", default)]
    transaction_id: Option<String>,
    #[serde(default)]
    reference: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    transactionstatus: Option<String>,
    #[serde(default)]
    amount: Option<JsonValue>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    signature: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl CallbackPayload {
    /// Parses the AzamPay callback body. `externalId`/`utilityref` and
    /// `transactionId`/`reference` are accepted interchangeably.
    pub fn from_slice(payload: &[u8]) -> PaymentResult<Self> {
        let raw: JsonValue =
            serde_json::from_slice(payload).map_err(|e| PaymentError::ValidationError {
                message: format!("invalid callback JSON payload: {}", e),
                field: None,
            })?;
        let body: RawCallbackBody =
            serde_json::from_value(raw.clone()).map_err(|e| PaymentError::ValidationError {
                message: format!("invalid callback body: {}", e),
                field: None,
            })?;

        let external_id = body
            .external_id
            .or(body.utilityref)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or(PaymentError::ValidationError {
                message: "externalId is required".to_string(),
                field: Some("externalId".to_string()),
            })?;

        let status = body
            .status
            .or(body.transactionstatus)
            .ok_or(PaymentError::ValidationError {
                message: "status is required".to_string(),
                field: Some("status".to_string()),
            })?;
        let outcome = CallbackOutcome::parse(&status).ok_or(PaymentError::ValidationError {
            message: format!("unsupported callback status '{}'", status),
            field: Some("status".to_string()),
        })?;

        let amount_raw = match body.amount {
            Some(JsonValue::String(s)) => s.trim().to_string(),
            Some(JsonValue::Number(n)) => n.to_string(),
            _ => {
                return Err(PaymentError::ValidationError {
                    message: "amount is required".to_string(),
                    field: Some("amount".to_string()),
                })
            }
        };
        let amount =
            BigDecimal::from_str(&amount_raw).map_err(|_| PaymentError::InvalidAmount {
                amount: amount_raw.clone(),
                reason: "not a decimal number".to_string(),
            })?;

        Ok(Self {
            external_id,
            provider_ref: body
                .transaction_id
                .or(body.reference)
                .filter(|v| !v.trim().is_empty()),
            status,
            outcome,
            amount,
            amount_raw,
            currency: body
                .currency
                .map(|c| c.trim().to_uppercase())
                .filter(|c| !c.is_empty()),
            signature: body.signature.filter(|s| !s.trim().is_empty()),
            message: body.message,
            raw,
        })
    }

    /// Canonical string the callback signature is computed over.
    pub fn signing_string(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.external_id,
            self.provider_ref.as_deref().unwrap_or(""),
            self.amount_raw,
            self.status
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_parses_spec_fields() {
        let payload = br#"{
            "externalId": "42-a1b2c3",
            "transactionId": "ABC",
            "amount": 10000,
            "status": "success",
            "utilityref": "42-a1b2c3",
            "signature": "deadbeef"
        }"#;
        let parsed = CallbackPayload::from_slice(payload).expect("callback should parse");
        assert_eq!(parsed.external_id, "42-a1b2c3");
        assert_eq!(parsed.provider_ref.as_deref(), Some("ABC"));
        assert_eq!(parsed.outcome, CallbackOutcome::Success);
        assert_eq!(parsed.amount, BigDecimal::from(10000));
        assert_eq!(parsed.signing_string(), "42-a1b2c3|ABC|10000|success");
    }

    #[test]
    fn callback_accepts_azampay_native_field_names() {
        let payload = br#"{
            "utilityref": "7-zz",
            "reference": "REF9",
            "amount": "2500.00",
            "transactionstatus": "failure",
            "message": "Insufficient balance"
        }"#;
        let parsed = CallbackPayload::from_slice(payload).expect("callback should parse");
        assert_eq!(parsed.external_id, "7-zz");
        assert_eq!(parsed.provider_ref.as_deref(), Some("REF9"));
        assert_eq!(parsed.outcome, CallbackOutcome::Failure);
        assert_eq!(parsed.amount, BigDecimal::from(2500));
        assert_eq!(parsed.message.as_deref(), Some("Insufficient balance"));
    }

    #[test]
    fn callback_without_external_id_is_rejected() {
        let err = CallbackPayload::from_slice(br#"{"status":"success","amount":1}"#)
            .expect_err("missing externalId must fail");
        assert!(matches!(err, PaymentError::ValidationError { .. }));
    }
}
