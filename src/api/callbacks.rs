//! Inbound AzamPay callback.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::api::AppState;
use crate::payments::error::{ErrorCategory, PaymentError};

const SIGNATURE_HEADERS: [&str; 2] = ["x-signature", "x-azampay-signature"];

#[derive(Debug, Serialize, PartialEq)]
pub struct CallbackAck {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CallbackAck {
    fn ok() -> Self {
        Self {
            status: "OK",
            reason: None,
        }
    }

    fn rejected(reason: String) -> Self {
        Self {
            status: "REJECTED",
            reason: Some(reason),
        }
    }
}

fn rejection(err: &PaymentError) -> (StatusCode, Json<CallbackAck>) {
    let status =
        StatusCode::from_u16(err.http_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let reason = match err.category() {
        ErrorCategory::Unknown => err.user_message(),
        _ => err.to_string(),
    };
    (status, Json(CallbackAck::rejected(reason)))
}

/// POST /payments/callback/azampay/
///
/// Reconciliation runs in its own task. If it has not finished within the
/// acknowledgement window the provider gets `OK` and the task completes in
/// the background.
pub async fn azampay_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<CallbackAck>) {
    let signature = SIGNATURE_HEADERS
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let request_id = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let reconciler = state.reconciler.clone();
    // The outcome is logged inside the task so it is not lost when the
    // provider has already been acknowledged.
    let task = tokio::spawn(async move {
        let outcome = reconciler.handle(&body, signature.as_deref()).await;
        match &outcome {
            Ok(result) => info!(
                request_id = %request_id,
                external_id = %result.external_id,
                applied = result.applied,
                "callback reconciled"
            ),
            Err(e) if e.category() == ErrorCategory::Unknown => error!(
                alert = true,
                request_id = %request_id,
                error = %e,
                "callback reconciliation failed"
            ),
            Err(e) => warn!(request_id = %request_id, error = %e, "callback rejected"),
        }
        outcome
    });

    match tokio::time::timeout(state.gateway.callback_ack_timeout, task).await {
        Ok(Ok(Ok(_))) => (StatusCode::OK, Json(CallbackAck::ok())),
        Ok(Ok(Err(e))) => rejection(&e),
        Ok(Err(join_error)) => {
            error!(alert = true, error = %join_error, "callback task aborted");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(CallbackAck::rejected("internal error".to_string())),
            )
        }
        Err(_) => {
            warn!(
                timeout_ms = state.gateway.callback_ack_timeout.as_millis() as u64,
                "callback still reconciling, acknowledging early"
            );
            (StatusCode::OK, Json(CallbackAck::ok()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_failures_are_rejected_with_reason() {
        let (status, Json(ack)) = rejection(&PaymentError::ConflictingCallback {
            external_id: "1-abc".to_string(),
            current: "succeeded".to_string(),
            received: "failure".to_string(),
        });
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(ack.status, "REJECTED");
        assert!(ack.reason.unwrap().contains("1-abc"));
    }

    #[test]
    fn storage_failures_hide_details() {
        let (status, Json(ack)) = rejection(&PaymentError::Storage {
            message: "connection refused to 10.0.0.5".to_string(),
        });
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!ack.reason.unwrap().contains("10.0.0.5"));
    }
}
