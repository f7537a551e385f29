//! Visit-fee endpoints. The caller comes from `x-user-id`.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{error, info};
use uuid::Uuid;

use crate::api::{AppState, CallerId};
use crate::error::{AppError, AppResult};
use crate::middleware::error::with_request_id;
use crate::payments::error::PaymentError;
use crate::payments::state::{PaymentStatus, TransactionStatus};
use crate::services::visit_payment::{VisitPaymentStatus, VisitVerifyResult};

#[derive(Debug, Deserialize)]
pub struct InitiateVisitRequest {
    #[serde(default)]
    pub payment_method: Option<String>,
    /// Channel inputs such as bank account number and OTP.
    #[serde(default)]
    pub metadata: Option<JsonValue>,
}

#[derive(Debug, Serialize)]
pub struct InitiateVisitResponse {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
    pub payment_id: i64,
    pub payment_status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_action: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyVisitRequest {
    #[serde(default)]
    pub transaction_id: Option<String>,
}

/// GET /api/v1/properties/{id}/visit/status/
pub async fn visit_status(
    State(state): State<AppState>,
    Path(property_id): Path<i64>,
    CallerId(user_id): CallerId,
    headers: HeaderMap,
) -> AppResult<Json<VisitPaymentStatus>> {
    state
        .visits
        .status(user_id, property_id)
        .await
        .map(Json)
        .map_err(with_request_id(&headers))
}

/// POST /api/v1/properties/{id}/visit/initiate/
///
/// The checkout runs in its own task: a client that disconnects does not
/// cancel an attempt that is already recorded.
pub async fn initiate_visit_payment(
    State(state): State<AppState>,
    Path(property_id): Path<i64>,
    CallerId(user_id): CallerId,
    headers: HeaderMap,
    Json(body): Json<InitiateVisitRequest>,
) -> AppResult<Json<InitiateVisitResponse>> {
    let payment_method = body
        .payment_method
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .ok_or_else(|| with_request_id::<AppError>(&headers)(AppError::missing_field("payment_method")))?;
    let metadata = body.metadata.unwrap_or_else(|| serde_json::json!({}));

    info!(user_id, property_id, payment_method = %payment_method, "visit payment requested");

    let visits = state.visits.clone();
    let task = tokio::spawn(async move {
        visits
            .initiate(user_id, property_id, &payment_method, metadata)
            .await
    });
    let result = match task.await {
        Ok(result) => result.map_err(with_request_id(&headers))?,
        Err(e) => {
            error!(alert = true, error = %e, "visit payment task aborted");
            return Err(with_request_id::<PaymentError>(&headers)(PaymentError::Internal {
                message: e.to_string(),
            }));
        }
    };

    Ok(Json(InitiateVisitResponse {
        transaction_id: result.transaction_id,
        status: result.provider_status,
        payment_id: result.payment_id,
        payment_status: result.payment_status,
        message: result.provider_message,
        next_action: result.next_action,
    }))
}

/// POST /api/v1/properties/{id}/visit/verify/
pub async fn verify_visit_payment(
    State(state): State<AppState>,
    Path(property_id): Path<i64>,
    CallerId(user_id): CallerId,
    headers: HeaderMap,
    Json(body): Json<VerifyVisitRequest>,
) -> AppResult<Json<VisitVerifyResult>> {
    let raw = body
        .transaction_id
        .ok_or_else(|| with_request_id::<AppError>(&headers)(AppError::missing_field("transaction_id")))?;
    let transaction_id = Uuid::parse_str(raw.trim()).map_err(|_| {
        with_request_id::<AppError>(&headers)(AppError::invalid_field(
            "transaction_id",
            "must be a UUID",
        ))
    })?;

    state
        .visits
        .verify(user_id, property_id, transaction_id)
        .await
        .map(Json)
        .map_err(with_request_id(&headers))
}
