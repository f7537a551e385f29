use axum::{extract::State, http::HeaderMap, Json};

use crate::api::{AppState, CallerId};
use crate::database::models::Notification;
use crate::error::AppResult;
use crate::middleware::error::with_request_id;

/// GET /api/v1/notifications/, newest first.
pub async fn list_notifications(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    headers: HeaderMap,
) -> AppResult<Json<Vec<Notification>>> {
    state
        .store
        .list_notifications(user_id)
        .await
        .map(Json)
        .map_err(with_request_id(&headers))
}
