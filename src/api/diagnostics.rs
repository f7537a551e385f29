use axum::{extract::State, http::StatusCode, Json};

use crate::api::AppState;
use crate::payments::types::ProviderRecord;
use crate::services::diagnostic::{run_diagnostics, DiagnosticReport};

/// GET /api/v1/payments/diagnostics
///
/// Same report as the `azampay-diagnose` binary. Secrets are reported as
/// present or absent only.
pub async fn payment_diagnostics(
    State(state): State<AppState>,
) -> (StatusCode, Json<DiagnosticReport>) {
    let source = state.providers.token_source();
    let report = run_diagnostics(&state.env, source.as_ref()).await;
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

/// GET /api/v1/payments/providers
pub async fn list_providers(State(state): State<AppState>) -> Json<Vec<ProviderRecord>> {
    Json(
        state
            .initiator
            .registry()
            .list_active()
            .into_iter()
            .cloned()
            .collect(),
    )
}
