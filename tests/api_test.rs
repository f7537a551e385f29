mod common;

use axum::body::Body;
use common::{callback_body, Harness, PROPERTY_ID, TENANT_ID};
use http::{Request, StatusCode};
use makazi_payments::database::PaymentStore;
use makazi_payments::payments::credentials::{ProviderEnv, CALLBACK_PATH};
use makazi_payments::payments::state::PaymentStatus;
use serde_json::{json, Value};
use std::time::Duration;
use tower::ServiceExt;

async fn send(h: &Harness, request: Request<Body>) -> (StatusCode, Value) {
    let response = makazi_payments::router(h.state.clone())
        .oneshot(request)
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or_else(|_| json!(String::from_utf8_lossy(&body)))
    };
    (status, value)
}

fn get(uri: &str, user: Option<i64>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user.to_string());
    }
    builder.body(Body::empty()).unwrap()
}

fn post_json(uri: &str, user: Option<i64>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(user) = user {
        builder = builder.header("x-user-id", user.to_string());
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn visit_uri(action: &str) -> String {
    format!("/api/v1/properties/{}/visit/{}/", PROPERTY_ID, action)
}

#[tokio::test]
async fn test_status_requires_caller() {
    let h = Harness::new().await;
    let (status, body) = send(&h, get(&visit_uri("status"), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_status_for_unknown_property() {
    let h = Harness::new().await;
    let (status, body) = send(&h, get("/api/v1/properties/404/visit/status/", Some(TENANT_ID))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NOT_FOUND");
}

#[tokio::test]
async fn test_initiate_requires_payment_method() {
    let h = Harness::new().await;
    let (status, body) = send(&h, post_json(&visit_uri("initiate"), Some(TENANT_ID), json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["details"]["field"], "payment_method");
    assert_eq!(h.provider.calls(), 0);
}

#[tokio::test]
async fn test_full_visit_flow_over_http() {
    let h = Harness::new().await;

    let (status, body) = send(&h, get(&visit_uri("status"), Some(TENANT_ID))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["has_paid"], false);
    assert!(body.get("contact").map_or(true, Value::is_null));

    let (status, started) = send(
        &h,
        post_json(
            &visit_uri("initiate"),
            Some(TENANT_ID),
            json!({ "payment_method": "Airtel" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["status"], "sent");
    assert_eq!(started["payment_status"], "initiated");
    assert_eq!(started["next_action"], "confirm_on_phone");
    let transaction_id = started["transaction_id"].as_str().unwrap().to_string();
    let payment_id = started["payment_id"].as_i64().unwrap();

    let external_id = h
        .store
        .latest_transaction(payment_id)
        .await
        .unwrap()
        .unwrap()
        .external_id;
    let callback = Request::builder()
        .method("POST")
        .uri(CALLBACK_PATH)
        .header("content-type", "application/json")
        .body(Body::from(callback_body(&external_id, "10000", "success")))
        .unwrap();
    let (status, ack) = send(&h, callback).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["status"], "OK");

    let (status, verified) = send(
        &h,
        post_json(
            &visit_uri("verify"),
            Some(TENANT_ID),
            json!({ "transaction_id": transaction_id }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verified["status"], "succeeded");
    assert_eq!(verified["has_paid"], true);

    let (_, body) = send(&h, get(&visit_uri("status"), Some(TENANT_ID))).await;
    assert_eq!(body["has_paid"], true);
    assert_eq!(body["contact"]["name"], "Juma");

    let (status, notifications) = send(&h, get("/api/v1/notifications/", Some(TENANT_ID))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(notifications.as_array().unwrap().len(), 1);
    assert_eq!(notifications[0]["kind"], "payment_succeeded");
}

#[tokio::test]
async fn test_verify_rejects_malformed_transaction_id() {
    let h = Harness::new().await;
    let (status, body) = send(
        &h,
        post_json(
            &visit_uri("verify"),
            Some(TENANT_ID),
            json!({ "transaction_id": "not-a-uuid" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["details"]["field"], "transaction_id");
}

#[tokio::test]
async fn test_callback_with_bad_signature_is_rejected() {
    let h = Harness::new().await;
    let body = json!({
        "externalId": "1-abcdefghij",
        "amount": "10000",
        "status": "success",
    });
    let request = Request::builder()
        .method("POST")
        .uri(CALLBACK_PATH)
        .header("content-type", "application/json")
        .header("x-signature", "forged")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, ack) = send(&h, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(ack["status"], "REJECTED");
}

#[tokio::test]
async fn test_callback_for_unknown_transaction_is_not_found() {
    let h = Harness::new().await;
    let request = Request::builder()
        .method("POST")
        .uri(CALLBACK_PATH)
        .body(Body::from(callback_body("77-missing", "10000", "success")))
        .unwrap();
    let (status, ack) = send(&h, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(ack["status"], "REJECTED");
}

#[tokio::test]
async fn test_slow_callback_is_acknowledged_then_finishes() {
    let mut h = Harness::new().await;
    h.state.gateway.callback_ack_timeout = Duration::from_millis(50);
    let started = h
        .state
        .visits
        .initiate(TENANT_ID, PROPERTY_ID, "airtel", json!({}))
        .await
        .unwrap();
    let external_id = h
        .store
        .latest_transaction(started.payment_id)
        .await
        .unwrap()
        .unwrap()
        .external_id;

    // Holding the payment lock stalls reconciliation past the ack window.
    let lock = h.store.begin_for_payment(started.payment_id).await.unwrap();
    let callback = Request::builder()
        .method("POST")
        .uri(CALLBACK_PATH)
        .header("content-type", "application/json")
        .body(Body::from(callback_body(&external_id, "10000", "success")))
        .unwrap();
    let (status, ack) = send(&h, callback).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["status"], "OK");
    drop(lock);

    let mut settled = None;
    for _ in 0..100 {
        let payment = h.store.find_payment(started.payment_id).await.unwrap().unwrap();
        if payment.status == PaymentStatus::Succeeded {
            settled = Some(payment);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(settled.is_some(), "reconciliation finished in the background");
}

#[tokio::test]
async fn test_diagnostics_report_healthy_configuration() {
    let h = Harness::new().await;
    let (status, report) = send(&h, get("/api/v1/payments/diagnostics", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["mode"], "sandbox");
    assert_eq!(report["vendor_account_resolvable"], true);
    assert_eq!(report["token_acquisition"]["status"], "ok");
    assert_eq!(report["credentials_present"]["AZAM_PAY_CLIENT_SECRET"], true);
    assert!(!report.to_string().contains("client-secret"));
}

#[tokio::test]
async fn test_diagnostics_unavailable_without_credentials() {
    let h = Harness::with_env(ProviderEnv::from_lookup(|_| None)).await;
    let (status, report) = send(&h, get("/api/v1/payments/diagnostics", None)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(report["token_acquisition"]["status"], "skipped");
    assert_eq!(h.tokens.fetches(), 0);
}

#[tokio::test]
async fn test_providers_and_health() {
    let h = Harness::new().await;
    let (status, providers) = send(&h, get("/api/v1/payments/providers", None)).await;
    assert_eq!(status, StatusCode::OK);
    let codes: Vec<&str> = providers
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|p| p["code"].as_str())
        .collect();
    assert!(codes.contains(&"airtel"));
    assert!(codes.contains(&"crdb"));

    let (status, health) = send(&h, get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "Healthy");

    let (status, _) = send(&h, get("/health/live", None)).await;
    assert_eq!(status, StatusCode::OK);
}
