//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use api::AppState;
use api::config::Config;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup() -> (axum::Router, Arc<AppState>) {
    let state = api::create_default_state(&Config::default()).unwrap();
    let app = api::create_app(state.clone(), get_metrics_handle());
    (app, state)
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn order(amount_cents: i64) -> Value {
    json!({
        "customer_id": "customer-1",
        "amount_cents": amount_cents,
        "items": [{ "product_id": "SKU-001", "quantity": 2 }],
        "address": "1 Main St"
    })
}

async fn start_order(app: &axum::Router, amount_cents: i64) -> String {
    let (status, json) = send(app, post("/sagas/OrderFulfillment", order(amount_cents))).await;
    assert_eq!(status, StatusCode::CREATED);
    json["session_id"].as_str().unwrap().to_string()
}

/// Runs relay batches until the session reaches a terminal state.
async fn relay_until_done(app: &axum::Router, session_id: &str) -> Value {
    for _ in 0..10 {
        let (status, _) = send(app, post("/relay/execute", Value::Null)).await;
        assert_eq!(status, StatusCode::OK);

        let (_, session) = send(app, get(&format!("/sessions/{session_id}"))).await;
        if session["state"] == "Completed" || session["state"] == "Failed" {
            return session;
        }
    }
    panic!("session {session_id} never finished");
}

#[tokio::test]
async fn test_health_check() {
    let (app, _) = setup();

    let (status, json) = send(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["sagas"], 1);
    assert_eq!(json["channels"], 10);
}

#[tokio::test]
async fn test_list_sagas() {
    let (app, _) = setup();

    let (status, json) = send(&app, get("/sagas")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["sagas"], json!(["OrderFulfillment"]));
}

#[tokio::test]
async fn test_start_saga_creates_pending_session() {
    let (app, _) = setup();

    let session_id = start_order(&app, 2500).await;
    assert!(session_id.starts_with("OrderFulfillment-"));

    let (status, session) = send(&app, get(&format!("/sessions/{session_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["state"], "Common");
    assert_eq!(session["current_step"], "reserve_inventory");
    assert_eq!(session["pending"], true);
    assert_eq!(session["data"]["customer_id"], "customer-1");
}

#[tokio::test]
async fn test_relay_drives_order_to_completion() {
    let (app, state) = setup();

    let session_id = start_order(&app, 2500).await;
    let session = relay_until_done(&app, &session_id).await;

    assert_eq!(session["state"], "Completed");
    let id = common::SessionId::new(session_id);
    assert!(state.services.inventory.has_reservation(&id));
    assert!(state.services.payment.has_payment(&id));
    assert!(state.services.shipping.tracking_number(&id).is_some());
    assert_eq!(state.services.inventory.stock("SKU-001"), 98);
}

#[tokio::test]
async fn test_declined_payment_compensates_reservation() {
    let (app, state) = setup();

    let session_id = start_order(&app, 1_000_000).await;
    let session = relay_until_done(&app, &session_id).await;

    assert_eq!(session["state"], "Failed");
    let id = common::SessionId::new(session_id);
    assert!(!state.services.inventory.has_reservation(&id));
    assert!(!state.services.payment.has_payment(&id));
    assert!(state.services.shipping.tracking_number(&id).is_none());
    assert_eq!(state.services.inventory.stock("SKU-001"), 100);
}

#[tokio::test]
async fn test_start_unknown_saga_returns_404() {
    let (app, _) = setup();

    let (status, json) = send(&app, post("/sagas/Unknown", order(100))).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("Unknown"));
}

#[tokio::test]
async fn test_start_with_non_object_body_returns_400() {
    let (app, _) = setup();

    let (status, json) = send(&app, post("/sagas/OrderFulfillment", json!([1, 2, 3]))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error = json["error"].as_str().unwrap();
    assert!(error.starts_with("Start saga called with invalid parameters"));
    assert!(error.contains("array"));
}

#[tokio::test]
async fn test_start_with_invalid_order_returns_400() {
    let (app, _) = setup();

    let (status, _) = send(
        &app,
        post("/sagas/OrderFulfillment", json!({ "customer_id": "c-1" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_session_returns_404() {
    let (app, _) = setup();

    let (status, _) = send(&app, get("/sessions/OrderFulfillment-missing")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_relay_execute_on_empty_outboxes() {
    let (app, _) = setup();

    let (status, json) = send(&app, post("/relay/execute", Value::Null)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["published"], 0);
    assert_eq!(json["dead_lettered"], 0);
    assert_eq!(json["replayed"], 0);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _) = setup();
    start_order(&app, 2500).await;

    let response = app.oneshot(get("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(content_type.starts_with("text/plain"));
}
