//! HTTP analysis gateway against a local stub service.

use axum::Router;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, response::IntoResponse};
use formula_sim::analysis::{AnalysisError, AnalysisGateway, HttpAnalysisGateway};
use formula_sim::simulation::CompositionItem;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// =============================================================================
// Test Utilities
// =============================================================================

/// Serve `router` on an ephemeral port and return its base URL.
async fn spawn_stub(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn gateway(base: &str, timeout: Duration) -> HttpAnalysisGateway {
    HttpAnalysisGateway::new(format!("{base}/analyze/composition"), timeout, "10g").unwrap()
}

fn composition() -> Vec<CompositionItem> {
    vec![
        CompositionItem {
            substance_id: Some("m-1".to_string()),
            ..CompositionItem::named("黄芪").with_dose("30g")
        },
        CompositionItem::named("当归"),
    ]
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_success_returns_body_and_sends_expected_request() {
    let seen: Arc<Mutex<Option<Value>>> = Arc::default();
    let captured = Arc::clone(&seen);
    let router = Router::new().route(
        "/analyze/composition",
        post(move |Json(body): Json<Value>| {
            let captured = Arc::clone(&captured);
            async move {
                *captured.lock().unwrap() = Some(body);
                Json(json!({ "analysis": "补气养血", "suggestions": ["加白术"] }))
            }
        }),
    );
    let base = spawn_stub(router).await;

    let result = gateway(&base, Duration::from_secs(5))
        .analyze(&composition())
        .await
        .unwrap();
    assert_eq!(result.0["analysis"], "补气养血");

    let request = seen.lock().unwrap().clone().unwrap();
    assert_eq!(
        request,
        json!({
            "composition": [
                { "medicine_id": "m-1", "name": "黄芪", "dosage": "30g" },
                { "medicine_id": null, "name": "当归", "dosage": "10g" }
            ]
        })
    );
}

#[tokio::test]
async fn test_upstream_status_is_classified() {
    let router = Router::new().route(
        "/analyze/composition",
        post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "busy").into_response() }),
    );
    let base = spawn_stub(router).await;

    let err = gateway(&base, Duration::from_secs(5))
        .analyze(&composition())
        .await
        .unwrap_err();
    assert_eq!(err, AnalysisError::Upstream(503));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_body_without_analysis_is_malformed() {
    let router = Router::new().route(
        "/analyze/composition",
        post(|| async { Json(json!({ "status": "ok" })) }),
    );
    let base = spawn_stub(router).await;

    let err = gateway(&base, Duration::from_secs(5))
        .analyze(&composition())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "MALFORMED_RESPONSE");
}

#[tokio::test]
async fn test_non_json_body_is_malformed() {
    let router = Router::new().route(
        "/analyze/composition",
        post(|| async { "plain text" }),
    );
    let base = spawn_stub(router).await;

    let err = gateway(&base, Duration::from_secs(5))
        .analyze(&composition())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "MALFORMED_RESPONSE");
}

#[tokio::test]
async fn test_slow_service_times_out() {
    let router = Router::new().route(
        "/analyze/composition",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(json!({ "analysis": "late" }))
        }),
    );
    let base = spawn_stub(router).await;

    let err = gateway(&base, Duration::from_millis(200))
        .analyze(&composition())
        .await
        .unwrap_err();
    assert_eq!(err, AnalysisError::Timeout);
}
