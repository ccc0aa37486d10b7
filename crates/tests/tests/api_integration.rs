use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use switchboard_api::build_app;
use switchboard_core::RouterConfig;
use tower::ServiceExt;

fn config() -> RouterConfig {
    RouterConfig {
        hidden_size: 24,
        train_epochs: 150,
        retrain_epochs: 5,
        embedding_dims: 256,
        embedding_api_key: None,
        feedback_threshold: 3,
        ..RouterConfig::default()
    }
}

async fn app() -> Router {
    build_app(config()).await.expect("app should build")
}

async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn health_reports_model_state() {
    let (status, body) = get_json(app().await, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["model_valid"], true);
    assert_eq!(body["provider_configured"], false);
    assert!(body.get("timestamp_utc").is_some());
}

#[tokio::test]
async fn classify_returns_attributed_decision() {
    let (status, body) = post_json(
        app().await,
        "/v1/classify",
        json!({ "text": "status of order 5521" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["intent"], "order_status");
    let confidence = body["confidence"].as_f64().unwrap();
    assert!((0.6..=1.0).contains(&confidence));
    assert!(body["method"].is_string());
    assert!(body["alternatives"].is_array());
    assert!(body["votes"].as_array().unwrap().len() >= 1);
}

#[tokio::test]
async fn nonsense_is_unknown_below_threshold() {
    let (status, body) = post_json(
        app().await,
        "/v1/classify",
        json!({ "text": "" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["intent"], "unknown");
    assert!(body["confidence"].as_f64().unwrap() < 0.6);
}

#[tokio::test]
async fn rejects_oversized_query() {
    let (status, body) = post_json(
        app().await,
        "/v1/classify",
        json!({ "text": "a".repeat(5_000) }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "text_too_long");
}

#[tokio::test]
async fn feedback_batch_triggers_retrain_visible_in_stats() {
    let app = app().await;

    let mut last = Value::Null;
    for _ in 0..3 {
        let (status, body) = post_json(
            app.clone(),
            "/v1/feedback",
            json!({
                "query": "which items need restocking",
                "predicted_intent": "inventory_check",
                "actual_intent": "inventory_check",
                "was_correct": true
            }),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        last = body;
    }

    assert_eq!(last["buffered"], 0);
    assert_eq!(last["retrain"]["applied"], true);
    assert_eq!(last["retrain"]["version"], 2);

    let (status, stats) = get_json(app, "/v1/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["model_version"], 2);
    assert_eq!(stats["feedback_buffered"], 0);
    assert_eq!(stats["metrics"]["retrains_total"], 1);
    assert_eq!(stats["metrics"]["feedback_total"], 3);
}

#[tokio::test]
async fn feedback_requires_query() {
    let (status, body) = post_json(
        app().await,
        "/v1/feedback",
        json!({
            "query": "   ",
            "predicted_intent": "help",
            "actual_intent": "help",
            "was_correct": true
        }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "empty_query");
}
