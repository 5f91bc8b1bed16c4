//! Worker tick endpoint tests

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use clawd::server::serve::router;
use clawd::server::state::ServerState;
use clawd::store::Store;

use crate::support::Harness;

fn app(h: &Harness, token: Option<&str>) -> Router {
    router(Arc::new(ServerState::new(h.processor.clone(), token.map(str::to_string))))
}

fn tick() -> axum::http::request::Builder {
    Request::builder()
        .method("POST")
        .uri("/queue/process")
        .header(header::CONTENT_TYPE, "application/json")
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn queue_stops(h: &Harness, count: usize) {
    h.seed_tenant("t-1", "gpt", None).await;
    for _ in 0..count {
        h.processor.queue().enqueue_stop("t-1").await.unwrap();
    }
}

#[tokio::test]
async fn test_health() {
    let h = Harness::new();
    let response = app(&h, None)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "clawd");
}

#[tokio::test]
async fn test_tick_requires_token() {
    let h = Harness::new();
    queue_stops(&h, 1).await;

    let response = app(&h, Some("s3cret"))
        .oneshot(tick().body(Body::from("{}")).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], "Unauthorized worker tick");

    // Nothing was claimed
    let jobs = h.store.tenant_jobs("t-1").await.unwrap();
    assert!(jobs.iter().all(|j| j.attempt == 0));

    let response = app(&h, Some("s3cret"))
        .oneshot(
            tick()
                .header("x-worker-token", "wrong")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_tick_accepts_bearer_and_header_tokens() {
    let h = Harness::new();
    queue_stops(&h, 2).await;

    let response = app(&h, Some("s3cret"))
        .oneshot(
            tick()
                .header(header::AUTHORIZATION, "bearer s3cret")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["processed"], 1);

    let response = app(&h, Some("s3cret"))
        .oneshot(
            tick()
                .header("x-worker-token", "s3cret")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["processed"], 1);
}

#[tokio::test]
async fn test_tick_response_shape() {
    let h = Harness::new();
    queue_stops(&h, 3).await;

    let response = app(&h, None)
        .oneshot(tick().body(Body::from(r#"{"limit": 2}"#)).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["processed"], 2);
    assert_eq!(body["jobIds"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_tick_clamps_limit() {
    let h = Harness::new();
    queue_stops(&h, 25).await;

    // Zero and garbage both mean one job
    for body in [r#"{"limit": 0}"#, "not json", ""] {
        let response = app(&h, None)
            .oneshot(tick().body(Body::from(body)).unwrap())
            .await
            .unwrap();
        assert_eq!(json_body(response).await["processed"], 1);
    }

    let response = app(&h, None)
        .oneshot(tick().body(Body::from(r#"{"limit": "500"}"#)).unwrap())
        .await
        .unwrap();
    assert_eq!(json_body(response).await["processed"], 20);

    let response = app(&h, None)
        .oneshot(tick().body(Body::from(r#"{"limit": 500}"#)).unwrap())
        .await
        .unwrap();
    assert_eq!(json_body(response).await["processed"], 2);
}

#[tokio::test]
async fn test_tick_on_empty_queue() {
    let h = Harness::new();
    let response = app(&h, None)
        .oneshot(tick().body(Body::from(r#"{"limit": 5}"#)).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["processed"], 0);
    assert_eq!(body["jobIds"], serde_json::json!([]));
}
