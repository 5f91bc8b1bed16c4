//! HTTP request handlers

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::deploy::requests::clamp_limit;
use crate::redact::redact;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "clawd".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    Json(version_info())
}

/// Queue tick response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResponse {
    pub success: bool,
    pub processed: usize,
    pub job_ids: Vec<String>,
}

/// Token presented by the caller, from `x-worker-token` or a bearer header
fn presented_token(headers: &HeaderMap) -> Option<&str> {
    if let Some(token) = headers.get("x-worker-token").and_then(|v| v.to_str().ok()) {
        if !token.is_empty() {
            return Some(token);
        }
    }

    let auth = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = auth.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
}

fn is_authorized(state: &ServerState, headers: &HeaderMap) -> bool {
    match &state.worker_token {
        None => true,
        Some(expected) => presented_token(headers) == Some(expected.as_str()),
    }
}

/// Requested batch size from a loosely-typed body. Anything unreadable means
/// "no limit given".
fn requested_limit(body: &[u8]) -> Option<i64> {
    let value: Value = serde_json::from_slice(body).ok()?;
    match value.get("limit")? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Drain a batch of queued jobs
pub async fn process_queue_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !is_authorized(&state, &headers) {
        warn!("Rejected unauthorized worker tick");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Unauthorized worker tick" })),
        )
            .into_response();
    }

    let limit = clamp_limit(requested_limit(&body));

    match state.processor.process_queue(limit).await {
        Ok(job_ids) => {
            info!(limit, processed = job_ids.len(), "Worker tick complete");
            Json(ProcessResponse {
                success: true,
                processed: job_ids.len(),
                job_ids,
            })
            .into_response()
        }
        Err(e) => {
            error!("Failed to process deployment queue: {}", redact(&e.to_string()));
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Queue processing failed" })),
            )
                .into_response()
        }
    }
}
