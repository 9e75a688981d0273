//! Administrative surface: health/status probe and the log buffer.

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tabgate_core_types::GatewayError;

use crate::server::router::error_response;
use crate::server::GatewayState;

const DEFAULT_LOG_LINES: usize = 100;

pub(crate) fn router() -> Router<GatewayState> {
    Router::new()
        .route("/admin/status", get(status_handler))
        .route("/admin/logs", get(logs_handler).delete(reset_logs_handler))
}

async fn status_handler(State(state): State<GatewayState>, headers: HeaderMap) -> Response {
    if let Err(err) = state.authorize(&headers) {
        return error_response(&err);
    }
    let pool = state.pool.snapshot();
    Json(json!({
        "status": "ok",
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "queued": state.queue.queued(),
        "in_flight": pool.in_flight,
        "workers": pool.workers,
    }))
    .into_response()
}

async fn logs_handler(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Err(err) = state.authorize(&headers) {
        return error_response(&err);
    }
    let lines = params
        .get("lines")
        .and_then(|raw| raw.parse::<usize>().ok())
        .unwrap_or(DEFAULT_LOG_LINES);
    Json(json!({ "lines": state.logs.tail(lines) })).into_response()
}

async fn reset_logs_handler(State(state): State<GatewayState>, headers: HeaderMap) -> Response {
    if let Err(err) = state.authorize(&headers) {
        return error_response(&err);
    }
    match state.logs.reset() {
        Ok(()) => Json(json!({ "reset": true })).into_response(),
        Err(err) => error_response(&GatewayError::internal(format!("log reset: {err}"))),
    }
}
