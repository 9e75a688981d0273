//! `GET /v1/cookies`: administrative read of a worker's cookie jar.

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

pub(crate) fn router() -> Router<GatewayState> {
    Router::new().route("/v1/cookies", get(cookies_handler))
}

async fn cookies_handler(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Err(err) = state.authorize(&headers) {
        return error_response(&err);
    }
    let Some(worker) = state.pool.first_initialized() else {
        return error_response(&GatewayError::browser_not_initialized());
    };
    let domain = params.get("domain").map(String::as_str);
    match worker.cookies(domain).await {
        Ok(cookies) => Json(json!({
            "worker": worker.name(),
            "cookies": cookies,
        }))
        .into_response(),
        Err(err) => error_response(&err),
    }
}
