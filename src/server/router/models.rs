//! `GET /v1/models`: every model reachable through some worker, listed twice
//! — the bare id owned by `internal_server`, and the `kind/id` form owned by
//! its adapter.

use std::collections::HashSet;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::openai::model_entry;
use crate::server::router::error_response;
use crate::server::GatewayState;

pub(crate) fn router() -> Router<GatewayState> {
    Router::new().route("/v1/models", get(list_models_handler))
}

async fn list_models_handler(
    State(state): State<GatewayState>,
    headers: HeaderMap,
) -> Response {
    if let Err(err) = state.authorize(&headers) {
        return error_response(&err);
    }

    // Kinds actually bound to a worker, in worker-configured order.
    let mut kinds = Vec::new();
    let mut seen_kinds = HashSet::new();
    for worker in state.pool.workers() {
        for kind in worker.kind().member_kinds() {
            if seen_kinds.insert(kind.clone()) {
                kinds.push(kind.clone());
            }
        }
    }

    let mut data = Vec::new();
    let mut seen_bare = HashSet::new();
    for kind in &kinds {
        for descriptor in state.registry.list_models(kind) {
            if seen_bare.insert(descriptor.id.clone()) {
                data.push(model_entry(&descriptor.id, "internal_server"));
            }
            data.push(model_entry(&format!("{kind}/{}", descriptor.id), kind));
        }
    }

    Json(json!({ "object": "list", "data": data })).into_response()
}
