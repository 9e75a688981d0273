pub mod admin;
pub mod chat;
pub mod cookies;
pub mod models;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum::Router;
use tabgate_core_types::GatewayError;
use tower_http::trace::TraceLayer;

use crate::openai::error_body;
use crate::server::GatewayState;

pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .merge(chat::router())
        .merge(models::router())
        .merge(cookies::router())
        .merge(admin::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Shape a taxonomy error as the OpenAI error body with its HTTP status.
pub(crate) fn error_response(err: &GatewayError) -> Response {
    let status =
        StatusCode::from_u16(err.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(error_body(err))).into_response()
}
