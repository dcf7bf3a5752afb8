use super::ErrorResponse;
use crate::config::AppState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

/// Handle one JSON-RPC message (or batch) posted by a client
pub async fn mcp_post(State(state): State<Arc<AppState>>, body: String) -> Response {
    match state.mcp.handle_message(&body).await {
        Some(response) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            response,
        )
            .into_response(),
        // Notifications only
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// The server never opens a stream of its own
pub async fn mcp_get() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, "POST")],
        Json(ErrorResponse::with_details(
            "Method not allowed",
            "POST JSON-RPC messages to this endpoint",
        )),
    )
        .into_response()
}
