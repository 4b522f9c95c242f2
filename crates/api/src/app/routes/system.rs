use axum::{http::StatusCode, response::Response};

use crate::app::errors;

pub async fn health() -> Response {
    errors::ok(serde_json::json!({ "status": "ok" }))
}

/// Routed fallback for paths the gate let through but nothing serves.
pub async fn not_found() -> Response {
    errors::json_error(StatusCode::NOT_FOUND, "NOT_FOUND", "route not found")
}
