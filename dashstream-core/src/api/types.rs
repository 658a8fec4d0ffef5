use axum::{Json, http::StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error tuple returned by every handler: status plus `{"error": CODE}`.
pub type ApiError = (StatusCode, Json<Value>);

pub fn api_error(status: StatusCode, code: &str) -> ApiError {
    (status, Json(serde_json::json!({ "error": code })))
}

pub fn unauthorized() -> ApiError {
    api_error(StatusCode::UNAUTHORIZED, "UNAUTHORIZED")
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub clients: usize,
}
