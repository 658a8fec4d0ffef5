use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use std::sync::Arc;
use tracing::{debug, error};

use super::types::{ApiError, HealthResponse, api_error, unauthorized};
use crate::{
    models::auth::{LoginRequest, LoginResponse},
    state::AppState,
};

/// Exchanges a still valid token, or the admin credentials, for a fresh token.
/// A token that is present but invalid is never retried as credentials.
pub async fn auth_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Json(request) = payload.map_err(|_| api_error(StatusCode::BAD_REQUEST, "BAD_REQUEST"))?;
    let auth = &state.auth;

    let authorized = match request.jwt.as_deref() {
        Some(jwt) if !jwt.is_empty() => auth.verify_admin_token(jwt),
        _ => auth.verify_credentials(
            request.user.as_deref().unwrap_or_default(),
            request.password.as_deref().unwrap_or_default(),
        ),
    };
    if !authorized {
        debug!("dashboard login rejected");
        return Err(unauthorized());
    }

    let jwt = auth.issue_token(auth.username()).map_err(|e| {
        error!(error = %e, "failed to issue session token");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR")
    })?;

    Ok(Json(LoginResponse { jwt }))
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            clients: state.hub.client_count().await,
        }),
    )
}
