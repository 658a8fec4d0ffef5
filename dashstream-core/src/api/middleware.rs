use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::{net::SocketAddr, sync::Arc};
use tracing::debug;

use super::types::{ApiError, api_error};
use crate::state::AppState;

pub async fn auth_rate_limit(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let client = peer.ip();
    if state.auth.allow_auth_attempt(client) {
        Ok(next.run(req).await)
    } else {
        debug!(%client, "auth attempt rate limited");
        Err(api_error(StatusCode::TOO_MANY_REQUESTS, "TOO_MANY_REQUESTS"))
    }
}
