use axum::{
    Router, middleware,
    routing::{get, post},
};
use std::sync::Arc;

use super::{handlers, middleware::auth_rate_limit};
use crate::{state::AppState, websocket::handler};

pub fn configure_api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/dashboard/auth",
            post(handlers::auth_handler)
                .route_layer(middleware::from_fn_with_state(state.clone(), auth_rate_limit)),
        )
        .route("/dashboard/ws", get(handler::ws_handler))
        .route("/health", get(handlers::health_handler))
        .with_state(state)
}
