use axum::{Json, Router, http::StatusCode};
use std::{future::Future, net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::info;

use crate::{
    api::routes,
    auth::{
        AuthGate,
        identity::{identity_of, load_or_create},
    },
    config::{Config, NODE_TIMEOUT},
    error::StartupError,
    feeds,
    state::AppState,
    upstream::{NodeBridge, http::HttpNodeBridge},
};

pub struct Server {
    state: Arc<AppState>,
    tasks: TaskTracker,
}

impl Server {
    /// Validates `config`, loads the signing identity and connects the node
    /// REST bridge. Any failure here must stop the process.
    pub fn new(config: Config) -> Result<Self, StartupError> {
        config.validate()?;
        let node = Arc::new(HttpNodeBridge::new(
            &config.node_url,
            config.feed_interval,
            NODE_TIMEOUT,
        ));
        Self::with_node(config, node)
    }

    pub fn with_node(config: Config, node: Arc<dyn NodeBridge>) -> Result<Self, StartupError> {
        config.validate()?;

        let signing_key = load_or_create(
            &config.auth.identity_file,
            &config.auth.identity_private_key,
        )?;
        info!(
            identity_file = %config.auth.identity_file.display(),
            identity = %identity_of(&signing_key),
            "dashboard identity loaded"
        );
        let auth = AuthGate::new(&config.auth, &signing_key)?;

        Ok(Self {
            state: Arc::new(AppState::new(config, auth, node)),
            tasks: TaskTracker::new(),
        })
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Cancelling this token stops the server as a shutdown signal would.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    pub fn router(&self) -> Router {
        routes::configure_api_routes(self.state.clone()).fallback(|| async {
            (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": "NOT_FOUND" })),
            )
        })
    }

    pub async fn run(self) -> Result<(), StartupError> {
        let addr = self.state.config.bind_address.clone();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| StartupError::Bind { addr, source })?;

        self.serve(listener, shutdown_signal()).await
    }

    /// Starts the feeds and serves on `listener` until `signal` resolves or
    /// the shutdown token is cancelled, then closes every connection and
    /// waits for the feeds to stop.
    pub async fn serve<F>(self, listener: TcpListener, signal: F) -> Result<(), StartupError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Ok(addr) = listener.local_addr() {
            info!(
                bind_address = %addr,
                node_url = %self.state.config.node_url,
                "dashboard listening"
            );
        }

        feeds::spawn_all(&self.state, &self.tasks);

        let app = self.router();
        let state = self.state.clone();
        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = signal => {}
                _ = state.shutdown.cancelled() => {}
            }
            info!("shutting down");
            state.hub.shutdown().await;
        })
        .await;

        self.state.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        info!("all feeds stopped");

        result.map_err(StartupError::Serve)
    }
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
