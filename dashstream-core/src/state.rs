use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::{
    auth::AuthGate,
    config::Config,
    feeds::dbsize::DbSizeHistory,
    subscription::SubscriptionManager,
    upstream::NodeBridge,
    visualizer::VisualizerCache,
    websocket::hub::ConnectionHub,
};

/// Everything handlers and feeds share, wired once at startup.
pub struct AppState {
    pub config: Config,
    pub hub: Arc<ConnectionHub>,
    pub subscriptions: Arc<SubscriptionManager>,
    pub visualizer: Arc<VisualizerCache>,
    pub auth: AuthGate,
    pub node: Arc<dyn NodeBridge>,
    pub db_sizes: DbSizeHistory,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: Config, auth: AuthGate, node: Arc<dyn NodeBridge>) -> Self {
        let shutdown = CancellationToken::new();
        let subscriptions = Arc::new(SubscriptionManager::new());
        let hub = Arc::new(ConnectionHub::new(
            subscriptions.clone(),
            config.client_queue_capacity,
            shutdown.clone(),
        ));

        Self {
            visualizer: Arc::new(VisualizerCache::new(config.visualizer_capacity)),
            config,
            hub,
            subscriptions,
            auth,
            node,
            db_sizes: DbSizeHistory::default(),
            shutdown,
        }
    }
}
