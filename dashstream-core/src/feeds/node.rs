//! Periodic node pollers.

use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::warn;

use super::{broadcast, node_call, run_periodic};
use crate::{models::topic::Topic, state::AppState};

pub(super) fn spawn(state: &Arc<AppState>, tasks: &TaskTracker) {
    tasks.spawn(node_status(state.clone()));
    tasks.spawn(node_info_extended(state.clone()));
    tasks.spawn(gossip_metrics(state.clone()));
    tasks.spawn(peer_metrics(state.clone()));
}

/// Public node status and confirmed milestone metrics share one `/info` call.
async fn node_status(state: Arc<AppState>) {
    let period = state.config.feed_interval;
    let cancel = state.shutdown.clone();

    let state = &state;
    run_periodic("node_status", period, cancel, move || async move {
        let subs = &state.subscriptions;
        let status_wanted = subs.has_subscribers(Topic::PublicNodeStatus);
        let metrics_wanted = subs.has_subscribers(Topic::ConfirmedMsMetrics);
        if !status_wanted && !metrics_wanted {
            return;
        }

        let info = match node_call(state.node.node_info()).await {
            Ok(info) => info,
            Err(e) => {
                warn!(error = %e, "failed to retrieve node info");
                return;
            }
        };

        if status_wanted {
            let synced = state.node.tracker().is_node_almost_synced();
            broadcast(&state, Topic::PublicNodeStatus, &info.public_status(synced)).await;
        }
        if metrics_wanted {
            broadcast(&state, Topic::ConfirmedMsMetrics, &info.metrics).await;
        }
    })
    .await;
}

async fn node_info_extended(state: Arc<AppState>) {
    let period = state.config.feed_interval;
    let cancel = state.shutdown.clone();

    let state = &state;
    run_periodic("node_info_extended", period, cancel, move || async move {
        if !state.subscriptions.has_subscribers(Topic::NodeInfoExtended) {
            return;
        }
        match node_call(state.node.node_info_extended()).await {
            Ok(extended) => broadcast(&state, Topic::NodeInfoExtended, &extended).await,
            Err(e) => warn!(error = %e, "failed to retrieve extended node info"),
        }
    })
    .await;
}

async fn gossip_metrics(state: Arc<AppState>) {
    let period = state.config.feed_interval;
    let cancel = state.shutdown.clone();

    let state = &state;
    run_periodic("gossip_metrics", period, cancel, move || async move {
        if !state.subscriptions.has_subscribers(Topic::GossipMetrics) {
            return;
        }
        match node_call(state.node.gossip_metrics()).await {
            Ok(metrics) => broadcast(&state, Topic::GossipMetrics, &metrics).await,
            Err(e) => warn!(error = %e, "failed to retrieve gossip metrics"),
        }
    })
    .await;
}

async fn peer_metrics(state: Arc<AppState>) {
    let period = state.config.feed_interval;
    let cancel = state.shutdown.clone();

    let state = &state;
    run_periodic("peer_metrics", period, cancel, move || async move {
        if !state.subscriptions.has_subscribers(Topic::PeerMetric) {
            return;
        }
        match node_call(state.node.peers()).await {
            Ok(peers) => broadcast(&state, Topic::PeerMetric, &peers).await,
            Err(e) => warn!(error = %e, "failed to retrieve peers"),
        }
    })
    .await;
}
