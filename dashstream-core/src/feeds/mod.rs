//! Producers that turn node state into topic broadcasts.
//!
//! Every feed is its own task and exits when the shared shutdown token fires.
//! Periodic feeds skip the tick when nobody listens to their topics.

pub mod dbsize;
pub mod milestone;
pub mod node;
pub mod visualizer;

use serde::Serialize;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::time::MissedTickBehavior;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

use crate::{
    config::NODE_TIMEOUT,
    error::UpstreamError,
    models::{message::Message, topic::Topic},
    state::AppState,
};

/// Starts every feed on `tasks`.
pub fn spawn_all(state: &Arc<AppState>, tasks: &TaskTracker) {
    node::spawn(state, tasks);
    milestone::spawn(state, tasks);
    visualizer::spawn(state, tasks);
    dbsize::spawn(state, tasks);

    let node = state.node.clone();
    let cancel = state.shutdown.clone();
    tasks.spawn(async move {
        node.run(cancel).await;
        debug!("node poller stopped");
    });
}

/// Serializes `data` once and hands it to the hub. Failures are logged.
pub(crate) async fn broadcast<T: Serialize>(state: &AppState, topic: Topic, data: &T) {
    let msg = match Message::new(topic, data) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(%topic, error = %e, "failed to serialize message");
            return;
        }
    };

    match state
        .hub
        .broadcast(&msg, state.config.websocket_write_timeout)
        .await
    {
        Ok(report) if report.displaced > 0 || report.failed > 0 => {
            debug!(
                %topic,
                delivered = report.delivered,
                displaced = report.displaced,
                failed = report.failed,
                "broadcast degraded"
            );
        }
        Ok(_) => {}
        Err(e) => debug!(%topic, error = %e, "broadcast skipped"),
    }
}

/// Runs an upstream call bounded by `limit`.
pub(crate) async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, UpstreamError>
where
    F: Future<Output = Result<T, UpstreamError>>,
{
    tokio::time::timeout(limit, call).await?
}

pub(crate) async fn node_call<T, F>(call: F) -> Result<T, UpstreamError>
where
    F: Future<Output = Result<T, UpstreamError>>,
{
    with_timeout(NODE_TIMEOUT, call).await
}

/// Calls `tick` every `period` until `cancel` fires.
pub(crate) async fn run_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(feed = name, "feed started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => tick().await,
        }
    }

    info!(feed = name, "feed stopped");
}
