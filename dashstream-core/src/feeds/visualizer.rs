//! Live DAG feed.
//!
//! The block listener only runs while some client watches a visualizer topic.
//! Cache events are forwarded to the visualizer topics as long as the node is
//! almost synced, and every confirmed milestone is applied to the cache.

use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

use super::{broadcast, node_call};
use crate::{
    events::HookBatch,
    models::{
        node::{VisualizerConfirmationInfo, VisualizerMetaInfo, VisualizerTipInfo},
        topic::{Topic, VISUALIZER_TOPICS},
    },
    state::AppState,
    upstream::MilestoneInfo,
    visualizer::VisualizerVertex,
};

const UPDATE_BUFFER: usize = 1000;
const BLOCK_BUFFER: usize = 1000;
const MILESTONE_BUFFER: usize = 16;

enum Update {
    Vertex(VisualizerVertex),
    Solid(VisualizerMetaInfo),
    Tip(VisualizerTipInfo),
    Confirmation(VisualizerConfirmationInfo),
}

pub(super) fn spawn(state: &Arc<AppState>, tasks: &TaskTracker) {
    // Hooked before any client can connect, so no subscription edge is missed.
    let mut activation_hooks = HookBatch::new();
    for event in [
        &state.subscriptions.events().topic_added,
        &state.subscriptions.events().topic_removed,
    ] {
        let watcher = state.clone();
        activation_hooks.push(event.hook(move |topic: &Topic| {
            if topic.is_visualizer() {
                check_subscriptions(&watcher);
            }
        }));
    }

    tasks.spawn(run_listener(state.clone(), tasks.clone(), activation_hooks));
    tasks.spawn(run_publisher(state.clone()));
}

/// Activates the cache while any visualizer topic has a subscriber.
fn check_subscriptions(state: &AppState) {
    let active = state.subscriptions.any_has_subscribers(&VISUALIZER_TOPICS);
    state.visualizer.update_state(active);
}

async fn run_listener(state: Arc<AppState>, tasks: TaskTracker, hooks: HookBatch) {
    let mut active = state.visualizer.watch_state();
    let mut listener = None;

    loop {
        tokio::select! {
            biased;
            _ = state.shutdown.cancelled() => break,
            changed = active.changed() => {
                if changed.is_err() {
                    break;
                }
                let is_active = *active.borrow_and_update();

                stop_listening(listener.take()).await;
                state.visualizer.clear();
                if is_active {
                    listener = Some(start_listening(&state, &tasks));
                }
                info!(active = is_active, "visualizer block listener toggled");
            }
        }
    }

    stop_listening(listener.take()).await;
    hooks.unhook_all();
}

fn start_listening(state: &AppState, tasks: &TaskTracker) -> (CancellationToken, JoinHandle<()>) {
    let cancel = state.shutdown.child_token();
    let (tx, mut rx) = mpsc::channel(BLOCK_BUFFER);
    let node = state.node.clone();
    let cache = state.visualizer.clone();
    let token = cancel.clone();

    let handle = tasks.spawn(async move {
        let listen = node.listen_to_blocks(token, tx);
        let apply = async {
            while let Some(block) = rx.recv().await {
                cache.add_vertex(&block.id, &block.parents, block.kind);
            }
        };

        let (result, ()) = tokio::join!(listen, apply);
        if let Err(e) = result {
            warn!(error = %e, "failed to listen to blocks");
        }
    });

    (cancel, handle)
}

async fn stop_listening(listener: Option<(CancellationToken, JoinHandle<()>)>) {
    let Some((cancel, handle)) = listener else {
        return;
    };
    cancel.cancel();
    if let Err(e) = handle.await {
        warn!(error = %e, "block listener task failed");
    }
}

async fn run_publisher(state: Arc<AppState>) {
    let (tx, mut updates) = mpsc::channel(UPDATE_BUFFER);
    let (ms_tx, mut milestones) = mpsc::channel(MILESTONE_BUFFER);
    let hooks = hook_events(&state, tx, ms_tx);

    info!(feed = "visualizer", "feed started");
    loop {
        tokio::select! {
            biased;
            _ = state.shutdown.cancelled() => break,
            Some(milestone) = milestones.recv() => {
                apply_confirmed_milestone(&state, &milestone).await;
            }
            Some(update) = updates.recv() => publish(&state, update).await,
        }
    }

    hooks.unhook_all();
    info!(feed = "visualizer", "feed stopped");
}

fn hook_events(
    state: &Arc<AppState>,
    tx: mpsc::Sender<Update>,
    ms_tx: mpsc::Sender<MilestoneInfo>,
) -> HookBatch {
    let mut hooks = HookBatch::new();
    let events = state.visualizer.events();

    let forward = {
        let state = state.clone();
        move |update: Update| {
            if !state.node.tracker().is_node_almost_synced() {
                return;
            }
            if tx.try_send(update).is_err() {
                debug!("visualizer update dropped");
            }
        }
    };
    let forward = Arc::new(forward);

    let f = forward.clone();
    hooks.push(events.vertex_created.hook(move |vertex| {
        f(Update::Vertex(vertex.clone()));
    }));
    let f = forward.clone();
    hooks.push(events.vertex_solid_updated.hook(move |vertex| {
        f(Update::Solid(VisualizerMetaInfo {
            id: vertex.short_id().to_string(),
        }));
    }));
    let f = forward.clone();
    hooks.push(events.vertex_tip_updated.hook(move |vertex| {
        f(Update::Tip(VisualizerTipInfo {
            id: vertex.short_id().to_string(),
            is_tip: vertex.is_tip,
        }));
    }));
    hooks.push(events.confirmation.hook(move |info| {
        forward(Update::Confirmation(info.clone()));
    }));

    let node_events = state.node.tracker().events();
    let cache = state.visualizer.clone();
    hooks.push(node_events.block_solid.hook(move |metadata| {
        if cache.is_active() {
            cache.set_solid(&metadata.block_id);
        }
    }));
    hooks.push(node_events.confirmed_milestone_changed.hook(move |milestone| {
        if ms_tx.try_send(milestone.clone()).is_err() {
            debug!(index = milestone.index, "confirmed milestone dropped by visualizer");
        }
    }));

    hooks
}

async fn publish(state: &AppState, update: Update) {
    match update {
        Update::Vertex(vertex) => broadcast(state, Topic::VisualizerVertex, &vertex).await,
        Update::Solid(info) => broadcast(state, Topic::VisualizerSolidInfo, &info).await,
        Update::Tip(info) => broadcast(state, Topic::VisualizerTipInfo, &info).await,
        Update::Confirmation(info) => {
            broadcast(state, Topic::VisualizerConfirmedInfo, &info).await
        }
    }
}

/// Marks the milestone's cone referenced, flags conflicting blocks and
/// announces the confirmation.
async fn apply_confirmed_milestone(state: &AppState, milestone: &MilestoneInfo) {
    let cache = &state.visualizer;
    if !cache.is_active() {
        return;
    }

    let mut conflicting = Vec::new();
    match node_call(state.node.milestone_cone_metadata(milestone.index)).await {
        Ok(cone) => {
            for metadata in cone {
                cache.set_referenced(&metadata.block_id);
                if metadata.is_conflicting {
                    cache.set_conflicting(&metadata.block_id);
                    conflicting.push(metadata.block_id);
                }
            }
        }
        Err(e) => warn!(index = milestone.index, error = %e, "failed to get milestone cone metadata"),
    }

    cache.add_confirmation(&milestone.parents, &conflicting);
}
