//! Feeds driven by milestone change events of the node tracker.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use super::broadcast;
use crate::{
    events::HookBatch,
    models::{node::Milestone, topic::Topic},
    state::AppState,
    upstream::MilestoneInfo,
};

// Updates beyond this are dropped. The tracker must never block.
const EVENT_BUFFER: usize = 64;

#[derive(Debug, PartialEq, Eq)]
enum Update {
    SyncStatus,
    Milestone(Milestone),
}

/// Queues without waiting. A full buffer drops the update.
fn queue(tx: &mpsc::Sender<Update>, update: Update) -> bool {
    match tx.try_send(update) {
        Ok(()) => true,
        Err(e) => {
            debug!(update = ?e.into_inner(), "milestone feed update dropped");
            false
        }
    }
}

fn on_latest_milestone(tx: &mpsc::Sender<Update>, ms: &MilestoneInfo) {
    queue(tx, Update::SyncStatus);
    queue(
        tx,
        Update::Milestone(Milestone {
            milestone_id: ms.milestone_id.clone(),
            index: ms.index,
        }),
    );
}

pub(super) fn spawn(state: &Arc<AppState>, tasks: &TaskTracker) {
    tasks.spawn(run(state.clone()));
}

async fn run(state: Arc<AppState>) {
    let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
    let events = state.node.tracker().events();

    let mut hooks = HookBatch::new();
    let sync_tx = tx.clone();
    hooks.push(events.confirmed_milestone_changed.hook(move |_| {
        queue(&sync_tx, Update::SyncStatus);
    }));
    hooks.push(
        events
            .latest_milestone_changed
            .hook(move |ms| on_latest_milestone(&tx, ms)),
    );

    info!(feed = "milestones", "feed started");
    loop {
        tokio::select! {
            biased;
            _ = state.shutdown.cancelled() => break,
            update = rx.recv() => match update {
                Some(Update::SyncStatus) => {
                    if state.subscriptions.has_subscribers(Topic::SyncStatus) {
                        let status = state.node.tracker().sync_status();
                        broadcast(&state, Topic::SyncStatus, &status).await;
                    }
                }
                Some(Update::Milestone(milestone)) => {
                    if state.subscriptions.has_subscribers(Topic::Milestone) {
                        broadcast(&state, Topic::Milestone, &milestone).await;
                    }
                }
                None => break,
            },
        }
    }

    hooks.unhook_all();
    info!(feed = "milestones", "feed stopped");
}
