use chrono::Utc;
use parking_lot::RwLock;
use std::{collections::VecDeque, sync::Arc};
use tokio_util::task::TaskTracker;
use tracing::warn;

use super::{broadcast, node_call, run_periodic};
use crate::{
    config::DB_SIZE_HISTORY_LENGTH,
    models::{node::DatabaseSizeMetric, topic::Topic},
    state::AppState,
};

/// Rolling window of database size samples, oldest first.
pub struct DbSizeHistory {
    samples: RwLock<VecDeque<DatabaseSizeMetric>>,
    capacity: usize,
}

impl Default for DbSizeHistory {
    fn default() -> Self {
        Self::new(DB_SIZE_HISTORY_LENGTH)
    }
}

impl DbSizeHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, sample: DatabaseSizeMetric) {
        let mut samples = self.samples.write();
        while samples.len() >= self.capacity {
            samples.pop_front();
        }
        samples.push_back(sample);
    }

    pub fn snapshot(&self) -> Vec<DatabaseSizeMetric> {
        self.samples.read().iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.samples.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub(super) fn spawn(state: &Arc<AppState>, tasks: &TaskTracker) {
    tasks.spawn(collect(state.clone()));
}

async fn sample(state: &AppState) -> Option<DatabaseSizeMetric> {
    match node_call(state.node.database_size()).await {
        Ok(mut metric) => {
            if metric.time == 0 {
                metric.time = Utc::now().timestamp();
            }
            state.db_sizes.push(metric);
            Some(metric)
        }
        Err(e) => {
            warn!(error = %e, "failed to retrieve database size");
            None
        }
    }
}

/// Keeps sampling even without subscribers so that new subscribers get a
/// history. Only the broadcast is skipped.
async fn collect(state: Arc<AppState>) {
    let period = state.config.db_size_interval;
    let cancel = state.shutdown.clone();

    let state = &state;
    // The interval's first tick is immediate and takes the starting sample.
    run_periodic("db_size", period, cancel, move || async move {
        let Some(metric) = sample(&state).await else {
            return;
        };
        if state.subscriptions.has_subscribers(Topic::DatabaseSizeMetric) {
            broadcast(&state, Topic::DatabaseSizeMetric, &[metric]).await;
        }
    })
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(total: i64) -> DatabaseSizeMetric {
        DatabaseSizeMetric {
            total,
            time: total,
            ..DatabaseSizeMetric::default()
        }
    }

    #[test]
    fn test_history_keeps_newest_samples() {
        let history = DbSizeHistory::new(3);
        for total in 1..=5 {
            history.push(metric(total));
        }

        let totals: Vec<i64> = history.snapshot().iter().map(|m| m.total).collect();
        assert_eq!(totals, vec![3, 4, 5]);
    }

    #[test]
    fn test_default_window() {
        let history = DbSizeHistory::default();
        assert!(history.is_empty());
        for total in 0..700 {
            history.push(metric(total));
        }
        assert_eq!(history.len(), DB_SIZE_HISTORY_LENGTH);
        assert_eq!(history.snapshot()[0].total, 100);
    }
}
