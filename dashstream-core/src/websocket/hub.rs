//! Connection hub: owns every live websocket connection and fans messages out
//! to the subscribers of a topic.

use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    error::HubError,
    models::message::Message,
    subscription::SubscriptionManager,
    websocket::queue::{DropPolicy, Enqueued, OutboundQueue},
};

pub type ConnectionId = u64;

/// Decides per outgoing broadcast whether a connection still wants it.
pub type MessageFilter = Arc<dyn Fn(ConnectionId, &Message) -> bool + Send + Sync>;

pub struct Connection {
    pub id: ConnectionId,
    pub addr: SocketAddr,
    pub user_agent: Option<String>,
    pub connected_at: DateTime<Utc>,
    queue: OutboundQueue,
    cancel: CancellationToken,
    filter: MessageFilter,
}

impl Connection {
    pub fn queue(&self) -> &OutboundQueue {
        &self.queue
    }

    /// Cancelled when the connection is unregistered or the hub shuts down.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn wants(&self, msg: &Message) -> bool {
        (self.filter)(self.id, msg)
    }

    pub async fn send(
        &self,
        msg: Message,
        deadline: Duration,
        policy: DropPolicy,
    ) -> Result<(), HubError> {
        match policy {
            DropPolicy::DropOldest => {
                if self.queue.push_drop_oldest(msg)? == Enqueued::DisplacedOldest {
                    debug!(
                        conn_id = self.id,
                        dropped = self.queue.dropped(),
                        "outbound queue full, dropped oldest message"
                    );
                }
                Ok(())
            }
            DropPolicy::BlockUntilSpace => {
                tokio::select! {
                    result = self.queue.push_wait(msg, deadline) => result,
                    _ = self.cancel.cancelled() => Err(HubError::QueueClosed),
                }
            }
        }
    }
}

/// Outcome of one broadcast. Per-client failures are counted, never returned.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub displaced: usize,
    pub filtered: usize,
    pub failed: usize,
}

pub struct ConnectionHub {
    next_id: AtomicU64,
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    subscriptions: Arc<SubscriptionManager>,
    queue_capacity: usize,
    shutdown: CancellationToken,
}

impl ConnectionHub {
    pub fn new(
        subscriptions: Arc<SubscriptionManager>,
        queue_capacity: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            connections: RwLock::new(HashMap::new()),
            subscriptions,
            queue_capacity,
            shutdown,
        }
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.subscriptions
    }

    pub async fn register<F>(
        &self,
        addr: SocketAddr,
        user_agent: Option<String>,
        filter: F,
    ) -> Result<Arc<Connection>, HubError>
    where
        F: Fn(ConnectionId, &Message) -> bool + Send + Sync + 'static,
    {
        if self.shutdown.is_cancelled() {
            return Err(HubError::QueueClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let connection = Arc::new(Connection {
            id,
            addr,
            user_agent,
            connected_at: Utc::now(),
            queue: OutboundQueue::new(self.queue_capacity),
            cancel: self.shutdown.child_token(),
            filter: Arc::new(filter),
        });

        self.connections.write().await.insert(id, connection.clone());
        self.subscriptions.connect(id);

        debug!(conn_id = id, addr = %addr, "connection registered");
        Ok(connection)
    }

    /// Cancels the connection's tasks and drops all of its subscriptions.
    /// Returns false when the connection was already gone.
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let removed = self.connections.write().await.remove(&id);
        self.subscriptions.disconnect(id);

        match removed {
            Some(connection) => {
                connection.cancel.cancel();
                connection.queue.close();
                debug!(
                    conn_id = id,
                    dropped = connection.queue.dropped(),
                    "connection unregistered"
                );
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().await.get(&id).cloned()
    }

    pub async fn send(
        &self,
        id: ConnectionId,
        msg: Message,
        deadline: Duration,
        policy: DropPolicy,
    ) -> Result<(), HubError> {
        let connection = self
            .get(id)
            .await
            .ok_or(HubError::ConnectionNotFound(id))?;
        connection.send(msg, deadline, policy).await
    }

    /// Enqueues `msg` on every subscriber of its topic with the drop-oldest
    /// policy. A full or closing client never holds up the others.
    pub async fn broadcast(
        &self,
        msg: &Message,
        deadline: Duration,
    ) -> Result<BroadcastReport, HubError> {
        let subscribers = self.subscriptions.subscribers_of(msg.topic());
        if subscribers.is_empty() {
            return Ok(BroadcastReport::default());
        }

        let targets: Vec<Arc<Connection>> = {
            let connections = tokio::time::timeout(deadline, self.connections.read())
                .await
                .map_err(|_| HubError::Timeout)?;
            subscribers
                .iter()
                .filter_map(|id| connections.get(id).cloned())
                .collect()
        };

        let mut report = BroadcastReport::default();
        for connection in targets {
            if !connection.wants(msg) {
                report.filtered += 1;
                continue;
            }
            match connection.queue.push_drop_oldest(msg.clone()) {
                Ok(Enqueued::Queued) => report.delivered += 1,
                Ok(Enqueued::DisplacedOldest) => {
                    report.delivered += 1;
                    report.displaced += 1;
                    debug!(
                        conn_id = connection.id,
                        topic = %msg.topic(),
                        dropped = connection.queue.dropped(),
                        "outbound queue full, dropped oldest message"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    debug!(conn_id = connection.id, topic = %msg.topic(), error = %e, "broadcast to client failed");
                }
            }
        }

        Ok(report)
    }

    pub async fn client_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Cancels every connection and removes it from the subscription registry.
    /// Registration is refused afterwards.
    pub async fn shutdown(&self) -> usize {
        self.shutdown.cancel();

        let drained: Vec<Arc<Connection>> = self
            .connections
            .write()
            .await
            .drain()
            .map(|(_, connection)| connection)
            .collect();

        for connection in &drained {
            connection.cancel.cancel();
            connection.queue.close();
            self.subscriptions.disconnect(connection.id);
        }

        info!(connections = drained.len(), "hub shut down");
        drained.len()
    }
}
