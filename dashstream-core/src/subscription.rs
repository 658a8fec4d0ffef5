//! Topic subscription registry.
//!
//! Tracks which connection is subscribed to which topic, with a reverse index
//! for broadcast. Rising (0 -> 1) and falling (1 -> 0) subscriber-count edges
//! of a topic are published exactly once through [`SubscriptionEvents`].

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::{events::Event, models::topic::Topic, websocket::hub::ConnectionId};

#[derive(Default)]
pub struct SubscriptionEvents {
    /// A topic gained its first subscriber.
    pub topic_added: Event<Topic>,
    /// A topic lost its last subscriber.
    pub topic_removed: Event<Topic>,
}

#[derive(Default)]
struct Registry {
    by_connection: HashMap<ConnectionId, HashSet<Topic>>,
    by_topic: HashMap<Topic, HashSet<ConnectionId>>,
}

#[derive(Default)]
pub struct SubscriptionManager {
    registry: RwLock<Registry>,
    // Serializes mutations together with the edge events they produce, so
    // listeners observe transitions in the order they happened.
    mutation: Mutex<()>,
    events: SubscriptionEvents,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &SubscriptionEvents {
        &self.events
    }

    pub fn connect(&self, id: ConnectionId) {
        let _guard = self.mutation.lock();
        self.registry.write().by_connection.entry(id).or_default();
    }

    /// Removes `id` from every topic it was subscribed to.
    pub fn disconnect(&self, id: ConnectionId) {
        let _guard = self.mutation.lock();
        let mut removed = Vec::new();
        {
            let mut registry = self.registry.write();
            let Some(topics) = registry.by_connection.remove(&id) else {
                return;
            };
            for topic in topics {
                if Self::remove_from_topic(&mut registry, topic, id) {
                    removed.push(topic);
                }
            }
        }

        removed.sort();
        for topic in removed {
            debug!(%topic, "topic has no subscribers left");
            self.events.topic_removed.trigger(&topic);
        }
    }

    /// Subscribing an unknown connection is a no-op.
    pub fn subscribe(&self, id: ConnectionId, topic: Topic) {
        let _guard = self.mutation.lock();
        let added = {
            let mut registry = self.registry.write();
            let Some(topics) = registry.by_connection.get_mut(&id) else {
                return;
            };
            if !topics.insert(topic) {
                return;
            }
            let subscribers = registry.by_topic.entry(topic).or_default();
            subscribers.insert(id);
            subscribers.len() == 1
        };

        if added {
            debug!(%topic, "topic has its first subscriber");
            self.events.topic_added.trigger(&topic);
        }
    }

    /// Unsubscribing an unknown connection is a no-op.
    pub fn unsubscribe(&self, id: ConnectionId, topic: Topic) {
        let _guard = self.mutation.lock();
        let removed = {
            let mut registry = self.registry.write();
            let Some(topics) = registry.by_connection.get_mut(&id) else {
                return;
            };
            if !topics.remove(&topic) {
                return;
            }
            Self::remove_from_topic(&mut registry, topic, id)
        };

        if removed {
            debug!(%topic, "topic has no subscribers left");
            self.events.topic_removed.trigger(&topic);
        }
    }

    pub fn has_subscribers(&self, topic: Topic) -> bool {
        self.registry
            .read()
            .by_topic
            .get(&topic)
            .is_some_and(|subscribers| !subscribers.is_empty())
    }

    pub fn any_has_subscribers(&self, topics: &[Topic]) -> bool {
        let registry = self.registry.read();
        topics.iter().any(|topic| {
            registry
                .by_topic
                .get(topic)
                .is_some_and(|subscribers| !subscribers.is_empty())
        })
    }

    pub fn subscribers_of(&self, topic: Topic) -> Vec<ConnectionId> {
        self.registry
            .read()
            .by_topic
            .get(&topic)
            .map(|subscribers| subscribers.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, id: ConnectionId, topic: Topic) -> bool {
        self.registry
            .read()
            .by_connection
            .get(&id)
            .is_some_and(|topics| topics.contains(&topic))
    }

    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.registry.read().by_connection.contains_key(&id)
    }

    pub fn connection_count(&self) -> usize {
        self.registry.read().by_connection.len()
    }

    // Returns true when the topic lost its last subscriber.
    fn remove_from_topic(registry: &mut Registry, topic: Topic, id: ConnectionId) -> bool {
        let Some(subscribers) = registry.by_topic.get_mut(&topic) else {
            return false;
        };
        if !subscribers.remove(&id) {
            return false;
        }
        if subscribers.is_empty() {
            registry.by_topic.remove(&topic);
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{events::Hook, models::topic::ALL_TOPICS};
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    struct Counters {
        added: Arc<AtomicUsize>,
        removed: Arc<AtomicUsize>,
        _hooks: Vec<Hook>,
    }

    fn counting(manager: &SubscriptionManager) -> Counters {
        let added = Arc::new(AtomicUsize::new(0));
        let removed = Arc::new(AtomicUsize::new(0));
        let a = added.clone();
        let r = removed.clone();
        let hooks = vec![
            manager.events().topic_added.hook(move |_| {
                a.fetch_add(1, Ordering::SeqCst);
            }),
            manager.events().topic_removed.hook(move |_| {
                r.fetch_add(1, Ordering::SeqCst);
            }),
        ];
        Counters {
            added,
            removed,
            _hooks: hooks,
        }
    }

    #[test]
    fn test_disconnect_removes_from_all_topics() {
        let manager = SubscriptionManager::new();
        manager.connect(1);
        manager.connect(2);
        for topic in ALL_TOPICS {
            manager.subscribe(1, topic);
        }
        manager.subscribe(2, Topic::SyncStatus);
        manager.unsubscribe(1, Topic::Milestone);

        manager.disconnect(1);

        for topic in ALL_TOPICS {
            assert!(!manager.subscribers_of(topic).contains(&1));
            assert!(!manager.is_subscribed(1, topic));
        }
        assert_eq!(manager.subscribers_of(Topic::SyncStatus), vec![2]);
        assert!(!manager.is_connected(1));
    }

    #[test]
    fn test_rising_edge_fires_once() {
        let manager = SubscriptionManager::new();
        let counters = counting(&manager);
        let (added, removed) = (&counters.added, &counters.removed);

        manager.connect(1);
        manager.connect(2);
        manager.subscribe(1, Topic::VisualizerVertex);
        manager.subscribe(1, Topic::VisualizerVertex);
        manager.subscribe(2, Topic::VisualizerVertex);
        assert_eq!(added.load(Ordering::SeqCst), 1);

        manager.unsubscribe(1, Topic::VisualizerVertex);
        assert_eq!(removed.load(Ordering::SeqCst), 0);
        manager.disconnect(2);
        assert_eq!(removed.load(Ordering::SeqCst), 1);

        manager.connect(3);
        manager.subscribe(3, Topic::VisualizerVertex);
        assert_eq!(added.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unknown_connection_is_noop() {
        let manager = SubscriptionManager::new();
        let counters = counting(&manager);
        let added = &counters.added;

        manager.subscribe(42, Topic::SyncStatus);
        manager.unsubscribe(42, Topic::SyncStatus);
        manager.disconnect(42);

        assert!(!manager.has_subscribers(Topic::SyncStatus));
        assert_eq!(added.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_subscribe_after_disconnect_does_not_leak() {
        let manager = SubscriptionManager::new();
        manager.connect(7);
        manager.disconnect(7);
        manager.subscribe(7, Topic::GossipMetrics);
        assert!(manager.subscribers_of(Topic::GossipMetrics).is_empty());
    }

    #[test]
    fn test_concurrent_churn_leaves_no_dead_entries() {
        let manager = Arc::new(SubscriptionManager::new());
        let handles: Vec<_> = (0..8u64)
            .map(|id| {
                let manager = manager.clone();
                std::thread::spawn(move || {
                    for round in 0..200 {
                        manager.connect(id);
                        let topic = ALL_TOPICS[(round + id as usize) % ALL_TOPICS.len()];
                        manager.subscribe(id, topic);
                        manager.subscribe(id, Topic::SyncStatus);
                        if round % 3 == 0 {
                            manager.unsubscribe(id, topic);
                        }
                        manager.disconnect(id);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for topic in ALL_TOPICS {
            assert!(!manager.has_subscribers(topic), "{} leaked", topic);
        }
        assert_eq!(manager.connection_count(), 0);
    }
}
