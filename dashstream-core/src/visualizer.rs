//! Bounded live view of the most recently observed DAG blocks.
//!
//! Vertices live in a ring of slots addressed by insertion order, with an
//! ID-to-slot index for lookups. Once the ring is full the oldest vertex is
//! overwritten, whatever its flags. Events fire while the cache lock is held,
//! so handlers must only hand the value off (e.g. into a channel).

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::watch;
use tracing::debug;

use crate::{events::Event, models::node::VisualizerConfirmationInfo};

/// Number of leading characters of a hex block ID used on the wire.
pub const SHORT_ID_LENGTH: usize = 10;

pub fn short_id(id: &str) -> String {
    id.get(..SHORT_ID_LENGTH).unwrap_or(id).to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualizerVertex {
    pub id: String,
    pub parents: Vec<String>,
    pub is_solid: bool,
    pub is_referenced: bool,
    pub is_conflicting: bool,
    pub is_transaction: bool,
    pub is_milestone: bool,
    pub is_tip: bool,
    #[serde(skip)]
    short_id: String,
    #[serde(skip)]
    is_created: bool,
    #[serde(skip)]
    is_referenced_by_others: bool,
}

impl VisualizerVertex {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            parents: Vec::new(),
            is_solid: false,
            is_referenced: false,
            is_conflicting: false,
            is_transaction: false,
            is_milestone: false,
            is_tip: false,
            short_id: short_id(id),
            is_created: false,
            is_referenced_by_others: false,
        }
    }

    pub fn short_id(&self) -> &str {
        &self.short_id
    }

    /// True once the block itself was observed, not just referenced as a parent.
    pub fn is_created(&self) -> bool {
        self.is_created
    }

    pub fn is_referenced_by_others(&self) -> bool {
        self.is_referenced_by_others
    }
}

/// Payload kind of an observed block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockKind {
    pub is_transaction: bool,
    pub is_milestone: bool,
}

#[derive(Default)]
pub struct VisualizerEvents {
    pub vertex_created: Event<VisualizerVertex>,
    pub vertex_solid_updated: Event<VisualizerVertex>,
    pub vertex_tip_updated: Event<VisualizerVertex>,
    pub confirmation: Event<VisualizerConfirmationInfo>,
}

struct Arena {
    slots: Vec<Option<VisualizerVertex>>,
    // Slot of the oldest vertex.
    head: usize,
    len: usize,
    index: HashMap<String, usize>,
}

impl Arena {
    fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
            index: HashMap::with_capacity(capacity),
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn position(&self, offset: usize) -> usize {
        (self.head + offset) % self.capacity()
    }

    fn get(&self, id: &str) -> Option<&VisualizerVertex> {
        self.index.get(id).and_then(|&slot| self.slots[slot].as_ref())
    }

    /// Returns the slot of `id`, inserting a fresh vertex when unknown, and
    /// whether the vertex already existed.
    fn entry(&mut self, id: &str) -> (usize, bool) {
        if let Some(&slot) = self.index.get(id) {
            return (slot, true);
        }

        let slot = if self.len == self.capacity() {
            let slot = self.head;
            if let Some(evicted) = self.slots[slot].take() {
                self.index.remove(&evicted.id);
            }
            self.head = self.position(1);
            slot
        } else {
            let slot = self.position(self.len);
            self.len += 1;
            slot
        };

        self.slots[slot] = Some(VisualizerVertex::new(id));
        self.index.insert(id.to_string(), slot);
        (slot, false)
    }

    fn vertex_mut(&mut self, slot: usize) -> Option<&mut VisualizerVertex> {
        self.slots[slot].as_mut()
    }

    fn iter(&self) -> impl Iterator<Item = &VisualizerVertex> {
        (0..self.len).filter_map(move |offset| self.slots[self.position(offset)].as_ref())
    }

    fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.index.clear();
        self.head = 0;
        self.len = 0;
    }
}

pub struct VisualizerCache {
    arena: RwLock<Arena>,
    active: watch::Sender<bool>,
    events: VisualizerEvents,
}

impl VisualizerCache {
    pub fn new(capacity: usize) -> Self {
        let (active, _) = watch::channel(false);
        Self {
            arena: RwLock::new(Arena::new(capacity.max(1))),
            active,
            events: VisualizerEvents::default(),
        }
    }

    pub fn events(&self) -> &VisualizerEvents {
        &self.events
    }

    pub fn capacity(&self) -> usize {
        self.arena.read().capacity()
    }

    pub fn len(&self) -> usize {
        self.arena.read().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &str) -> Option<VisualizerVertex> {
        self.arena.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.arena.read().index.contains_key(id)
    }

    /// Records an observed block and marks its parents as referenced.
    pub fn add_vertex(&self, id: &str, parents: &[String], kind: BlockKind) {
        let mut arena = self.arena.write();

        let mut parent_short_ids = Vec::with_capacity(parents.len());
        for parent in parents {
            self.set_referenced_by_others(&mut arena, parent);
            parent_short_ids.push(short_id(parent));
        }

        let (slot, _) = arena.entry(id);
        let Some(vertex) = arena.vertex_mut(slot) else {
            return;
        };
        vertex.parents = parent_short_ids;
        vertex.is_created = true;
        vertex.is_tip = !vertex.is_referenced_by_others;
        vertex.is_transaction = kind.is_transaction;
        vertex.is_milestone = kind.is_milestone;

        // Fires even if the vertex was known before: it was only a parent
        // reference until now and has never been announced.
        self.events.vertex_created.trigger(vertex);
    }

    fn set_referenced_by_others(&self, arena: &mut Arena, id: &str) {
        let (slot, existed) = arena.entry(id);
        let Some(vertex) = arena.vertex_mut(slot) else {
            return;
        };
        vertex.is_referenced_by_others = true;
        let was_tip = vertex.is_tip;
        vertex.is_tip = false;

        if existed && was_tip {
            self.events.vertex_tip_updated.trigger(vertex);
        }
    }

    pub fn set_solid(&self, id: &str) {
        let mut arena = self.arena.write();
        let (slot, existed) = arena.entry(id);
        let Some(vertex) = arena.vertex_mut(slot) else {
            return;
        };
        vertex.is_solid = true;
        if existed {
            self.events.vertex_solid_updated.trigger(vertex);
        }
    }

    pub fn set_referenced(&self, id: &str) {
        let mut arena = self.arena.write();
        let (slot, _) = arena.entry(id);
        if let Some(vertex) = arena.vertex_mut(slot) {
            vertex.is_referenced = true;
        }
    }

    pub fn set_conflicting(&self, id: &str) {
        let mut arena = self.arena.write();
        let (slot, _) = arena.entry(id);
        if let Some(vertex) = arena.vertex_mut(slot) {
            vertex.is_conflicting = true;
        }
    }

    /// Announces a confirmed checkpoint with the short IDs of its parents and
    /// of the conflicting blocks excluded from its cone.
    pub fn add_confirmation(&self, parents: &[String], conflicting: &[String]) {
        let _arena = self.arena.write();
        let info = VisualizerConfirmationInfo {
            ids: parents.iter().map(|id| short_id(id)).collect(),
            excluded_ids: conflicting.iter().map(|id| short_id(id)).collect(),
        };
        self.events.confirmation.trigger(&info);
    }

    /// Visits the newest `limit` entries in insertion order, skipping vertices
    /// that were only seen as parents. Stops when `consumer` returns false.
    pub fn for_each_created<F>(&self, limit: usize, mut consumer: F)
    where
        F: FnMut(&VisualizerVertex) -> bool,
    {
        let arena = self.arena.read();
        let skip = arena.len.saturating_sub(limit);
        for vertex in arena.iter().skip(skip) {
            if vertex.is_created && !consumer(vertex) {
                break;
            }
        }
    }

    /// Owned copy of what [`for_each_created`](Self::for_each_created) would
    /// visit, for callers that need to await between items.
    pub fn created_snapshot(&self, limit: usize) -> Vec<VisualizerVertex> {
        let mut vertices = Vec::new();
        self.for_each_created(limit, |vertex| {
            vertices.push(vertex.clone());
            true
        });
        vertices
    }

    pub fn clear(&self) {
        self.arena.write().clear();
    }

    pub fn is_active(&self) -> bool {
        *self.active.borrow()
    }

    /// Switches the upstream block listener on or off. Deactivation drops every
    /// cached vertex. Returns whether the state changed.
    pub fn update_state(&self, active: bool) -> bool {
        let changed = self.active.send_if_modified(|current| {
            if *current == active {
                return false;
            }
            *current = active;
            true
        });

        if changed {
            debug!(active, "visualizer state changed");
            if !active {
                self.clear();
            }
        }
        changed
    }

    pub fn watch_state(&self) -> watch::Receiver<bool> {
        self.active.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    const V1: &str = "0x1111111111aaaa";
    const V2: &str = "0x2222222222bbbb";
    const P1: &str = "0x3333333333cccc";

    fn record(event: &Event<VisualizerVertex>) -> (Arc<Mutex<Vec<VisualizerVertex>>>, crate::events::Hook) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let hook = event.hook(move |vertex: &VisualizerVertex| {
            sink.lock().unwrap().push(vertex.clone());
        });
        (seen, hook)
    }

    fn id(i: usize) -> String {
        format!("0x{:064x}", i)
    }

    #[test]
    fn test_parent_then_child_tip_transition() {
        let cache = VisualizerCache::new(16);
        let (created, _c) = record(&cache.events().vertex_created);
        let (tips, _t) = record(&cache.events().vertex_tip_updated);

        cache.add_vertex(V1, &[P1.to_string()], BlockKind::default());

        let p1 = cache.get(P1).unwrap();
        assert!(!p1.is_created());
        let v1 = cache.get(V1).unwrap();
        assert!(v1.is_created());
        assert!(v1.is_tip);
        assert_eq!(v1.parents, vec![short_id(P1)]);
        assert!(tips.lock().unwrap().is_empty());

        cache.add_vertex(V2, &[V1.to_string()], BlockKind::default());

        assert!(!cache.get(V1).unwrap().is_tip);
        let tips = tips.lock().unwrap();
        assert_eq!(tips.len(), 1);
        assert_eq!(tips[0].short_id(), short_id(V1));
        assert!(!tips[0].is_tip);
        assert_eq!(created.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_referenced_vertex_created_once() {
        let cache = VisualizerCache::new(16);
        let (created, _c) = record(&cache.events().vertex_created);

        cache.add_vertex(V2, &[V1.to_string()], BlockKind::default());
        assert!(!cache.get(V1).unwrap().is_created());

        cache.add_vertex(V1, &[], BlockKind::default());
        let v1 = cache.get(V1).unwrap();
        assert!(v1.is_created());
        // Already referenced by V2, so never a tip.
        assert!(!v1.is_tip);

        // Referencing it again does not announce it again.
        cache.add_vertex(P1, &[V1.to_string()], BlockKind::default());
        let created = created.lock().unwrap();
        assert_eq!(created.iter().filter(|v| v.id == V1).count(), 1);
    }

    #[test]
    fn test_tip_event_only_for_known_tips() {
        let cache = VisualizerCache::new(16);
        let (tips, _t) = record(&cache.events().vertex_tip_updated);

        // P1 was never seen: no tip event.
        cache.add_vertex(V1, &[P1.to_string()], BlockKind::default());
        // V1 is a tip: exactly one event, even if referenced twice.
        cache.add_vertex(V2, &[V1.to_string()], BlockKind::default());
        cache.add_vertex(&id(9), &[V1.to_string()], BlockKind::default());

        assert_eq!(tips.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_solid_event_requires_existing_vertex() {
        let cache = VisualizerCache::new(16);
        let (solid, _s) = record(&cache.events().vertex_solid_updated);

        cache.set_solid(V1);
        assert!(solid.lock().unwrap().is_empty());
        assert!(cache.get(V1).unwrap().is_solid);

        cache.set_solid(V1);
        assert_eq!(solid.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_capacity_is_never_exceeded_and_eviction_is_fifo() {
        let cache = VisualizerCache::new(4);
        for i in 0..10 {
            cache.add_vertex(&id(i), &[], BlockKind::default());
            assert!(cache.len() <= 4);
        }

        assert_eq!(cache.len(), 4);
        for i in 0..6 {
            assert!(!cache.contains(&id(i)));
        }
        let order: Vec<String> = cache
            .created_snapshot(usize::MAX)
            .into_iter()
            .map(|v| v.id)
            .collect();
        assert_eq!(order, (6..10).map(id).collect::<Vec<_>>());
    }

    #[test]
    fn test_parent_insertion_can_evict_oldest() {
        let cache = VisualizerCache::new(2);
        cache.add_vertex(&id(1), &[], BlockKind::default());
        cache.add_vertex(&id(2), &[id(3)], BlockKind::default());

        assert!(!cache.contains(&id(1)));
        assert!(cache.contains(&id(3)));
        assert!(cache.contains(&id(2)));
    }

    #[test]
    fn test_for_each_created_skips_references_and_respects_limit() {
        let cache = VisualizerCache::new(16);
        cache.add_vertex(&id(1), &[], BlockKind::default());
        cache.add_vertex(&id(2), &[id(100)], BlockKind::default());
        cache.add_vertex(&id(3), &[], BlockKind::default());

        let all: Vec<String> = cache.created_snapshot(16).into_iter().map(|v| v.id).collect();
        assert_eq!(all, vec![id(1), id(2), id(3)]);

        // Newest three entries are id(100), id(2), id(3); id(100) was never created.
        let recent: Vec<String> = cache.created_snapshot(3).into_iter().map(|v| v.id).collect();
        assert_eq!(recent, vec![id(2), id(3)]);

        let mut visited = 0;
        cache.for_each_created(16, |_| {
            visited += 1;
            visited < 2
        });
        assert_eq!(visited, 2);
    }

    #[test]
    fn test_confirmation_uses_short_ids() {
        let cache = VisualizerCache::new(4);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _hook = cache.events().confirmation.hook(move |info| {
            sink.lock().unwrap().push(info.clone());
        });

        cache.add_confirmation(&[V1.to_string(), V2.to_string()], &[P1.to_string()]);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].ids, vec!["0x11111111", "0x22222222"]);
        assert_eq!(seen[0].excluded_ids, vec!["0x33333333"]);
    }

    #[test]
    fn test_deactivation_clears_cache() {
        let cache = VisualizerCache::new(4);
        let mut state = cache.watch_state();

        assert!(cache.update_state(true));
        assert!(!cache.update_state(true));
        assert!(*state.borrow_and_update());

        cache.add_vertex(V1, &[], BlockKind::default());
        assert!(cache.update_state(false));
        assert!(cache.is_empty());
        assert!(!cache.is_active());
    }

    #[test]
    fn test_vertex_wire_format() {
        let cache = VisualizerCache::new(4);
        cache.add_vertex(V1, &[P1.to_string()], BlockKind { is_transaction: true, is_milestone: false });
        let json = serde_json::to_value(cache.get(V1).unwrap()).unwrap();
        assert_eq!(json["id"], V1);
        assert_eq!(json["parents"][0], "0x33333333");
        assert_eq!(json["isTip"], true);
        assert_eq!(json["isTransaction"], true);
        assert!(json.get("shortId").is_none());
    }
}
