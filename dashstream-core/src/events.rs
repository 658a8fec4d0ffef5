//! Typed publish/subscribe events.
//!
//! Every hook returns a [`Hook`] handle. Background tasks collect their hooks in
//! a [`HookBatch`] and detach all of them at once when the task exits.

use parking_lot::RwLock;
use std::sync::{
    Arc, Weak,
    atomic::{AtomicU64, Ordering},
};

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Handlers<T> {
    next_id: AtomicU64,
    entries: RwLock<Vec<(u64, Handler<T>)>>,
}

pub struct Event<T> {
    handlers: Arc<Handlers<T>>,
}

impl<T: 'static> Default for Event<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Event<T> {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Handlers {
                next_id: AtomicU64::new(1),
                entries: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Attaches a handler. It stays attached until the returned hook is unhooked.
    pub fn hook<F>(&self, handler: F) -> Hook
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.handlers.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.entries.write().push((id, Arc::new(handler)));

        let weak: Weak<Handlers<T>> = Arc::downgrade(&self.handlers);
        Hook {
            detach: Some(Box::new(move || {
                if let Some(handlers) = weak.upgrade() {
                    handlers.entries.write().retain(|(hid, _)| *hid != id);
                }
            })),
        }
    }

    /// Calls every attached handler in attach order.
    ///
    /// Handlers run on the caller's thread and must not block.
    pub fn trigger(&self, value: &T) {
        let handlers: Vec<Handler<T>> = self
            .handlers
            .entries
            .read()
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        for handler in handlers {
            handler(value);
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.entries.read().len()
    }
}

#[must_use = "dropping a Hook keeps the handler attached; call unhook()"]
pub struct Hook {
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl Hook {
    pub fn unhook(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

/// Unhooks all collected hooks together.
#[derive(Default)]
pub struct HookBatch {
    hooks: Vec<Hook>,
}

impl HookBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, hook: Hook) {
        self.hooks.push(hook);
    }

    pub fn unhook_all(self) {
        for hook in self.hooks {
            hook.unhook();
        }
    }
}
