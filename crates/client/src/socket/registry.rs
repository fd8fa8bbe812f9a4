//! Event handler registry.
//!
//! Handlers are kept per event name in registration order. Dispatch takes a
//! snapshot of the handler list and releases the lock before invoking
//! anything, so handlers may register, remove or emit re-entrantly.
//!
//! A handler removed while a dispatch is under way is skipped if it has not
//! started yet. [`EventRegistry::clear`] additionally waits for handlers
//! running on other threads, so nothing fires once it returns.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use serde_json::Value;

/// Callback invoked with the payload of an event (`Value::Null` when none).
pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Identifies one registration made with `on`. Unique within a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

#[derive(Default)]
struct Slots {
    handlers: HashMap<String, Vec<(HandlerId, EventHandler)>>,
    /// One entry per handler currently executing, by thread.
    running: Vec<ThreadId>,
}

impl Slots {
    fn is_registered(&self, event: &str, id: HandlerId) -> bool {
        self.handlers
            .get(event)
            .is_some_and(|list| list.iter().any(|(existing, _)| *existing == id))
    }

    fn busy_elsewhere(&self) -> bool {
        let me = thread::current().id();
        self.running.iter().any(|thread| *thread != me)
    }
}

#[derive(Default)]
pub struct EventRegistry {
    next_id: AtomicU64,
    slots: Mutex<Slots>,
    idle: Condvar,
}

/// Marks the current thread as running a handler until dropped.
struct Running<'a>(&'a EventRegistry);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        let mut slots = self.0.lock();
        let me = thread::current().id();
        if let Some(pos) = slots.running.iter().position(|thread| *thread == me) {
            slots.running.swap_remove(pos);
        }
        self.0.idle.notify_all();
    }
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register `handler` for `event`. Duplicate registrations are all kept.
    pub fn on(&self, event: &str, handler: EventHandler) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock()
            .handlers
            .entry(event.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    /// Remove one registration, or every handler for `event` when `id` is `None`.
    ///
    /// Returns how many handlers were removed.
    pub fn off(&self, event: &str, id: Option<HandlerId>) -> usize {
        let mut slots = self.lock();
        let handlers = &mut slots.handlers;
        match id {
            None => handlers.remove(event).map(|list| list.len()).unwrap_or(0),
            Some(id) => {
                let Some(list) = handlers.get_mut(event) else {
                    return 0;
                };
                let before = list.len();
                list.retain(|(existing, _)| *existing != id);
                let removed = before - list.len();
                if list.is_empty() {
                    handlers.remove(event);
                }
                removed
            }
        }
    }

    /// Remove every handler for every event, then wait for handlers still
    /// running on other threads to return.
    pub fn clear(&self) {
        let mut slots = self.lock();
        slots.handlers.clear();
        self.wait_idle_locked(slots);
    }

    /// Block until no thread other than the caller is running a handler.
    ///
    /// Handlers running on the calling thread (re-entrant calls) are not waited for.
    pub fn wait_idle(&self) {
        self.wait_idle_locked(self.lock());
    }

    fn wait_idle_locked(&self, mut slots: MutexGuard<'_, Slots>) {
        while slots.busy_elsewhere() {
            slots = self
                .idle
                .wait(slots)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.lock().handlers.get(event).map(Vec::len).unwrap_or(0)
    }

    /// Invoke every handler registered for `event`, in registration order.
    ///
    /// Returns the number of handlers invoked.
    pub fn dispatch(&self, event: &str, data: &Value) -> usize {
        self.dispatch_while(event, data, || true)
    }

    /// Like [`dispatch`](Self::dispatch), stopping as soon as `live` returns false.
    ///
    /// `live` is checked under the registry lock right before each handler.
    pub fn dispatch_while(&self, event: &str, data: &Value, live: impl Fn() -> bool) -> usize {
        let snapshot: Vec<(HandlerId, EventHandler)> = match self.lock().handlers.get(event) {
            Some(list) => list.clone(),
            None => return 0,
        };

        let mut invoked = 0;
        for (id, handler) in snapshot {
            {
                let mut slots = self.lock();
                if !live() {
                    break;
                }
                if !slots.is_registered(event, id) {
                    continue;
                }
                slots.running.push(thread::current().id());
            }
            let _running = Running(self);
            handler(data);
            invoked += 1;
        }
        invoked
    }
}
