//! Event delivery to script-side listeners.

use crate::event::HostEvent;
use crate::host::HostRuntime;
use anyhow::Result;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::warn;

/// Delivery capability consumed by dispatch tasks.
pub trait EventDispatcher: Send + Sync {
    /// Whether the dispatcher still has a live, running host to deliver into.
    fn is_bound(&self) -> bool;

    /// Deliver to every listener registered for the event's name.
    ///
    /// Returns `false` without invoking anything when unbound. Individual
    /// listener failures are logged and do not stop the remaining listeners.
    fn dispatch(&self, event: &HostEvent) -> bool;
}

/// Opaque handle returned by listener registration.
pub type EventListenerId = u64;

type ListenerFn = dyn Fn(&HostEvent) -> Result<()> + Send + Sync + 'static;

struct RegisteredListener {
    id: EventListenerId,
    event_name: String,
    handler: Arc<ListenerFn>,
}

/// In-process dispatcher holding native listeners.
pub struct ListenerDispatcher {
    host: Weak<dyn HostRuntime>,
    listeners: Mutex<Vec<RegisteredListener>>,
    next_id: AtomicU64,
}

impl ListenerDispatcher {
    pub fn new(host: &Arc<dyn HostRuntime>) -> Self {
        Self {
            host: Arc::downgrade(host),
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn add_listener<F>(&self, event_name: &str, handler: F) -> EventListenerId
    where
        F: Fn(&HostEvent) -> Result<()> + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push(RegisteredListener {
            id,
            event_name: event_name.to_string(),
            handler: Arc::new(handler),
        });
        id
    }

    pub fn remove_listener(&self, event_name: &str, id: EventListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let len_before = listeners.len();
        listeners.retain(|l| !(l.id == id && l.event_name == event_name));
        listeners.len() < len_before
    }

    pub fn listener_count(&self, event_name: &str) -> usize {
        self.listeners
            .lock()
            .iter()
            .filter(|l| l.event_name == event_name)
            .count()
    }
}

impl EventDispatcher for ListenerDispatcher {
    fn is_bound(&self) -> bool {
        self.host.upgrade().is_some_and(|host| host.is_running())
    }

    fn dispatch(&self, event: &HostEvent) -> bool {
        if !self.is_bound() {
            return false;
        }

        let matching: Vec<(EventListenerId, Arc<ListenerFn>)> = self
            .listeners
            .lock()
            .iter()
            .filter(|l| l.event_name == event.name())
            .map(|l| (l.id, Arc::clone(&l.handler)))
            .collect();

        for (id, handler) in matching {
            if let Err(err) = handler(event) {
                warn!(event = event.name(), listener_id = id, error = %err, "event listener failed");
            }
        }
        true
    }
}
