//! Host execution contexts.
//!
//! A host is one embedding scripting-engine instance. It exposes a per-frame
//! runtime event and a running flag; delivery only happens while it runs.
//! Coroutine hosts share their main host's frame stream and never own a
//! runtime context of their own.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Fixed per-frame runtime event name.
pub const ENTER_FRAME_EVENT: &str = "enterFrame";

pub type HostId = u64;

/// Handle returned by runtime listener registration.
pub type ListenerId = u64;

pub type RuntimeListener = Arc<dyn Fn() + Send + Sync>;

static NEXT_HOST_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique host id.
pub fn next_host_id() -> HostId {
    NEXT_HOST_ID.fetch_add(1, Ordering::Relaxed)
}

pub trait HostRuntime: Send + Sync {
    fn id(&self) -> HostId;

    /// The main host this one runs under. `None` for a main host.
    fn parent(&self) -> Option<Arc<dyn HostRuntime>>;

    /// Whether the host is currently executing frames.
    fn is_running(&self) -> bool;

    fn add_runtime_listener(&self, event: &str, listener: RuntimeListener) -> ListenerId;

    fn remove_runtime_listener(&self, event: &str, id: ListenerId) -> bool;
}

/// Walk coroutine hosts up to their main host.
pub fn main_host(host: Arc<dyn HostRuntime>) -> Arc<dyn HostRuntime> {
    let mut current = host;
    while let Some(parent) = current.parent() {
        current = parent;
    }
    current
}

// ---------------------------------------------------------------------------
// RuntimeListeners
// ---------------------------------------------------------------------------

struct RegisteredListener {
    id: ListenerId,
    event: String,
    listener: RuntimeListener,
}

/// Runtime listener table used by host implementations.
///
/// Listeners are cloned out of the lock before being invoked, so a listener
/// may add or remove listeners (or drop the context that owns one).
pub struct RuntimeListeners {
    listeners: Mutex<Vec<RegisteredListener>>,
    next_id: AtomicU64,
}

impl Default for RuntimeListeners {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl RuntimeListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, event: &str, listener: RuntimeListener) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push(RegisteredListener {
            id,
            event: event.to_string(),
            listener,
        });
        id
    }

    pub fn remove(&self, event: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let len_before = listeners.len();
        listeners.retain(|l| !(l.id == id && l.event == event));
        listeners.len() < len_before
    }

    /// Invoke every listener for `event`, in registration order.
    pub fn fire(&self, event: &str) -> usize {
        let matching: Vec<RuntimeListener> = self
            .listeners
            .lock()
            .iter()
            .filter(|l| l.event == event)
            .map(|l| Arc::clone(&l.listener))
            .collect();
        for listener in &matching {
            listener();
        }
        matching.len()
    }

    pub fn count(&self, event: &str) -> usize {
        self.listeners
            .lock()
            .iter()
            .filter(|l| l.event == event)
            .count()
    }

    pub fn clear(&self) {
        self.listeners.lock().clear();
    }
}

// ---------------------------------------------------------------------------
// FrameHost
// ---------------------------------------------------------------------------

/// Native host driven by explicit [`FrameHost::enter_frame`] calls.
pub struct FrameHost {
    id: HostId,
    running: AtomicBool,
    listeners: RuntimeListeners,
}

impl FrameHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: next_host_id(),
            running: AtomicBool::new(true),
            listeners: RuntimeListeners::new(),
        })
    }

    /// Fire the per-frame event. Suspended hosts skip the frame.
    pub fn enter_frame(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        self.listeners.fire(ENTER_FRAME_EVENT);
        true
    }

    pub fn suspend(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    pub fn frame_listener_count(&self) -> usize {
        self.listeners.count(ENTER_FRAME_EVENT)
    }
}

impl HostRuntime for FrameHost {
    fn id(&self) -> HostId {
        self.id
    }

    fn parent(&self) -> Option<Arc<dyn HostRuntime>> {
        None
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn add_runtime_listener(&self, event: &str, listener: RuntimeListener) -> ListenerId {
        self.listeners.add(event, listener)
    }

    fn remove_runtime_listener(&self, event: &str, id: ListenerId) -> bool {
        self.listeners.remove(event, id)
    }
}

// ---------------------------------------------------------------------------
// CoroutineHost
// ---------------------------------------------------------------------------

/// Coroutine-local execution context. Runtime listeners go to the main host.
pub struct CoroutineHost {
    id: HostId,
    main: Weak<dyn HostRuntime>,
}

impl CoroutineHost {
    pub fn new(main: &Arc<dyn HostRuntime>) -> Arc<Self> {
        Arc::new(Self {
            id: next_host_id(),
            main: Arc::downgrade(main),
        })
    }
}

impl HostRuntime for CoroutineHost {
    fn id(&self) -> HostId {
        self.id
    }

    fn parent(&self) -> Option<Arc<dyn HostRuntime>> {
        self.main.upgrade()
    }

    fn is_running(&self) -> bool {
        self.main.upgrade().is_some_and(|main| main.is_running())
    }

    fn add_runtime_listener(&self, event: &str, listener: RuntimeListener) -> ListenerId {
        self.main
            .upgrade()
            .map_or(0, |main| main.add_runtime_listener(event, listener))
    }

    fn remove_runtime_listener(&self, event: &str, id: ListenerId) -> bool {
        self.main
            .upgrade()
            .is_some_and(|main| main.remove_runtime_listener(event, id))
    }
}
