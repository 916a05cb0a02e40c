//! Process-wide registry of live runtime contexts.
//!
//! SDK callbacks carry a [`ContextHandle`] as their client data. The handle
//! is an index plus a generation, so a callback that fires after its context
//! was destroyed resolves to nothing instead of a dangling owner.
//!
//! The registry also records which thread created the first live context.
//! While any context is alive, construction from another thread is refused.

use crate::context::RuntimeContext;
use crate::error::{Error, Result};
use crate::host::{HostId, HostRuntime, main_host};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, ThreadId};

/// Generation-checked reference to a registry slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContextHandle {
    index: u32,
    generation: u32,
}

impl ContextHandle {
    pub const fn index(self) -> u32 {
        self.index
    }

    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}v{}", self.index, self.generation)
    }
}

struct Entry {
    host: HostId,
    context: Weak<RuntimeContext>,
}

#[derive(Default)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

#[derive(Default)]
struct RegistryState {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    affinity: Option<ThreadId>,
}

/// Table of live runtime contexts.
#[derive(Default)]
pub struct InstanceRegistry {
    state: Mutex<RegistryState>,
}

static GLOBAL_REGISTRY: OnceLock<Arc<InstanceRegistry>> = OnceLock::new();

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by every host instance in this process.
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL_REGISTRY.get_or_init(|| Arc::new(Self::new())))
    }

    /// Reserve a slot for a context bound to `host`.
    ///
    /// Fails when other contexts are alive and were created on a different
    /// thread, or when `host` already has a slot. The first live context
    /// records the calling thread.
    pub(crate) fn register(&self, host: HostId) -> Result<ContextHandle> {
        let current = thread::current().id();
        let mut state = self.state.lock();

        let recorded = state.affinity;
        match recorded {
            Some(expected) if state.live > 0 && expected != current => {
                return Err(Error::ThreadAffinity {
                    expected,
                    actual: current,
                });
            }
            _ => state.affinity = Some(current),
        }
        if state
            .slots
            .iter()
            .filter_map(|slot| slot.entry.as_ref())
            .any(|entry| entry.host == host)
        {
            return Err(Error::DuplicateHost(host));
        }

        let index = match state.free.pop() {
            Some(index) => index,
            None => {
                state.slots.push(Slot::default());
                (state.slots.len() - 1) as u32
            }
        };
        let slot = &mut state.slots[index as usize];
        slot.entry = Some(Entry {
            host,
            context: Weak::new(),
        });
        let handle = ContextHandle {
            index,
            generation: slot.generation,
        };
        state.live += 1;
        Ok(handle)
    }

    /// Attach the context to a slot reserved by [`Self::register`].
    pub(crate) fn bind(&self, handle: ContextHandle, context: Weak<RuntimeContext>) {
        let mut state = self.state.lock();
        if let Some(entry) = Self::entry_mut(&mut state, handle) {
            entry.context = context;
        }
    }

    /// Free a slot. Outstanding handles to it stop resolving.
    pub(crate) fn deregister(&self, handle: ContextHandle) -> bool {
        let mut state = self.state.lock();
        let Some(slot) = state.slots.get_mut(handle.index as usize) else {
            return false;
        };
        if slot.generation != handle.generation || slot.entry.is_none() {
            return false;
        }
        slot.entry = None;
        slot.generation = slot.generation.wrapping_add(1);
        state.free.push(handle.index);
        state.live -= 1;
        if state.live == 0 {
            state.affinity = None;
        }
        true
    }

    fn entry_mut(state: &mut RegistryState, handle: ContextHandle) -> Option<&mut Entry> {
        state
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    /// Route a callback's client data back to its context.
    pub fn resolve(&self, handle: ContextHandle) -> Option<Arc<RuntimeContext>> {
        let state = self.state.lock();
        state
            .slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_ref())
            .and_then(|entry| entry.context.upgrade())
    }

    /// Find the context bound to `host`, resolving coroutine hosts to their
    /// main host first.
    pub fn instance_for(&self, host: &Arc<dyn HostRuntime>) -> Option<Arc<RuntimeContext>> {
        let main = main_host(Arc::clone(host));
        self.instance_for_id(main.id())
    }

    /// Linear scan for the context whose main host is `host`.
    pub fn instance_for_id(&self, host: HostId) -> Option<Arc<RuntimeContext>> {
        let state = self.state.lock();
        state
            .slots
            .iter()
            .filter_map(|slot| slot.entry.as_ref())
            .find(|entry| entry.host == host)
            .and_then(|entry| entry.context.upgrade())
    }

    /// Number of live contexts.
    pub fn len(&self) -> usize {
        self.state.lock().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Thread recorded by the first live context, if any is alive.
    pub fn affinity_thread(&self) -> Option<ThreadId> {
        let state = self.state.lock();
        if state.live == 0 { None } else { state.affinity }
    }
}
