//! Lua-backed host runtime.

use anyhow::{Context, Result};
use eosbridge_core::host::{
    CoroutineHost, ENTER_FRAME_EVENT, HostId, HostRuntime, ListenerId, RuntimeListener,
    RuntimeListeners, next_host_id,
};
use mlua::Lua;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// A Lua state driven frame by frame.
///
/// The state sits behind a reentrant lock so listeners can be invoked while
/// a script is already running on the same thread.
pub struct LuaHost {
    id: HostId,
    lua: ReentrantMutex<Lua>,
    running: AtomicBool,
    listeners: RuntimeListeners,
}

impl LuaHost {
    pub fn new() -> Arc<Self> {
        Self::with_state(Lua::new())
    }

    pub fn with_state(lua: Lua) -> Arc<Self> {
        Arc::new(Self {
            id: next_host_id(),
            lua: ReentrantMutex::new(lua),
            running: AtomicBool::new(true),
            listeners: RuntimeListeners::new(),
        })
    }

    /// Lock the Lua state for the current thread.
    pub fn lua(&self) -> ReentrantMutexGuard<'_, Lua> {
        self.lua.lock()
    }

    /// Run a chunk of Lua source.
    pub fn exec(&self, source: &str, chunk_name: &str) -> Result<()> {
        let lua = self.lua();
        lua.load(source.trim_start_matches('\u{FEFF}'))
            .set_name(chunk_name)
            .exec()
            .with_context(|| format!("executing lua chunk {chunk_name}"))
    }

    /// Run a Lua script file.
    pub fn exec_file(&self, path: &Path) -> Result<()> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read lua script {}", path.display()))?;
        self.exec(&source, &path.to_string_lossy())
    }

    /// Fire the per-frame event. Returns `false` when the host is suspended
    /// or closed.
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

    /// Stop the host and release the plugin state it owns.
    ///
    /// Plugin state is collected here, on the host thread, rather than when
    /// the last reference to the Lua state goes away.
    pub fn close(&self) {
        self.running.store(false, Ordering::SeqCst);
        let lua = self.lua();
        if let Err(err) = crate::plugin::release_plugin_state(&lua) {
            debug!(host = self.id, error = %err, "failed to release plugin state");
        }
        if let Err(err) = lua.gc_collect() {
            debug!(host = self.id, error = %err, "lua gc failed during close");
        }
    }

    /// A coroutine-local host that resolves to this one.
    pub fn coroutine_host(self: &Arc<Self>) -> Arc<CoroutineHost> {
        let main: Arc<dyn HostRuntime> = Arc::clone(self) as Arc<dyn HostRuntime>;
        CoroutineHost::new(&main)
    }

    pub fn frame_listener_count(&self) -> usize {
        self.listeners.count(ENTER_FRAME_EVENT)
    }
}

impl HostRuntime for LuaHost {
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
