//! Delivery of host events to Lua listeners.

use crate::convert::event_to_table;
use crate::host::LuaHost;
use eosbridge_core::dispatcher::EventDispatcher;
use eosbridge_core::event::HostEvent;
use eosbridge_core::host::HostRuntime;
use mlua::{Function, Lua, RegistryKey, Table, Value};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::warn;

/// A listener pinned in the Lua registry. `identity` is the address of the
/// Lua object and stays valid while the registry reference is held.
struct LuaListener {
    identity: usize,
    key: RegistryKey,
}

/// Dispatcher whose listeners are Lua functions or tables.
///
/// A table listener is called as `listener[name](listener, event)`.
pub struct LuaEventDispatcher {
    host: Weak<LuaHost>,
    listeners: Mutex<HashMap<String, Vec<Arc<LuaListener>>>>,
}

impl LuaEventDispatcher {
    pub fn new(host: Weak<LuaHost>) -> Self {
        Self {
            host,
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Register `listener` for `event_name`. Registering the same listener
    /// twice for one event is a no-op and returns `false`.
    pub fn add_listener<'lua>(
        &self,
        lua: &'lua Lua,
        event_name: &str,
        listener: Value<'lua>,
    ) -> mlua::Result<bool> {
        let identity = listener.to_pointer() as usize;
        if self.contains(event_name, identity) {
            return Ok(false);
        }
        let key = lua.create_registry_value(listener)?;
        self.listeners
            .lock()
            .entry(event_name.to_string())
            .or_default()
            .push(Arc::new(LuaListener { identity, key }));
        Ok(true)
    }

    pub fn remove_listener(&self, event_name: &str, listener: &Value) -> bool {
        let identity = listener.to_pointer() as usize;
        let mut listeners = self.listeners.lock();
        let Some(registered) = listeners.get_mut(event_name) else {
            return false;
        };
        let len_before = registered.len();
        registered.retain(|l| l.identity != identity);
        let removed = registered.len() < len_before;
        if registered.is_empty() {
            listeners.remove(event_name);
        }
        removed
    }

    pub fn listener_count(&self, event_name: &str) -> usize {
        self.listeners.lock().get(event_name).map_or(0, Vec::len)
    }

    fn contains(&self, event_name: &str, identity: usize) -> bool {
        self.listeners
            .lock()
            .get(event_name)
            .is_some_and(|registered| registered.iter().any(|l| l.identity == identity))
    }

    fn snapshot(&self, event_name: &str) -> Vec<Arc<LuaListener>> {
        self.listeners
            .lock()
            .get(event_name)
            .cloned()
            .unwrap_or_default()
    }
}

fn call_listener(lua: &Lua, listener: &LuaListener, name: &str, event: &Table) -> mlua::Result<()> {
    match lua.registry_value::<Value>(&listener.key)? {
        Value::Function(function) => function.call::<_, ()>(event.clone()),
        Value::Table(table) => {
            let method: Function = table.get(name)?;
            method.call::<_, ()>((table, event.clone()))
        }
        other => Err(mlua::Error::RuntimeError(format!(
            "listener is a {}",
            other.type_name()
        ))),
    }
}

impl EventDispatcher for LuaEventDispatcher {
    fn is_bound(&self) -> bool {
        self.host.upgrade().is_some_and(|host| host.is_running())
    }

    fn dispatch(&self, event: &HostEvent) -> bool {
        let Some(host) = self.host.upgrade() else {
            return false;
        };
        if !host.is_running() {
            return false;
        }

        let listeners = self.snapshot(event.name());
        if listeners.is_empty() {
            return true;
        }

        let lua = host.lua();
        let table = match event_to_table(&lua, event) {
            Ok(table) => table,
            Err(err) => {
                warn!(event = event.name(), error = %err, "failed to build lua event table");
                return false;
            }
        };
        for listener in listeners {
            if let Err(err) = call_listener(&lua, &listener, event.name(), &table) {
                warn!(event = event.name(), error = %err, "lua event listener failed");
            }
        }
        true
    }
}
