//! The `plugin.eos` Lua library.
//!
//! Loading the library creates the runtime context for its host, connects
//! it to the SDK and returns a table of functions bound to that context.
//! The context is owned by a userdata value in the Lua registry; when the
//! Lua state collects it (or [`LuaHost::close`] releases it) the context is
//! destroyed and its queued events are dropped.

use crate::dispatcher::LuaEventDispatcher;
use crate::host::LuaHost;
use eosbridge_core::config::{BridgeConfig, LaunchArgs};
use eosbridge_core::dispatcher::EventDispatcher;
use eosbridge_core::host::HostRuntime;
use eosbridge_core::sdk::LoginCredentials;
use eosbridge_core::{ContextEnv, Error, RuntimeContext};
use mlua::{Lua, MultiValue, Table, UserData, Value};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Name scripts pass to `require`.
pub const MODULE_NAME: &str = "plugin.eos";

const STATE_KEY: &str = "eosbridge.plugin.state";

/// Settings applied when the library is first loaded into a host.
#[derive(Debug, Clone, Default)]
pub struct PluginSettings {
    pub config: BridgeConfig,
    pub launch_args: LaunchArgs,
}

struct PluginState {
    context: Arc<RuntimeContext>,
    dispatcher: Arc<LuaEventDispatcher>,
}

impl UserData for PluginState {}

impl Drop for PluginState {
    fn drop(&mut self) {
        debug!(context = %self.context.handle(), "plugin.eos state finalized");
    }
}

/// Register `plugin.eos` in `package.preload` so scripts can `require` it.
pub fn install_plugin(
    host: &Arc<LuaHost>,
    env: ContextEnv,
    settings: PluginSettings,
) -> mlua::Result<()> {
    let lua = host.lua();
    let weak_host = Arc::downgrade(host);
    let loader = lua.create_function(move |lua, _args: MultiValue| {
        let host = weak_host
            .upgrade()
            .ok_or_else(|| runtime_error("the Lua host has shut down"))?;
        open_plugin(lua, &host, &env, &settings)
    })?;

    let package: Table = lua.globals().get("package")?;
    let preload: Table = package.get("preload")?;
    preload.set(MODULE_NAME, loader)
}

/// Build the library table for `host`, creating its runtime context on
/// first use.
pub fn open_plugin<'lua>(
    lua: &'lua Lua,
    host: &Arc<LuaHost>,
    env: &ContextEnv,
    settings: &PluginSettings,
) -> mlua::Result<Table<'lua>> {
    let (context, dispatcher) = match plugin_state(lua)? {
        Some(state) => state,
        None => create_state(lua, host, env, settings)?,
    };
    build_library(lua, &context, &dispatcher)
}

/// Drop the registry reference to the plugin state so the next collection
/// destroys the context.
pub(crate) fn release_plugin_state(lua: &Lua) -> mlua::Result<()> {
    lua.unset_named_registry_value(STATE_KEY)
}

fn plugin_state(lua: &Lua) -> mlua::Result<Option<(Arc<RuntimeContext>, Arc<LuaEventDispatcher>)>> {
    match lua.named_registry_value::<Value>(STATE_KEY)? {
        Value::UserData(userdata) => {
            let state = userdata.borrow::<PluginState>()?;
            Ok(Some((Arc::clone(&state.context), Arc::clone(&state.dispatcher))))
        }
        _ => Ok(None),
    }
}

fn create_state(
    lua: &Lua,
    host: &Arc<LuaHost>,
    env: &ContextEnv,
    settings: &PluginSettings,
) -> mlua::Result<(Arc<RuntimeContext>, Arc<LuaEventDispatcher>)> {
    let dispatcher = Arc::new(LuaEventDispatcher::new(Arc::downgrade(host)));
    let for_context: Arc<dyn EventDispatcher> = dispatcher.clone();
    let main: Arc<dyn HostRuntime> = Arc::clone(host) as Arc<dyn HostRuntime>;
    let context = RuntimeContext::new(Some(main), env, move |_| for_context).map_err(plugin_error)?;

    lua.set_named_registry_value(
        STATE_KEY,
        PluginState {
            context: Arc::clone(&context),
            dispatcher: Arc::clone(&dispatcher),
        },
    )?;

    match context.connect(&settings.config) {
        Ok(()) => {
            if let Some(code) = settings.launch_args.exchange_code() {
                info!(context = %context.handle(), "logging in with launcher exchange code");
                if let Err(err) = context.login(LoginCredentials::ExchangeCode(code.to_string())) {
                    warn!(error = %err, "exchange code login failed to start");
                }
            }
        }
        Err(err) => {
            warn!(
                context = %context.handle(),
                error = %err,
                "SDK connection unavailable, plugin.eos requests will be skipped"
            );
        }
    }

    Ok((context, dispatcher))
}

fn build_library<'lua>(
    lua: &'lua Lua,
    context: &Arc<RuntimeContext>,
    dispatcher: &Arc<LuaEventDispatcher>,
) -> mlua::Result<Table<'lua>> {
    let library = lua.create_table()?;

    let listeners = Arc::downgrade(dispatcher);
    library.set(
        "addEventListener",
        lua.create_function(move |lua, (name, listener): (Value, Value)| {
            let name = event_name_arg(&name)?;
            check_listener(&listener, &name)?;
            live(&listeners)?.add_listener(lua, &name, listener)?;
            Ok(())
        })?,
    )?;

    let listeners = Arc::downgrade(dispatcher);
    library.set(
        "removeEventListener",
        lua.create_function(move |_, (name, listener): (Value, Value)| {
            let name = event_name_arg(&name)?;
            check_listener(&listener, &name)?;
            Ok(live(&listeners)?.remove_listener(&name, &listener))
        })?,
    )?;

    let weak = Arc::downgrade(context);
    library.set(
        "isLoggedOn",
        lua.create_function(move |_, _args: MultiValue| Ok(live(&weak)?.is_logged_on()))?,
    )?;

    let weak = Arc::downgrade(context);
    library.set(
        "getAuthIdToken",
        lua.create_function(move |_, _args: MultiValue| Ok(live(&weak)?.auth_id_token()))?,
    )?;

    let weak = Arc::downgrade(context);
    library.set(
        "loginWithAccountPortal",
        lua.create_function(move |_, _args: MultiValue| {
            report(live(&weak)?.login_with_account_portal())
        })?,
    )?;

    let weak = Arc::downgrade(context);
    library.set(
        "setNotificationPosition",
        lua.create_function(move |_, position: Value| {
            let Value::String(position) = position else {
                return Err(runtime_error("Given argument is not of type string."));
            };
            let position = position.to_str()?;
            match live(&weak)?.set_notification_position(position) {
                Ok(()) => Ok(true),
                Err(Error::InvalidArgument(_)) => Err(runtime_error(format!(
                    "Given unknown position name '{position}'"
                ))),
                Err(Error::NoPlatform) => Ok(false),
                Err(err) => Err(mlua::Error::external(err)),
            }
        })?,
    )?;

    // Store-plugin compatibility.
    library.set("init", lua.create_function(|_, _args: MultiValue| Ok(()))?)?;
    library.set(
        "finishTransaction",
        lua.create_function(|_, _args: MultiValue| Ok(()))?,
    )?;

    let weak = Arc::downgrade(context);
    library.set(
        "loadProducts",
        lua.create_function(move |_, _args: MultiValue| report(live(&weak)?.load_products()))?,
    )?;

    let weak = Arc::downgrade(context);
    library.set(
        "purchase",
        lua.create_function(move |_, offer: Value| {
            let offer_id = match offer {
                Value::String(s) => s.to_str()?.to_string(),
                Value::Integer(i) => i.to_string(),
                Value::Number(n) => n.to_string(),
                _ => return Err(runtime_error("1st argument must be a Lua String.")),
            };
            report(live(&weak)?.purchase(&offer_id))
        })?,
    )?;

    let weak = Arc::downgrade(context);
    library.set(
        "restore",
        lua.create_function(move |_, _args: MultiValue| report(live(&weak)?.restore()))?,
    )?;

    library.set_metatable(Some(property_metatable(lua, context)?));
    Ok(library)
}

/// Read-only properties; unknown fields are an error and writes are ignored.
fn property_metatable<'lua>(lua: &'lua Lua, context: &Arc<RuntimeContext>) -> mlua::Result<Table<'lua>> {
    let meta = lua.create_table()?;
    let weak = Arc::downgrade(context);
    meta.set(
        "__index",
        lua.create_function(move |_, (_library, field): (Table, Value)| {
            let Value::String(field) = field else {
                return Ok(None);
            };
            match field.to_str()? {
                "isLoggedOn" | "canLoadProducts" => Ok(Some(live(&weak)?.is_logged_on())),
                other => Err(runtime_error(format!("Accessing unknown field: '{other}'"))),
            }
        })?,
    )?;
    meta.set(
        "__newindex",
        lua.create_function(|_, _args: MultiValue| Ok(()))?,
    )?;
    Ok(meta)
}

fn live<T>(weak: &Weak<T>) -> mlua::Result<Arc<T>> {
    weak.upgrade()
        .ok_or_else(|| runtime_error("plugin.eos has been closed"))
}

fn event_name_arg(name: &Value) -> mlua::Result<String> {
    match name {
        Value::String(s) if !s.as_bytes().is_empty() => Ok(s.to_str()?.to_string()),
        _ => Err(runtime_error("1st argument must be set to an event name.")),
    }
}

/// A listener is a function, or a table with a method named after the event.
fn check_listener(listener: &Value, event_name: &str) -> mlua::Result<()> {
    let is_listener = match listener {
        Value::Function(_) => true,
        Value::Table(table) => matches!(table.get::<_, Value>(event_name)?, Value::Function(_)),
        _ => false,
    };
    if is_listener {
        Ok(())
    } else {
        Err(runtime_error("2nd argument must be set to a listener."))
    }
}

/// Map an operation result to the value scripts see. Missing platform or
/// session is reported as `false`; bad arguments raise a Lua error.
fn report(result: eosbridge_core::Result<()>) -> mlua::Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(err @ (Error::NoPlatform | Error::NotLoggedOn)) => {
            debug!(error = %err, "plugin.eos request skipped");
            Ok(false)
        }
        Err(Error::InvalidArgument(message)) => Err(runtime_error(message)),
        Err(err) => Err(mlua::Error::external(err)),
    }
}

fn plugin_error(err: Error) -> mlua::Error {
    match err {
        Error::ThreadAffinity { .. } => runtime_error(format!(
            "Cannot load another instance of '{MODULE_NAME}' from another thread."
        )),
        other => mlua::Error::external(other),
    }
}

fn runtime_error(message: impl Into<String>) -> mlua::Error {
    mlua::Error::RuntimeError(message.into())
}
