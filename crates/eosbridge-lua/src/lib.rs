//! Lua binding for the eosbridge event queue.
//!
//! [`LuaHost`] drives a Lua state frame by frame. [`install_plugin`] makes the
//! `plugin.eos` library available to `require`; loading it creates the
//! host's runtime context, whose events reach Lua listeners through
//! [`LuaEventDispatcher`].

#![forbid(unsafe_code)]

pub mod convert;
pub mod dispatcher;
pub mod host;
pub mod plugin;

pub use dispatcher::LuaEventDispatcher;
pub use host::LuaHost;
pub use plugin::{MODULE_NAME, PluginSettings, install_plugin, open_plugin};
