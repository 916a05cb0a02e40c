//! Host event to Lua table conversion.

use eosbridge_core::event::{EventFields, EventValue, HostEvent};
use mlua::{Lua, Table, Value};

pub fn event_value_to_lua<'lua>(lua: &'lua Lua, value: &EventValue) -> mlua::Result<Value<'lua>> {
    Ok(match value {
        EventValue::Bool(b) => Value::Boolean(*b),
        EventValue::Integer(i) => Value::Integer(*i),
        EventValue::String(s) => Value::String(lua.create_string(s)?),
        EventValue::List(items) => {
            let table = lua.create_table_with_capacity(items.len(), 0)?;
            for (index, item) in items.iter().enumerate() {
                table.raw_set(index + 1, event_value_to_lua(lua, item)?)?;
            }
            Value::Table(table)
        }
        EventValue::Table(fields) => Value::Table(fields_to_table(lua, fields)?),
    })
}

pub fn fields_to_table<'lua>(lua: &'lua Lua, fields: &EventFields) -> mlua::Result<Table<'lua>> {
    let table = lua.create_table_with_capacity(0, fields.len())?;
    for (key, value) in fields.iter() {
        table.raw_set(key, event_value_to_lua(lua, value)?)?;
    }
    Ok(table)
}

/// The table handed to listeners: `name` plus every event field.
pub fn event_to_table<'lua>(lua: &'lua Lua, event: &HostEvent) -> mlua::Result<Table<'lua>> {
    let table = fields_to_table(lua, event.fields())?;
    table.raw_set("name", event.name())?;
    Ok(table)
}
