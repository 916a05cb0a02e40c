//! Host-native event representation.
//!
//! A [`HostEvent`] is a name plus an ordered field mapping. Hosts convert it
//! into their own table type at delivery time.

use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};

/// Well-known event names delivered to scripts.
pub mod event_names {
    pub const LOGIN_RESPONSE: &str = "loginResponse";
    pub const LOAD_PRODUCTS: &str = "loadProducts";
    /// Shared by checkout completion and entitlement queries.
    pub const STORE_TRANSACTION: &str = "storeTransaction";
}

/// Field value inside a [`HostEvent`].
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventValue {
    Bool(bool),
    Integer(i64),
    String(String),
    List(Vec<EventValue>),
    Table(EventFields),
}

impl EventValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[EventValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&EventFields> {
        match self {
            Self::Table(fields) => Some(fields),
            _ => None,
        }
    }
}

impl From<bool> for EventValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for EventValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for EventValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<&str> for EventValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for EventValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<EventValue>> for EventValue {
    fn from(value: Vec<EventValue>) -> Self {
        Self::List(value)
    }
}

impl From<EventFields> for EventValue {
    fn from(value: EventFields) -> Self {
        Self::Table(value)
    }
}

/// Ordered field mapping. Setting an existing key replaces it in place.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventFields(Vec<(String, EventValue)>);

impl EventFields {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<EventValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<EventValue>) {
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = value,
            None => self.0.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&EventValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &EventValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> Vec<&str> {
        self.0.iter().map(|(k, _)| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for EventFields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// One named event ready for delivery.
#[derive(Clone, Debug, PartialEq)]
pub struct HostEvent {
    name: String,
    fields: EventFields,
}

impl HostEvent {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: EventFields::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<EventValue>) -> Self {
        self.fields.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<EventValue>) {
        self.fields.set(key, value);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Option<&EventValue> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &EventFields {
        &self.fields
    }

    /// JSON rendering with `name` as the first key.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl Serialize for HostEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 1))?;
        map.serialize_entry("name", &self.name)?;
        for (key, value) in self.fields.iter() {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}
