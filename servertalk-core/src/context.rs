//! Per-connection context
//!
//! Every connection carries one [`Context`], an ordered key/value store where
//! application code keeps whatever it needs between messages (a nickname, a
//! session id, counters). Values are JSON values so heterogeneous state fits
//! in one map and can be exported as-is.

use serde_json::{Map, Value};

/// Ordered key/value store attached to a connection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    storage: Map<String, Value>,
}

impl Context {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context pre-populated with `entries`
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut context = Self::new();
        context.merge(entries);
        context
    }

    /// Remove every entry
    pub fn reset(&mut self) {
        self.storage.clear();
    }

    /// Set every entry of `entries`, overwriting existing keys in place
    pub fn merge<I, K, V>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (key, value) in entries {
            self.set(key, value);
        }
    }

    /// Whether `key` holds a value
    pub fn has(&self, key: &str) -> bool {
        self.storage.contains_key(key)
    }

    /// The value stored under `key`
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.storage.get(key)
    }

    /// The value stored under `key`, or `default` when absent
    pub fn get_or(&self, key: &str, default: impl Into<Value>) -> Value {
        self.get(key).cloned().unwrap_or_else(|| default.into())
    }

    /// Store `value` under `key`.
    ///
    /// A new key is appended; an existing key keeps its position.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.storage.insert(key.into(), value.into());
    }

    /// Remove `key`, returning its value. Remaining keys keep their order.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.storage.shift_remove(key)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Whether the context is empty
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Iterate entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.storage.iter()
    }

    /// Export the context as a plain map.
    ///
    /// With `None` every entry is copied. With a key list the result holds
    /// exactly those keys in the requested order, each with its stored value or
    /// the paired default (`Value::Null` for a `None` default).
    pub fn to_map(&self, keys: Option<&[(&str, Option<Value>)]>) -> Map<String, Value> {
        match keys {
            None => self.storage.clone(),
            Some(keys) => keys
                .iter()
                .map(|(key, default)| {
                    let value = self
                        .get(key)
                        .cloned()
                        .or_else(|| default.clone())
                        .unwrap_or(Value::Null);
                    (key.to_string(), value)
                })
                .collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Context {
    type Item = (&'a String, &'a Value);
    type IntoIter = serde_json::map::Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.storage.iter()
    }
}
