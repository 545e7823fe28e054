use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Session-scoped key-value blackboard.
///
/// Workers read the store but never write it directly: they return a
/// [`StateDelta`] and the enclosing composer applies it. The store is owned by
/// exactly one turn at a time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateStore {
    entries: BTreeMap<String, Value>,
}

impl StateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the raw value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Returns the value under `key` when it is a JSON string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(Value::as_str)
    }

    /// Returns the value under `key` as a boolean.
    ///
    /// Strings `"true"`/`"false"` are accepted so flags written as text by a
    /// generator still read correctly.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.entries.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Deserializes the value under `key` into `T`.
    pub fn get_as<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.entries
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Whether `key` holds a non-null value.
    pub fn contains(&self, key: &str) -> bool {
        matches!(self.entries.get(key), Some(v) if !v.is_null())
    }

    /// Writes `value` under `key`, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Removes `key`, returning the previous value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    /// Applies every write and removal in `delta`.
    pub fn apply(&mut self, delta: &StateDelta) {
        for (key, op) in &delta.writes {
            match op {
                Some(value) => {
                    self.entries.insert(key.clone(), value.clone());
                }
                None => {
                    self.entries.remove(key);
                }
            }
        }
    }

    /// Number of keys in the store.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over all key-value pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }
}

/// Writes a worker requests against a [`StateStore`].
///
/// A `None` entry removes the key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDelta {
    writes: BTreeMap<String, Option<Value>>,
}

impl StateDelta {
    /// Creates an empty delta.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a write of `value` under `key`.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.writes.insert(key.into(), Some(value.into()));
        self
    }

    /// Records a removal of `key`.
    pub fn remove(mut self, key: impl Into<String>) -> Self {
        self.writes.insert(key.into(), None);
        self
    }

    /// Folds `other` into `self`; writes in `other` win.
    pub fn merge(&mut self, other: StateDelta) {
        self.writes.extend(other.writes);
    }

    /// Keys touched by this delta.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.writes.keys()
    }

    /// Keys touched by both deltas.
    pub fn overlapping_keys(&self, other: &StateDelta) -> Vec<String> {
        self.writes
            .keys()
            .filter(|k| other.writes.contains_key(*k))
            .cloned()
            .collect()
    }

    /// The pending operation for `key`, if any.
    pub fn get(&self, key: &str) -> Option<&Option<Value>> {
        self.writes.get(key)
    }

    /// Whether the delta writes nothing.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Steering value returned alongside every worker outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", content = "reason", rename_all = "snake_case")]
pub enum ControlSignal {
    /// Keep going.
    #[default]
    Continue,
    /// Stop the nearest enclosing loop successfully.
    Escalate,
    /// The artifact under review needs another pass.
    RequestRevision(String),
}

impl ControlSignal {
    /// Whether this signal ends the nearest enclosing loop.
    pub fn is_escalate(&self) -> bool {
        matches!(self, ControlSignal::Escalate)
    }
}
