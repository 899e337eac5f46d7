//! Shared context and run parameters.
//!
//! The [`SharedContext`] is the sole channel by which tasks in one traversal
//! communicate: an open-ended string-keyed map of JSON values that every
//! node may read and write. The engine never validates shape or key
//! existence; missing-key handling belongs to task implementations.
//!
//! The context is a cheap-clone handle: clones share the same underlying
//! map, so concurrent batch items and parallel batch-flow traversals all
//! observe the same store. There is no cross-key transactionality and
//! same-key concurrent writes race; concurrent tasks writing disjoint keys
//! is the supported pattern. The lock is synchronous and never held across
//! a suspension point.

use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::FlowError;

/// Mutable key/value store shared by all nodes of one workflow traversal.
#[derive(Debug, Clone, Default)]
pub struct SharedContext {
    inner: Arc<RwLock<Map<String, Value>>>,
}

impl SharedContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context seeded from an existing map (e.g. a persisted
    /// snapshot a caller re-seeds before resuming a workflow).
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Map<String, Value>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Map<String, Value>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Get a clone of the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.read().get(key).cloned()
    }

    /// Get the value under `key` deserialized into a concrete type.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, FlowError> {
        match self.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Insert a serializable value under `key`, replacing any previous value.
    pub fn insert<T: Serialize>(&self, key: impl Into<String>, value: T) -> Result<(), FlowError> {
        let value = serde_json::to_value(value)?;
        self.write().insert(key.into(), value);
        Ok(())
    }

    /// Insert a raw JSON value under `key`.
    pub fn insert_value(&self, key: impl Into<String>, value: Value) {
        self.write().insert(key.into(), value);
    }

    /// Replace the value under `key` with the result of `f` applied to the
    /// current value. The update runs under the write lock, so read-modify-
    /// write sequences on a single key do not interleave.
    pub fn update(&self, key: impl Into<String>, f: impl FnOnce(Option<Value>) -> Value) {
        let key = key.into();
        let mut map = self.write();
        let current = map.remove(&key);
        map.insert(key, f(current));
    }

    /// Remove and return the value under `key`.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.write().remove(key)
    }

    /// Check whether `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    /// Number of keys in the context.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Check whether the context is empty.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Clone the full map, e.g. to hand to a persistence collaborator.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.read().clone()
    }
}

/// Immutable-per-step configuration bound to a node just before it runs.
///
/// Distinct from the [`SharedContext`]: run parameters are rebuilt per
/// traversal (flow level) or per batch entry (batch flow level) and are not
/// visible across nodes except through the context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunParams(Map<String, Value>);

impl RunParams {
    /// Create an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Get the value bound under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Get the value under `key` as a string slice, if it is a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Merge `overrides` over this set, producing the per-step binding:
    /// keys in `overrides` win.
    pub fn merged(&self, overrides: &RunParams) -> RunParams {
        let mut map = self.0.clone();
        for (key, value) in &overrides.0 {
            map.insert(key.clone(), value.clone());
        }
        RunParams(map)
    }

    /// Interpret a JSON object as a parameter set. Returns `None` for
    /// non-object values.
    pub fn from_value(value: &Value) -> Option<RunParams> {
        value.as_object().map(|map| RunParams(map.clone()))
    }

    /// Number of bound parameters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check whether no parameters are bound.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over bound parameters.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}
