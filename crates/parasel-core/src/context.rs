use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ParaselError, Result};

/// Unguarded key-value store for a single owner.
///
/// This is the plain form of the run context: mutation takes `&mut self`, so
/// the borrow checker rules out concurrent access. Wrap it in a [`Context`]
/// to share it across concurrently running steps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextMap {
    data: HashMap<String, Value>,
    #[serde(skip)]
    accessed: HashSet<String>,
    #[serde(skip)]
    written: HashSet<String>,
}

impl ContextMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ContextMap from initial data.
    pub fn from_map(data: HashMap<String, Value>) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    /// Build from a JSON object. Non-object values yield an empty map.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(obj) => Self::from_map(obj.into_iter().collect()),
            _ => Self::default(),
        }
    }

    /// Get a value by key, recording the read.
    pub fn get(&mut self, key: &str) -> Option<Value> {
        self.accessed.insert(key.to_string());
        self.data.get(key).cloned()
    }

    /// Get a value by key, or `default` when absent.
    pub fn get_or(&mut self, key: &str, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    /// Strict accessor: a missing key is an error.
    pub fn require(&mut self, key: &str) -> Result<Value> {
        self.get(key)
            .ok_or_else(|| ParaselError::KeyNotFound(key.to_string()))
    }

    /// Set a value, overwriting any previous one.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        self.written.insert(key.clone());
        self.data.insert(key, value);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.written.insert(key.to_string());
        self.data.remove(key)
    }

    /// Merge a batch of values (overwrites on conflict).
    pub fn update(&mut self, other: HashMap<String, Value>) {
        for (k, v) in other {
            self.set(k, v);
        }
    }

    /// Merge `value` into a sequence stored at `key`.
    ///
    /// - absent (or `null`) → `[value]`
    /// - array → `value` appended
    /// - anything else → `[old, value]`
    pub fn accumulate(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        self.written.insert(key.clone());
        let slot = self.data.entry(key).or_insert(Value::Null);
        if let Value::Array(items) = slot {
            items.push(value);
            return;
        }
        let old = slot.take();
        *slot = if old.is_null() {
            Value::Array(vec![value])
        } else {
            Value::Array(vec![old, value])
        };
    }

    pub fn keys(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Copy of the underlying data.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.data.clone()
    }

    /// Get the underlying data map.
    pub fn data(&self) -> &HashMap<String, Value> {
        &self.data
    }

    pub fn into_data(self) -> HashMap<String, Value> {
        self.data
    }

    /// Keys read during the run (diagnostics only).
    pub fn accessed_keys(&self) -> HashSet<String> {
        self.accessed.clone()
    }

    /// Keys written during the run (diagnostics only).
    pub fn written_keys(&self) -> HashSet<String> {
        self.written.clone()
    }

    /// The data as a JSON object.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.data
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

/// Shared, guarded run context.
///
/// Cloning the handle is cheap; every clone refers to the same store. Each
/// operation holds the lock for its whole duration, so `accumulate` is
/// atomic with respect to every other operation on the context. There is no
/// multi-key atomicity: two calls are two critical sections.
#[derive(Debug, Clone, Default)]
pub struct Context {
    inner: Arc<Mutex<ContextMap>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(data: HashMap<String, Value>) -> Self {
        ContextMap::from_map(data).into()
    }

    pub fn from_json(value: Value) -> Self {
        ContextMap::from_json(value).into()
    }

    // The map only ever holds complete values, so a poisoned lock still
    // guards consistent data.
    fn lock(&self) -> MutexGuard<'_, ContextMap> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key)
    }

    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.lock().get_or(key, default)
    }

    pub fn require(&self, key: &str) -> Result<Value> {
        self.lock().require(key)
    }

    /// Get a value as an `i64`, if it is an integer.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.as_i64())
    }

    /// Get a value as an `f64`, if it is a number.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.as_f64())
    }

    /// Get a value as an owned string, if it is a string.
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(str::to_string))
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.lock().set(key, value);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains(key)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.lock().remove(key)
    }

    pub fn update(&self, other: HashMap<String, Value>) {
        self.lock().update(other);
    }

    /// Atomic append-or-listify. See [`ContextMap::accumulate`].
    pub fn accumulate(&self, key: impl Into<String>, value: Value) {
        self.lock().accumulate(key, value);
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().keys()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.lock().snapshot()
    }

    pub fn to_json(&self) -> Value {
        self.lock().to_json()
    }

    pub fn accessed_keys(&self) -> HashSet<String> {
        self.lock().accessed_keys()
    }

    pub fn written_keys(&self) -> HashSet<String> {
        self.lock().written_keys()
    }

    /// Copy out the unguarded form, including the read/write tracking.
    pub fn to_map(&self) -> ContextMap {
        self.lock().clone()
    }
}

impl From<ContextMap> for Context {
    fn from(map: ContextMap) -> Self {
        Self {
            inner: Arc::new(Mutex::new(map)),
        }
    }
}

impl From<HashMap<String, Value>> for Context {
    fn from(data: HashMap<String, Value>) -> Self {
        Self::from_map(data)
    }
}
