use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use crate::{Error, Result};

/// Namespace prefix for all keys the engine writes, distinguishing them from
/// unrelated data in a shared store.
pub(crate) const KEY_NAMESPACE: &str = "eventgate";

pub(crate) fn last_activated_at_key(event_id: &str) -> String {
    format!("{}.{}.lastActivatedAt", KEY_NAMESPACE, event_id)
}

pub(crate) fn activation_count_key(event_id: &str) -> String {
    format!("{}.{}.activationCount", KEY_NAMESPACE, event_id)
}

/// Key-value persistence consumed by [`EligibilityEngine`].
///
/// Implement this to back the engine with a defaults file, a database, or any
/// other durable store. Values are structured JSON and must round-trip through
/// whatever serialization the store uses; the engine never inspects raw bytes.
///
/// [`EligibilityEngine`]: crate::EligibilityEngine
pub trait EventStore {
    /// Store `value` under `key`, overwriting any previous value.
    fn set(&self, key: &str, value: serde_json::Value) -> Result<()>;

    /// Fetch the value under `key`. An absent key is `Ok(None)`, never an
    /// error.
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Delete the value under `key`. May return [`Error::ValueNotFound`] for
    /// an absent key; the engine treats that as a non-fatal no-op.
    fn remove(&self, key: &str) -> Result<()>;
}

/// `InMemoryStore` is a thread-safe, non-durable [`EventStore`] backed by a
/// `HashMap`. Suitable for tests and for embedders that persist elsewhere.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    values: RwLock<HashMap<String, serde_json::Value>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventStore for InMemoryStore {
    fn set(&self, key: &str, value: serde_json::Value) -> Result<()> {
        // A poisoned lock means a writer panicked while holding it. The map
        // itself is still usable, so recover the guard instead of crashing.
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_owned(), value);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        match values.remove(key) {
            Some(_) => Ok(()),
            None => Err(Error::ValueNotFound),
        }
    }
}
