use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use thiserror::Error;

/// Errors produced by key-value store implementations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Underlying persistence failed or is not reachable.
    #[error("storage unavailable: {reason}")]
    Unavailable { reason: String },
}

impl StoreError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        StoreError::Unavailable {
            reason: reason.into(),
        }
    }
}

/// Named-record storage used for both the encryption flags and the protected categories.
///
/// Values are opaque strings; the store never inspects them and never encrypts on its own.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Retrieve the value for a key, `None` when nothing is stored.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Persist a value under a key, overwriting any existing entry.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove a key and its value (idempotent).
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Enumerate every stored key in lexicographic order.
    async fn keys(&self) -> Result<Vec<String>, StoreError>;
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    inner: Arc<Mutex<BTreeMap<String, String>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with existing records.
    pub fn with_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let map = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            inner: Arc::new(Mutex::new(map)),
        }
    }

    /// Copy of everything currently stored.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        match self.inner.lock() {
            Ok(map) => map.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let map = self
            .inner
            .lock()
            .map_err(|err| StoreError::unavailable(format!("lock poisoned: {err}")))?;
        Ok(map.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut map = self
            .inner
            .lock()
            .map_err(|err| StoreError::unavailable(format!("lock poisoned: {err}")))?;
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut map = self
            .inner
            .lock()
            .map_err(|err| StoreError::unavailable(format!("lock poisoned: {err}")))?;
        map.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let map = self
            .inner
            .lock()
            .map_err(|err| StoreError::unavailable(format!("lock poisoned: {err}")))?;
        Ok(map.keys().cloned().collect())
    }
}
