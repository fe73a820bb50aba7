use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use carelog_core::storage::{InMemoryStore, KeyValueStore, StoreError};
use tokio::sync::Notify;

use crate::kdf::{KdfParams, SessionKey};

/// Cheap Argon2 costs so tests do not spend seconds per derivation.
pub const TEST_KDF: KdfParams = KdfParams {
    memory_kib: 256,
    iterations: 1,
    parallelism: 1,
};

pub fn key(seed: u8) -> SessionKey {
    SessionKey::from_bytes([seed; 32])
}

/// Store double whose writes to chosen keys fail on demand.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemoryStore,
    failing_sets: Mutex<HashSet<String>>,
    fail_reads: AtomicBool,
}

impl FlakyStore {
    pub fn with_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            inner: InMemoryStore::with_entries(entries),
            ..Self::default()
        }
    }

    pub fn fail_sets_to(&self, key: &str) {
        self.failing_sets
            .lock()
            .expect("lock")
            .insert(key.to_string());
    }

    pub fn heal(&self) {
        self.failing_sets.lock().expect("lock").clear();
        self.fail_reads.store(false, Ordering::SeqCst);
    }

    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("injected read failure"));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if self.failing_sets.lock().expect("lock").contains(key) {
            return Err(StoreError::unavailable(format!("injected failure writing {key}")));
        }
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.inner.remove(key).await
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.inner.keys().await
    }
}

/// Store double that parks the first write after `arm` until `release` is called,
/// so a test can observe a transition while its migration pass is in flight.
#[derive(Default)]
pub struct GatedStore {
    pub inner: InMemoryStore,
    armed: AtomicBool,
    pub entered: Notify,
    release: Notify,
}

impl GatedStore {
    pub fn with_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            inner: InMemoryStore::with_entries(entries),
            ..Self::default()
        }
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl KeyValueStore for GatedStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.inner.remove(key).await
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.inner.keys().await
    }
}
