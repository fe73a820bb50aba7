use std::sync::Arc;

use carelog_core::{categories::CategoryRegistry, storage::KeyValueStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::{
    codec::{self, CipherEnvelope},
    error::CryptError,
    session::{read_enabled_flag, SessionHandle},
};

/// What a write to a registered category does while encryption is enabled but locked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// Refuse with [`CryptError::Locked`].
    #[default]
    Reject,
    /// Store the raw value. Unlocking leaves it as is; it stays plaintext until the
    /// next password change re-encrypts every category.
    Plaintext,
}

/// Read/write facade for the rest of the application. Applies the codec to registered
/// categories whenever the caller holds a live session.
pub struct DataAccessProxy<S: KeyValueStore> {
    store: Arc<S>,
    registry: CategoryRegistry,
    write_policy: WritePolicy,
}

impl<S: KeyValueStore> DataAccessProxy<S> {
    pub fn new(store: Arc<S>, registry: CategoryRegistry) -> Self {
        Self {
            store,
            registry,
            write_policy: WritePolicy::default(),
        }
    }

    pub fn with_write_policy(mut self, write_policy: WritePolicy) -> Self {
        self.write_policy = write_policy;
        self
    }

    /// Stored value for `key`, decoded when it is an envelope and `session` is live.
    ///
    /// Without a live session the stored value comes back unchanged, envelope included.
    #[instrument(skip_all, fields(key))]
    pub async fn read(
        &self,
        session: Option<&SessionHandle>,
        key: &str,
    ) -> Result<Option<String>, CryptError> {
        let Some(stored) = self.store.get(key).await? else {
            return Ok(None);
        };
        let Some(envelope) = CipherEnvelope::parse(&stored) else {
            return Ok(Some(stored));
        };
        let Some(session_key) = session.and_then(SessionHandle::key) else {
            debug!("no live session, returning envelope as stored");
            return Ok(Some(stored));
        };

        codec::decode(&envelope, &session_key).map(Some).map_err(|err| {
            warn!(%err, "stored envelope could not be decoded");
            err
        })
    }

    #[instrument(skip_all, fields(key))]
    pub async fn write(
        &self,
        session: Option<&SessionHandle>,
        key: &str,
        value: &str,
    ) -> Result<(), CryptError> {
        if !self.registry.contains(key) {
            return self.store.set(key, value).await.map_err(CryptError::from);
        }

        if let Some(session_key) = session.and_then(SessionHandle::key) {
            let envelope = codec::encode(value, &session_key)?;
            return self
                .store
                .set(key, envelope.as_str())
                .await
                .map_err(CryptError::from);
        }

        if read_enabled_flag(self.store.as_ref()).await? {
            match self.write_policy {
                WritePolicy::Reject => return Err(CryptError::Locked),
                WritePolicy::Plaintext => {
                    warn!("encryption is locked, storing plaintext");
                }
            }
        }
        self.store.set(key, value).await.map_err(CryptError::from)
    }

    pub async fn remove(&self, key: &str) -> Result<(), CryptError> {
        self.store.remove(key).await.map_err(CryptError::from)
    }
}
