use std::{path::PathBuf, sync::Arc};

use carelog_crypto::{CryptError, EncryptionManager};
use carelog_storage::file_store::FileStore;
use color_eyre::{eyre::eyre, Result};
use dirs::data_dir;
use tracing::debug;

use crate::config::Config;

/// Resolve the default data directory for Carelog.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| eyre!("no data dir available"))?;
    Ok(base.join("carelog"))
}

/// Build the record store, honoring the config override.
pub fn store_from_config(config: &Config) -> Result<FileStore> {
    let root = match &config.data_dir {
        Some(root) => root.clone(),
        None => default_data_dir()?,
    };
    debug!(?root, "initializing record store");
    Ok(FileStore::new(root))
}

/// Load the encryption manager over the configured store.
pub async fn open_manager(config: &Config) -> Result<EncryptionManager<FileStore>> {
    let store = Arc::new(store_from_config(config)?);
    match EncryptionManager::load(store, config.manager_options()).await {
        Ok(manager) => Ok(manager),
        Err(err @ CryptError::CorruptEncryptionState { .. }) => Err(eyre!(
            "{err}\nrun `carelog reset --force` to clear the encryption flags"
        )),
        Err(err) => Err(err.into()),
    }
}
