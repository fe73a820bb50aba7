use std::{
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use carelog_core::storage::{KeyValueStore, StoreError};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, instrument, warn};

const RECORD_EXTENSION: &str = "json";

/// File-backed store: one JSON file per key under `root`, replaced atomically on write.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.{RECORD_EXTENSION}", sanitize_key(key)))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    key: String,
    value: String,
}

#[async_trait]
impl KeyValueStore for FileStore {
    #[instrument(skip_all, fields(key))]
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key);
        match read_record(&path)? {
            Some(record) => Ok(Some(record.value)),
            None => Ok(None),
        }
    }

    #[instrument(skip_all, fields(key))]
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let record = StoredRecord {
            key: key.to_string(),
            value: value.to_string(),
        };
        write_record(&self.path_for(key), &record)
    }

    #[instrument(skip_all, fields(key))]
    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(storage_err(err)),
        }
    }

    #[instrument(skip_all)]
    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(storage_err(err)),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let path = entry.map_err(storage_err)?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            match unsanitize_key(stem) {
                Some(key) => keys.push(key),
                None => warn!(?path, "skipping file with unrecognized name"),
            }
        }
        keys.sort();
        debug!(count = keys.len(), "enumerated stored keys");
        Ok(keys)
    }
}

fn write_record(path: &Path, record: &StoredRecord) -> Result<(), StoreError> {
    let parent = path
        .parent()
        .ok_or_else(|| StoreError::unavailable("invalid storage path"))?;
    fs::create_dir_all(parent).map_err(storage_err)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(storage_err)?;
    let json = serde_json::to_vec(record).map_err(storage_err)?;
    tmp.write_all(&json).map_err(storage_err)?;
    tmp.flush().map_err(storage_err)?;
    tmp.persist(path).map_err(|e| storage_err(e.error))?;
    Ok(())
}

fn read_record(path: &Path) -> Result<Option<StoredRecord>, StoreError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(storage_err(err)),
    };

    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(storage_err)?;
    serde_json::from_slice(&buf).map(Some).map_err(storage_err)
}

fn sanitize_key(key: &str) -> String {
    URL_SAFE_NO_PAD.encode(key)
}

fn unsanitize_key(stem: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(stem).ok()?;
    String::from_utf8(bytes).ok()
}

fn storage_err<E: ToString>(err: E) -> StoreError {
    StoreError::Unavailable {
        reason: err.to_string(),
    }
}
