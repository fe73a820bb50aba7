use std::{fmt, sync::Arc};

use carelog_core::{
    categories::{CategoryRegistry, DataCategory},
    storage::KeyValueStore,
};
use tracing::{error, info, instrument, warn};

use crate::{
    codec::{self, CipherEnvelope},
    error::CryptError,
    kdf::SessionKey,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationDirection {
    Encrypt,
    Decrypt,
    /// Decrypt under the old key and encrypt under the new one in a single pass.
    Rekey,
}

impl fmt::Display for MigrationDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MigrationDirection::Encrypt => "encrypt",
            MigrationDirection::Decrypt => "decrypt",
            MigrationDirection::Rekey => "rekey",
        };
        f.write_str(label)
    }
}

/// Outcome of a committed pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub direction: MigrationDirection,
    /// Categories whose stored value was rewritten.
    pub converted: Vec<DataCategory>,
    /// Categories already in the target form or not stored at all.
    pub skipped: Vec<DataCategory>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    Missing,
    Plaintext,
    Encrypted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryStatus {
    pub category: DataCategory,
    pub state: RecordState,
}

/// Converts every registered category between plaintext and envelopes.
pub struct BulkMigrator<S: KeyValueStore> {
    store: Arc<S>,
    registry: CategoryRegistry,
}

impl<S: KeyValueStore> BulkMigrator<S> {
    pub fn new(store: Arc<S>, registry: CategoryRegistry) -> Self {
        Self { store, registry }
    }

    pub fn registry(&self) -> &CategoryRegistry {
        &self.registry
    }

    pub async fn encrypt_all(&self, key: &SessionKey) -> Result<MigrationReport, CryptError> {
        self.plan_encrypt(key).await?.commit().await
    }

    pub async fn decrypt_all(&self, key: &SessionKey) -> Result<MigrationReport, CryptError> {
        self.plan_decrypt(key).await?.commit().await
    }

    pub async fn rekey_all(
        &self,
        old: &SessionKey,
        new: &SessionKey,
    ) -> Result<MigrationReport, CryptError> {
        self.plan_rekey(old, new).await?.commit().await
    }

    /// Snapshot every category and encode the plaintext ones in memory. Nothing is written.
    #[instrument(skip_all, fields(categories = self.registry.len()))]
    pub async fn plan_encrypt(
        &self,
        key: &SessionKey,
    ) -> Result<MigrationPlan<'_, S>, CryptError> {
        self.plan(MigrationDirection::Encrypt, |value| match CipherEnvelope::parse(value) {
            Some(_) => Ok(None),
            None => codec::encode(value, key).map(|e| Some(e.into_string())),
        })
        .await
    }

    /// Snapshot every category and decode the envelopes in memory. A single envelope that
    /// fails to decode aborts the whole plan.
    #[instrument(skip_all, fields(categories = self.registry.len()))]
    pub async fn plan_decrypt(
        &self,
        key: &SessionKey,
    ) -> Result<MigrationPlan<'_, S>, CryptError> {
        self.plan(MigrationDirection::Decrypt, |value| match CipherEnvelope::parse(value) {
            Some(envelope) => codec::decode(&envelope, key).map(Some),
            None => Ok(None),
        })
        .await
    }

    #[instrument(skip_all, fields(categories = self.registry.len()))]
    pub async fn plan_rekey(
        &self,
        old: &SessionKey,
        new: &SessionKey,
    ) -> Result<MigrationPlan<'_, S>, CryptError> {
        self.plan(MigrationDirection::Rekey, |value| {
            let plaintext = match CipherEnvelope::parse(value) {
                Some(envelope) => codec::decode(&envelope, old)?,
                None => value.to_string(),
            };
            codec::encode(&plaintext, new).map(|e| Some(e.into_string()))
        })
        .await
    }

    /// Classify each registered category without decoding anything.
    pub async fn inspect(&self) -> Result<Vec<CategoryStatus>, CryptError> {
        let mut statuses = Vec::with_capacity(self.registry.len());
        for category in self.registry.iter() {
            let state = match self.store.get(category.key()).await? {
                None => RecordState::Missing,
                Some(value) if codec::is_envelope(&value) => RecordState::Encrypted,
                Some(_) => RecordState::Plaintext,
            };
            statuses.push(CategoryStatus {
                category: category.clone(),
                state,
            });
        }
        Ok(statuses)
    }

    async fn plan<F>(
        &self,
        direction: MigrationDirection,
        mut transform: F,
    ) -> Result<MigrationPlan<'_, S>, CryptError>
    where
        F: FnMut(&str) -> Result<Option<String>, CryptError>,
    {
        let mut writes = Vec::new();
        let mut skipped = Vec::new();
        for category in self.registry.iter() {
            let Some(original) = self.store.get(category.key()).await? else {
                skipped.push(category.clone());
                continue;
            };
            let replacement = transform(&original).map_err(|err| match err {
                CryptError::DecryptionFailed { reason } => CryptError::DecryptionFailed {
                    reason: format!("{category}: {reason}"),
                },
                other => other,
            })?;
            match replacement {
                Some(replacement) => writes.push(PendingWrite {
                    category: category.clone(),
                    original,
                    replacement,
                }),
                None => skipped.push(category.clone()),
            }
        }

        Ok(MigrationPlan {
            store: self.store.as_ref(),
            direction,
            writes,
            skipped,
        })
    }
}

struct PendingWrite {
    category: DataCategory,
    original: String,
    replacement: String,
}

/// A fully transformed snapshot waiting to be written.
///
/// `commit` either writes every pending category or restores the ones it already wrote.
/// `rollback` puts the snapshot back after a later step of a transition failed.
pub struct MigrationPlan<'a, S: KeyValueStore> {
    store: &'a S,
    direction: MigrationDirection,
    writes: Vec<PendingWrite>,
    skipped: Vec<DataCategory>,
}

impl<S: KeyValueStore> MigrationPlan<'_, S> {
    pub fn direction(&self) -> MigrationDirection {
        self.direction
    }

    pub fn pending(&self) -> impl Iterator<Item = &DataCategory> {
        self.writes.iter().map(|w| &w.category)
    }

    #[instrument(skip_all, fields(direction = %self.direction, pending = self.writes.len()))]
    pub async fn commit(&self) -> Result<MigrationReport, CryptError> {
        for (index, write) in self.writes.iter().enumerate() {
            if let Err(err) = self
                .store
                .set(write.category.key(), &write.replacement)
                .await
            {
                warn!(category = %write.category, %err, "migration write failed, restoring snapshot");
                self.restore(&self.writes[..index]).await;
                return Err(err.into());
            }
        }

        let report = self.report();
        info!(
            direction = %self.direction,
            converted = report.converted.len(),
            skipped = report.skipped.len(),
            "migration committed"
        );
        Ok(report)
    }

    #[instrument(skip_all, fields(direction = %self.direction))]
    pub async fn rollback(&self) {
        self.restore(&self.writes).await;
    }

    fn report(&self) -> MigrationReport {
        MigrationReport {
            direction: self.direction,
            converted: self.pending().cloned().collect(),
            skipped: self.skipped.clone(),
        }
    }

    async fn restore(&self, written: &[PendingWrite]) {
        for write in written.iter().rev() {
            if let Err(err) = self.store.set(write.category.key(), &write.original).await {
                error!(
                    category = %write.category,
                    %err,
                    "rollback failed, category left in {} form",
                    self.direction
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use carelog_core::storage::InMemoryStore;

    use super::*;
    use crate::test_support::{key, FlakyStore};

    const MEDS: &str = r#"[{"name":"aspirin","dose":"81mg"}]"#;
    const VITALS: &str = r#"[{"bp":"120/80"}]"#;

    fn seeded() -> Arc<InMemoryStore> {
        Arc::new(InMemoryStore::with_entries([
            ("medications", MEDS),
            ("vitals", VITALS),
            ("theme", "dark"),
        ]))
    }

    #[tokio::test]
    async fn encrypt_all_converts_only_stored_plaintext_categories() {
        let store = seeded();
        let migrator = BulkMigrator::new(store.clone(), CategoryRegistry::default());

        let report = migrator.encrypt_all(&key(1)).await.expect("encrypt");
        let converted: Vec<&str> = report.converted.iter().map(DataCategory::key).collect();
        assert_eq!(converted, vec!["medications", "vitals"]);
        assert_eq!(report.skipped.len(), 3);

        let snapshot = store.snapshot();
        assert!(codec::is_envelope(&snapshot["medications"]));
        assert!(codec::is_envelope(&snapshot["vitals"]));
        assert_eq!(snapshot["theme"], "dark");
    }

    #[tokio::test]
    async fn encrypt_all_is_idempotent() {
        let store = seeded();
        let migrator = BulkMigrator::new(store.clone(), CategoryRegistry::default());

        migrator.encrypt_all(&key(1)).await.expect("first pass");
        let after_first = store.snapshot();
        let second = migrator.encrypt_all(&key(1)).await.expect("second pass");

        assert!(second.converted.is_empty());
        assert_eq!(store.snapshot(), after_first);
    }

    #[tokio::test]
    async fn decrypt_all_restores_exact_plaintext() {
        let store = seeded();
        let migrator = BulkMigrator::new(store.clone(), CategoryRegistry::default());
        let before = store.snapshot();

        migrator.encrypt_all(&key(1)).await.expect("encrypt");
        let report = migrator.decrypt_all(&key(1)).await.expect("decrypt");

        assert_eq!(report.converted.len(), 2);
        assert_eq!(store.snapshot(), before);
        let again = migrator.decrypt_all(&key(1)).await.expect("decrypt again");
        assert!(again.converted.is_empty());
    }

    #[tokio::test]
    async fn decrypt_with_wrong_key_writes_nothing() {
        let store = seeded();
        let migrator = BulkMigrator::new(store.clone(), CategoryRegistry::default());
        migrator.encrypt_all(&key(1)).await.expect("encrypt");
        let encrypted = store.snapshot();

        let err = migrator.decrypt_all(&key(9)).await.expect_err("wrong key");
        match err {
            CryptError::DecryptionFailed { reason } => {
                assert!(reason.starts_with("medications"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.snapshot(), encrypted);
    }

    #[tokio::test]
    async fn rekey_moves_every_category_to_the_new_key() {
        let store = seeded();
        let migrator = BulkMigrator::new(store.clone(), CategoryRegistry::default());
        migrator.encrypt_all(&key(1)).await.expect("encrypt");
        store.set("journal", "stray plaintext").await.expect("set");

        let report = migrator.rekey_all(&key(1), &key(2)).await.expect("rekey");
        assert_eq!(report.converted.len(), 3);

        assert!(migrator.decrypt_all(&key(1)).await.is_err());
        migrator.decrypt_all(&key(2)).await.expect("decrypt under new key");
        let snapshot = store.snapshot();
        assert_eq!(snapshot["medications"], MEDS);
        assert_eq!(snapshot["journal"], "stray plaintext");
    }

    #[tokio::test]
    async fn failed_write_restores_categories_already_written() {
        let store = Arc::new(FlakyStore::with_entries([
            ("medications", MEDS),
            ("vitals", VITALS),
        ]));
        store.fail_sets_to("vitals");
        let migrator = BulkMigrator::new(store.clone(), CategoryRegistry::default());

        let err = migrator.encrypt_all(&key(1)).await.expect_err("write fails");
        assert!(matches!(err, CryptError::StorageUnavailable(_)));

        let snapshot = store.inner.snapshot();
        assert_eq!(snapshot["medications"], MEDS);
        assert_eq!(snapshot["vitals"], VITALS);
    }

    #[tokio::test]
    async fn rollback_after_commit_restores_snapshot() {
        let store = seeded();
        let migrator = BulkMigrator::new(store.clone(), CategoryRegistry::default());
        let before = store.snapshot();

        let plan = migrator.plan_encrypt(&key(1)).await.expect("plan");
        assert_eq!(plan.direction(), MigrationDirection::Encrypt);
        plan.commit().await.expect("commit");
        assert_ne!(store.snapshot(), before);

        plan.rollback().await;
        assert_eq!(store.snapshot(), before);
    }

    #[tokio::test]
    async fn inspect_classifies_categories() {
        let store = seeded();
        let registry = CategoryRegistry::new(["vitals", "medications", "journal"]);
        let migrator = BulkMigrator::new(store.clone(), registry);
        store
            .set("vitals", codec::encode(VITALS, &key(1)).expect("encode").as_str())
            .await
            .expect("set");

        let states: Vec<RecordState> = migrator
            .inspect()
            .await
            .expect("inspect")
            .into_iter()
            .map(|s| s.state)
            .collect();
        assert_eq!(
            states,
            vec![RecordState::Encrypted, RecordState::Plaintext, RecordState::Missing]
        );
    }
}
