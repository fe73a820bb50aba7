use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, Weak,
    },
    time::{Duration, Instant},
};

use carelog_core::{
    categories::CategoryRegistry,
    prompt::{PasswordPrompt, PromptPurpose},
    storage::KeyValueStore,
};
use tracing::{info, instrument, warn};
use zeroize::Zeroizing;

use crate::{
    credential::{Credential, CredentialStore, PASSWORD_HASH_KEY},
    error::CryptError,
    kdf::{KdfParams, SessionKey},
    migrator::{BulkMigrator, CategoryStatus, MigrationReport},
    proxy::{DataAccessProxy, WritePolicy},
};

pub const ENCRYPTION_ENABLED_KEY: &str = "encryption_enabled";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionStatus {
    Disabled,
    /// Enabled, no session key in memory.
    Locked,
    Unlocked,
}

impl fmt::Display for EncryptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EncryptionStatus::Disabled => "disabled",
            EncryptionStatus::Locked => "locked",
            EncryptionStatus::Unlocked => "unlocked",
        };
        f.write_str(label)
    }
}

/// Bound on consecutive wrong passwords before password checks pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnlockPolicy {
    /// `0` disables the bound.
    pub max_attempts: u32,
    pub lockout: Duration,
}

impl Default for UnlockPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lockout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ManagerOptions {
    pub kdf: KdfParams,
    pub unlock: UnlockPolicy,
    pub registry: CategoryRegistry,
    pub write_policy: WritePolicy,
}

/// Caller-side view of an unlocked session.
///
/// Holds only a weak reference to the key: once the manager locks, disables or rotates
/// the password, every outstanding handle stops decrypting.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    key: Weak<SessionKey>,
}

impl SessionHandle {
    pub fn is_live(&self) -> bool {
        self.key.strong_count() > 0
    }

    pub(crate) fn key(&self) -> Option<Arc<SessionKey>> {
        self.key.upgrade()
    }
}

#[derive(Default)]
struct SessionState {
    enabled: bool,
    key: Option<Arc<SessionKey>>,
    failures: u32,
    locked_out_until: Option<Instant>,
}

impl SessionState {
    fn status(&self) -> EncryptionStatus {
        match (self.enabled, self.key.is_some()) {
            (false, _) => EncryptionStatus::Disabled,
            (true, false) => EncryptionStatus::Locked,
            (true, true) => EncryptionStatus::Unlocked,
        }
    }

    fn install(&mut self, key: Arc<SessionKey>) -> SessionHandle {
        let handle = SessionHandle {
            key: Arc::downgrade(&key),
        };
        self.key = Some(key);
        handle
    }
}

/// Clears the in-flight flag when a transition finishes, fails or is dropped.
struct TransitionGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub(crate) async fn read_enabled_flag<S: KeyValueStore + ?Sized>(
    store: &S,
) -> Result<bool, CryptError> {
    match store.get(ENCRYPTION_ENABLED_KEY).await?.as_deref() {
        None | Some("false") => Ok(false),
        Some("true") => Ok(true),
        Some(other) => Err(CryptError::corrupt(format!(
            "unexpected {ENCRYPTION_ENABLED_KEY} value {other:?}"
        ))),
    }
}

/// Owns the disabled/locked/unlocked state machine and the single in-memory session key.
///
/// Setup, unlock, lock, disable and password changes run one at a time; a second request
/// while one is still in flight fails with [`CryptError::ReentrantOperation`].
pub struct EncryptionManager<S: KeyValueStore> {
    store: Arc<S>,
    credentials: CredentialStore<S>,
    migrator: BulkMigrator<S>,
    options: ManagerOptions,
    state: Mutex<SessionState>,
    in_flight: AtomicBool,
}

impl<S: KeyValueStore> EncryptionManager<S> {
    /// Read the persisted flags. Starts `Locked` when encryption was left enabled.
    #[instrument(skip_all)]
    pub async fn load(store: Arc<S>, options: ManagerOptions) -> Result<Self, CryptError> {
        let credentials = CredentialStore::new(store.clone(), options.kdf);
        let enabled = read_enabled_flag(store.as_ref()).await?;
        if enabled && credentials.load().await?.is_none() {
            return Err(CryptError::corrupt(
                "encryption is enabled but no password hash is stored",
            ));
        }

        info!(enabled, "encryption state loaded");
        Ok(Self {
            migrator: BulkMigrator::new(store.clone(), options.registry.clone()),
            credentials,
            store,
            options,
            state: Mutex::new(SessionState {
                enabled,
                ..SessionState::default()
            }),
            in_flight: AtomicBool::new(false),
        })
    }

    /// Drop the persisted flags so the store reads as disabled. Used to recover from
    /// [`CryptError::CorruptEncryptionState`]; envelopes already stored stay unreadable.
    #[instrument(skip_all)]
    pub async fn force_reset(store: &S) -> Result<(), CryptError> {
        store.set(ENCRYPTION_ENABLED_KEY, "false").await?;
        store.remove(PASSWORD_HASH_KEY).await?;
        warn!("encryption state reset, existing envelopes can no longer be decrypted");
        Ok(())
    }

    pub fn status(&self) -> EncryptionStatus {
        self.state().status()
    }

    pub fn is_enabled(&self) -> bool {
        self.state().enabled
    }

    pub fn is_unlocked(&self) -> bool {
        self.status() == EncryptionStatus::Unlocked
    }

    /// Handle for the active session, if unlocked.
    pub fn session(&self) -> Option<SessionHandle> {
        self.state().key.as_ref().map(|key| SessionHandle {
            key: Arc::downgrade(key),
        })
    }

    pub fn registry(&self) -> &CategoryRegistry {
        self.migrator.registry()
    }

    pub fn proxy(&self) -> DataAccessProxy<S> {
        DataAccessProxy::new(self.store.clone(), self.options.registry.clone())
            .with_write_policy(self.options.write_policy)
    }

    pub async fn inspect(&self) -> Result<Vec<CategoryStatus>, CryptError> {
        self.migrator.inspect().await
    }

    /// Enable encryption: store the credential, encrypt every category, then flip the flag.
    #[instrument(skip_all)]
    pub async fn setup(&self, password: &str) -> Result<SessionHandle, CryptError> {
        let _guard = self.begin_transition()?;
        self.require("enable encryption", &[EncryptionStatus::Disabled])?;

        let credential = self.credentials.setup(password).await?;
        let enabled = async {
            let key = Arc::new(credential.session_key(password)?);
            let plan = self.migrator.plan_encrypt(&key).await?;
            let report = plan.commit().await?;
            if let Err(err) = self.store.set(ENCRYPTION_ENABLED_KEY, "true").await {
                plan.rollback().await;
                return Err(err.into());
            }
            Ok::<_, CryptError>((key, report))
        }
        .await;

        match enabled {
            Ok((key, report)) => {
                let handle = {
                    let mut state = self.state();
                    state.enabled = true;
                    state.failures = 0;
                    state.install(key)
                };
                info!(converted = report.converted.len(), "encryption enabled");
                Ok(handle)
            }
            Err(err) => {
                if let Err(cleanup) = self.credentials.clear().await {
                    warn!(%cleanup, "password hash left behind after failed enable");
                }
                Err(err)
            }
        }
    }

    /// Verify `password` and establish the session key.
    #[instrument(skip_all)]
    pub async fn unlock(&self, password: &str) -> Result<SessionHandle, CryptError> {
        let _guard = self.begin_transition()?;
        let status = self.require(
            "unlock",
            &[EncryptionStatus::Locked, EncryptionStatus::Unlocked],
        )?;
        let credential = self.check_password(password).await?;

        if status == EncryptionStatus::Unlocked {
            if let Some(handle) = self.session() {
                return Ok(handle);
            }
        }
        let key = Arc::new(credential.session_key(password)?);
        let handle = self.state().install(key);
        info!("session unlocked");
        Ok(handle)
    }

    /// Ask `prompt` for the password until it unlocks, the user cancels, or attempts run out.
    pub async fn unlock_with(
        &self,
        prompt: &dyn PasswordPrompt,
    ) -> Result<SessionHandle, CryptError> {
        loop {
            let Some(password) = prompt.request_password(PromptPurpose::Unlock).await else {
                info!("unlock cancelled");
                return Err(CryptError::Cancelled);
            };
            let password = Zeroizing::new(password);
            match self.unlock(&password).await {
                Err(CryptError::WrongPassword) => continue,
                other => return other,
            }
        }
    }

    /// Forget the session key. Encrypted categories stay encrypted.
    pub fn lock(&self) -> Result<(), CryptError> {
        let _guard = self.begin_transition()?;
        if self.state().key.take().is_some() {
            info!("session locked");
        }
        Ok(())
    }

    /// Decrypt every category back to plaintext and forget the credential.
    #[instrument(skip_all)]
    pub async fn disable(&self, password: &str) -> Result<MigrationReport, CryptError> {
        let _guard = self.begin_transition()?;
        self.require(
            "disable encryption",
            &[EncryptionStatus::Locked, EncryptionStatus::Unlocked],
        )?;
        let credential = self.check_password(password).await?;

        let current = self.state().key.clone();
        let key = match current {
            Some(key) => key,
            None => Arc::new(credential.session_key(password)?),
        };

        let plan = self.migrator.plan_decrypt(&key).await?;
        let report = plan.commit().await?;
        if let Err(err) = self.store.set(ENCRYPTION_ENABLED_KEY, "false").await {
            plan.rollback().await;
            return Err(err.into());
        }
        if let Err(err) = self.credentials.clear().await {
            warn!(%err, "password hash left behind after disabling encryption");
        }

        {
            let mut state = self.state();
            state.enabled = false;
            state.key = None;
            state.failures = 0;
        }
        info!(converted = report.converted.len(), "encryption disabled");
        Ok(report)
    }

    /// Rotate the password: re-encrypt every category under a key derived from
    /// `new_password`, then store the new credential. Outstanding handles go dead.
    ///
    /// The hash write is the commit point. If it fails the categories are rolled back
    /// to the old key, so the stored hash always matches the key the data is under.
    #[instrument(skip_all)]
    pub async fn change_password(
        &self,
        old_password: &str,
        new_password: &str,
    ) -> Result<SessionHandle, CryptError> {
        let _guard = self.begin_transition()?;
        self.require("change password", &[EncryptionStatus::Unlocked])?;
        self.check_password(old_password).await?;

        let old_key = self.state().key.clone().ok_or(CryptError::Locked)?;
        let new_credential = Credential::derive(new_password, self.credentials.params())?;
        let new_key = Arc::new(new_credential.session_key(new_password)?);

        let plan = self.migrator.plan_rekey(&old_key, &new_key).await?;
        let report = plan.commit().await?;
        if let Err(err) = self.credentials.replace(&new_credential).await {
            plan.rollback().await;
            return Err(err);
        }

        let handle = self.state().install(new_key);
        info!(converted = report.converted.len(), "password changed");
        Ok(handle)
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_transition(&self) -> Result<TransitionGuard<'_>, CryptError> {
        self.in_flight
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .map_err(|_| CryptError::ReentrantOperation)?;
        Ok(TransitionGuard {
            flag: &self.in_flight,
        })
    }

    fn require(
        &self,
        operation: &'static str,
        allowed: &[EncryptionStatus],
    ) -> Result<EncryptionStatus, CryptError> {
        let status = self.status();
        if allowed.contains(&status) {
            Ok(status)
        } else {
            Err(CryptError::InvalidState {
                operation,
                state: status,
            })
        }
    }

    async fn check_password(&self, password: &str) -> Result<Credential, CryptError> {
        self.ensure_not_locked_out()?;
        let credential = self
            .credentials
            .load()
            .await?
            .ok_or_else(|| CryptError::corrupt("no password hash stored"))?;

        if credential.verify(password) {
            self.state().failures = 0;
            Ok(credential)
        } else {
            self.record_failure();
            Err(CryptError::WrongPassword)
        }
    }

    fn ensure_not_locked_out(&self) -> Result<(), CryptError> {
        let mut state = self.state();
        if let Some(until) = state.locked_out_until {
            let now = Instant::now();
            if now < until {
                return Err(CryptError::TooManyAttempts {
                    retry_after: until - now,
                });
            }
            state.locked_out_until = None;
        }
        Ok(())
    }

    fn record_failure(&self) {
        let policy = self.options.unlock;
        let mut state = self.state();
        state.failures += 1;
        warn!(failures = state.failures, "password rejected");
        if policy.max_attempts > 0 && state.failures >= policy.max_attempts {
            state.failures = 0;
            state.locked_out_until = Some(Instant::now() + policy.lockout);
            warn!(
                lockout_secs = policy.lockout.as_secs(),
                "too many failed attempts, pausing password checks"
            );
        }
    }
}
