use std::{fmt, sync::Arc};

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, Params,
};
use carelog_core::storage::KeyValueStore;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::{
    error::CryptError,
    kdf::{derive_session_key, KdfParams, SessionKey},
};

pub const MIN_PASSWORD_LEN: usize = 8;
pub const PASSWORD_HASH_KEY: &str = "password_hash";

const SALT_LEN: usize = 16;
const SESSION_SALT_CONTEXT: &[u8] = b"carelog/session-key/v1";

/// Reject passwords shorter than [`MIN_PASSWORD_LEN`] characters.
pub fn validate_password(password: &str) -> Result<(), CryptError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(CryptError::WeakPassword {
            min: MIN_PASSWORD_LEN,
        });
    }
    Ok(())
}

/// One-way verifier for the user's password, stored as an Argon2id PHC string.
///
/// The session key is derived from the same password but under a different salt, so the
/// persisted hash never doubles as key material.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    password_hash: String,
}

impl Credential {
    pub fn derive(password: &str, params: &KdfParams) -> Result<Self, CryptError> {
        validate_password(password)?;

        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let salt = SaltString::encode_b64(&salt).map_err(|e| CryptError::KeyDerivation {
            reason: format!("salt encode: {e}"),
        })?;

        let password_hash = params
            .argon2(None)?
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| CryptError::KeyDerivation {
                reason: format!("password hash: {e}"),
            })?
            .to_string();
        Ok(Self { password_hash })
    }

    /// Wrap a persisted hash, rejecting values that are not a PHC string.
    pub fn from_stored(password_hash: String) -> Result<Self, CryptError> {
        PasswordHash::new(&password_hash)
            .map_err(|e| CryptError::corrupt(format!("unreadable password hash: {e}")))?;
        Ok(Self { password_hash })
    }

    pub fn as_str(&self) -> &str {
        &self.password_hash
    }

    /// Recompute the hash for `password` with the stored parameters and compare in
    /// constant time.
    pub fn verify(&self, password: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(&self.password_hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }

    /// Session key for `password`. Only meaningful after [`Credential::verify`] succeeded.
    ///
    /// Argon2 costs come from the stored hash, not from the current configuration, so
    /// retuning [`KdfParams`] only affects credentials created afterwards.
    pub fn session_key(&self, password: &str) -> Result<SessionKey, CryptError> {
        let parsed = self.parsed()?;
        derive_session_key(password, &session_salt(&parsed)?, &stored_params(&parsed)?)
    }

    /// Argon2 costs recorded in the stored hash.
    pub fn params(&self) -> Result<KdfParams, CryptError> {
        stored_params(&self.parsed()?)
    }

    fn parsed(&self) -> Result<PasswordHash<'_>, CryptError> {
        PasswordHash::new(&self.password_hash)
            .map_err(|e| CryptError::corrupt(format!("unreadable password hash: {e}")))
    }
}

fn stored_params(parsed: &PasswordHash<'_>) -> Result<KdfParams, CryptError> {
    let params = Params::try_from(parsed)
        .map_err(|e| CryptError::corrupt(format!("unreadable argon2 parameters: {e}")))?;
    Ok(KdfParams {
        memory_kib: params.m_cost(),
        iterations: params.t_cost(),
        parallelism: params.p_cost(),
    })
}

fn session_salt(parsed: &PasswordHash<'_>) -> Result<[u8; SALT_LEN], CryptError> {
    let salt = parsed
        .salt
        .ok_or_else(|| CryptError::corrupt("password hash carries no salt"))?;

    let digest = Sha256::new()
        .chain_update(SESSION_SALT_CONTEXT)
        .chain_update(salt.as_str().as_bytes())
        .finalize();
    let mut out = [0u8; SALT_LEN];
    out.copy_from_slice(&digest[..SALT_LEN]);
    Ok(out)
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential").finish_non_exhaustive()
    }
}

/// Persists and checks the `password_hash` record.
pub struct CredentialStore<S: KeyValueStore> {
    store: Arc<S>,
    params: KdfParams,
}

impl<S: KeyValueStore> CredentialStore<S> {
    pub fn new(store: Arc<S>, params: KdfParams) -> Self {
        Self { store, params }
    }

    pub fn params(&self) -> &KdfParams {
        &self.params
    }

    pub async fn load(&self) -> Result<Option<Credential>, CryptError> {
        match self.store.get(PASSWORD_HASH_KEY).await? {
            Some(hash) => Credential::from_stored(hash).map(Some),
            None => Ok(None),
        }
    }

    /// Derive and persist a credential for a new password. Weak passwords change nothing.
    #[instrument(skip_all)]
    pub async fn setup(&self, password: &str) -> Result<Credential, CryptError> {
        let credential = Credential::derive(password, &self.params)?;
        self.replace(&credential).await?;
        debug!("password hash stored");
        Ok(credential)
    }

    /// `false` when no credential is stored.
    #[instrument(skip_all)]
    pub async fn verify(&self, password: &str) -> Result<bool, CryptError> {
        Ok(self
            .load()
            .await?
            .is_some_and(|credential| credential.verify(password)))
    }

    /// Overwrite the hash with one for `new_password`. Category data is not touched;
    /// re-encryption is the session manager's job.
    #[instrument(skip_all)]
    pub async fn change_password_hash(&self, new_password: &str) -> Result<Credential, CryptError> {
        let credential = Credential::derive(new_password, &self.params)?;
        self.replace(&credential).await?;
        debug!("password hash replaced");
        Ok(credential)
    }

    pub async fn replace(&self, credential: &Credential) -> Result<(), CryptError> {
        self.store
            .set(PASSWORD_HASH_KEY, credential.as_str())
            .await
            .map_err(CryptError::from)
    }

    pub async fn clear(&self) -> Result<(), CryptError> {
        self.store
            .remove(PASSWORD_HASH_KEY)
            .await
            .map_err(CryptError::from)
    }
}
