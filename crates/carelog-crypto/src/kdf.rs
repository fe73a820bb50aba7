use std::fmt;

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptError;

pub const SESSION_KEY_LEN: usize = 32;

/// Argon2id cost parameters shared by the password hash and the session key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Fails when Argon2 would refuse these costs.
    pub fn validate(&self) -> Result<(), CryptError> {
        self.argon2(None).map(|_| ())
    }

    pub(crate) fn argon2(&self, output_len: Option<usize>) -> Result<Argon2<'static>, CryptError> {
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            output_len,
        )
        .map_err(|e| CryptError::KeyDerivation {
            reason: format!("argon2 params: {e}"),
        })?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Symmetric key for the current unlocked session. Lives only in memory and is wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey {
    bytes: [u8; SESSION_KEY_LEN],
}

impl SessionKey {
    pub fn from_bytes(bytes: [u8; SESSION_KEY_LEN]) -> Self {
        Self { bytes }
    }

    pub(crate) fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey([REDACTED])")
    }
}

/// Stretch a password into session key material.
pub fn derive_session_key(
    password: &str,
    salt: &[u8],
    params: &KdfParams,
) -> Result<SessionKey, CryptError> {
    let argon = params.argon2(Some(SESSION_KEY_LEN))?;
    let mut out = Zeroizing::new([0u8; SESSION_KEY_LEN]);
    argon
        .hash_password_into(password.as_bytes(), salt, &mut out[..])
        .map_err(|e| CryptError::KeyDerivation {
            reason: format!("argon2 derive: {e}"),
        })?;
    Ok(SessionKey::from_bytes(*out))
}
