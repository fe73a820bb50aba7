use std::time::Duration;

use carelog_core::storage::StoreError;
use thiserror::Error;

use crate::session::EncryptionStatus;

/// Every failure the encryption subsystem reports. All variants are recoverable results;
/// only `CorruptEncryptionState` asks the caller to reset before continuing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptError {
    /// Rejected before any state was touched.
    #[error("password must be at least {min} characters")]
    WeakPassword { min: usize },
    #[error("wrong password")]
    WrongPassword,
    /// The user dismissed the password prompt.
    #[error("password entry cancelled")]
    Cancelled,
    #[error("too many failed attempts, retry in {}s", .retry_after.as_secs().max(1))]
    TooManyAttempts { retry_after: Duration },
    /// Wrong key or corrupt envelope. The stored value is left untouched.
    #[error("decryption failed: {reason}")]
    DecryptionFailed { reason: String },
    #[error("encryption failed: {reason}")]
    EncryptionFailed { reason: String },
    #[error(transparent)]
    StorageUnavailable(#[from] StoreError),
    /// Another setup/disable/change-password pass has not finished yet.
    #[error("another encryption transition is already in progress")]
    ReentrantOperation,
    /// Encryption is enabled but no session key is active.
    #[error("encrypted data is locked")]
    Locked,
    #[error("cannot {operation} while encryption is {state}")]
    InvalidState {
        operation: &'static str,
        state: EncryptionStatus,
    },
    /// Persisted flags contradict each other; a forced re-setup is required.
    #[error("encryption state is inconsistent: {reason}")]
    CorruptEncryptionState { reason: String },
    #[error("key derivation failed: {reason}")]
    KeyDerivation { reason: String },
}

impl CryptError {
    pub(crate) fn decryption(reason: impl Into<String>) -> Self {
        CryptError::DecryptionFailed {
            reason: reason.into(),
        }
    }

    pub(crate) fn corrupt(reason: impl Into<String>) -> Self {
        CryptError::CorruptEncryptionState {
            reason: reason.into(),
        }
    }
}
