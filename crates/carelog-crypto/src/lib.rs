//! Local encryption and key lifecycle for Carelog's sensitive record categories.
//!
//! [`session::EncryptionManager`] owns the enabled/locked/unlocked state machine and the
//! in-memory session key. [`migrator::BulkMigrator`] converts every registered category
//! between plaintext and [`codec::CipherEnvelope`]s, and [`proxy::DataAccessProxy`] is the
//! read/write facade the rest of the application goes through.

pub mod codec;
pub mod credential;
pub mod error;
pub mod kdf;
pub mod migrator;
pub mod proxy;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;

pub use codec::{CipherEnvelope, ENVELOPE_MARKER};
pub use credential::{Credential, CredentialStore, MIN_PASSWORD_LEN};
pub use error::CryptError;
pub use kdf::{KdfParams, SessionKey};
pub use migrator::{BulkMigrator, CategoryStatus, MigrationReport, RecordState};
pub use proxy::{DataAccessProxy, WritePolicy};
pub use session::{
    EncryptionManager, EncryptionStatus, ManagerOptions, SessionHandle, UnlockPolicy,
    ENCRYPTION_ENABLED_KEY,
};
