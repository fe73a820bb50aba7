//! Value-level cipher. Every protected category is stored as a single envelope string:
//!
//! ```text
//! carelog:enc:v1:<base64url(nonce || ciphertext || tag)>
//! ```
//!
//! The marker prefix is how every other component tells ciphertext from plaintext.

use std::fmt;

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

use crate::{error::CryptError, kdf::SessionKey};

pub const ENVELOPE_MARKER: &str = "carelog:enc:v1:";

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// At-rest form of an encrypted category value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherEnvelope(String);

impl CipherEnvelope {
    /// Recognize a stored value as an envelope by its marker.
    pub fn parse(value: &str) -> Option<Self> {
        is_envelope(value).then(|| Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    fn payload(&self) -> &str {
        &self.0[ENVELOPE_MARKER.len()..]
    }
}

impl fmt::Display for CipherEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn is_envelope(value: &str) -> bool {
    value.starts_with(ENVELOPE_MARKER)
}

pub fn encode(plaintext: &str, key: &SessionKey) -> Result<CipherEnvelope, CryptError> {
    let cipher = build_cipher(key).map_err(|reason| CryptError::EncryptionFailed { reason })?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext =
        cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| CryptError::EncryptionFailed {
                reason: format!("encrypt failed: {e}"),
            })?;

    let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    payload.extend_from_slice(nonce.as_slice());
    payload.extend_from_slice(&ciphertext);
    Ok(CipherEnvelope(format!(
        "{ENVELOPE_MARKER}{}",
        URL_SAFE_NO_PAD.encode(payload)
    )))
}

/// Inverse of [`encode`]. A wrong key and a damaged envelope both come back as
/// `DecryptionFailed`; the envelope itself is never modified.
pub fn decode(envelope: &CipherEnvelope, key: &SessionKey) -> Result<String, CryptError> {
    let payload = URL_SAFE_NO_PAD
        .decode(envelope.payload())
        .map_err(|e| CryptError::decryption(format!("envelope decode failed: {e}")))?;
    if payload.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptError::decryption(format!(
            "envelope too short: {} bytes",
            payload.len()
        )));
    }

    let (nonce, ciphertext) = payload.split_at(NONCE_LEN);
    let cipher = build_cipher(key).map_err(CryptError::decryption)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptError::decryption("wrong key or corrupted envelope"))?;

    String::from_utf8(plaintext)
        .map_err(|e| CryptError::decryption(format!("plaintext is not utf-8: {e}")))
}

fn build_cipher(key: &SessionKey) -> Result<Aes256Gcm, String> {
    Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|e| format!("cipher init failed: {e}"))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::test_support::key;

    #[test]
    fn round_trip_restores_plaintext() {
        let k = key(1);
        for text in ["", "[]", r#"{"bp":"120/80","pulse":64}"#, "naïve café ✓"] {
            let envelope = encode(text, &k).expect("encode");
            assert!(is_envelope(envelope.as_str()));
            assert_eq!(decode(&envelope, &k).expect("decode"), text);
        }
    }

    #[test]
    fn wrong_key_is_a_reported_failure() {
        let envelope = encode("metformin 500mg", &key(1)).expect("encode");
        let err = decode(&envelope, &key(2)).expect_err("wrong key must fail");
        assert!(matches!(err, CryptError::DecryptionFailed { .. }));
    }

    #[test]
    fn corrupt_envelopes_fail_without_panicking() {
        let k = key(1);
        let good = encode("journal entry", &k).expect("encode").into_string();

        let mut flipped = good.clone().into_bytes();
        let last = flipped.len() - 1;
        flipped[last] = if flipped[last] == b'A' { b'B' } else { b'A' };
        let flipped = String::from_utf8(flipped).expect("ascii");

        for damaged in [
            format!("{ENVELOPE_MARKER}!!!not base64"),
            format!("{ENVELOPE_MARKER}AAAA"),
            good[..good.len() - 4].to_string(),
            flipped,
        ] {
            let envelope = CipherEnvelope::parse(&damaged).expect("has marker");
            assert!(matches!(
                decode(&envelope, &k),
                Err(CryptError::DecryptionFailed { .. })
            ));
        }
    }

    #[test]
    fn marker_check_is_structural() {
        assert!(!is_envelope(r#"[{"name":"aspirin"}]"#));
        assert!(!is_envelope("carelog:enc:v2:abc"));
        assert!(CipherEnvelope::parse("plain").is_none());
        assert!(CipherEnvelope::parse(&format!("{ENVELOPE_MARKER}abc")).is_some());
    }

    #[test]
    fn fresh_nonce_per_encode() {
        let k = key(3);
        let first = encode("same", &k).expect("encode");
        let second = encode("same", &k).expect("encode");
        assert_ne!(first, second);
    }

    proptest! {
        #[test]
        fn any_text_round_trips_under_any_key(
            text in any::<String>(),
            bytes in any::<[u8; 32]>(),
        ) {
            let k = SessionKey::from_bytes(bytes);
            let envelope = encode(&text, &k).expect("encode");
            prop_assert!(is_envelope(envelope.as_str()));
            prop_assert_eq!(decode(&envelope, &k).expect("decode"), text);
        }

        #[test]
        fn other_keys_are_reported_not_panicked(
            text in any::<String>(),
            right in any::<[u8; 32]>(),
            wrong in any::<[u8; 32]>(),
        ) {
            prop_assume!(right != wrong);
            let envelope = encode(&text, &SessionKey::from_bytes(right)).expect("encode");
            let decoded = decode(&envelope, &SessionKey::from_bytes(wrong));
            let is_decryption_failed = matches!(decoded, Err(CryptError::DecryptionFailed { .. }));
            prop_assert!(is_decryption_failed);
        }
    }
}
