//! Application-level encryption for sensitive fields, and fingerprinting for
//! token lookup.
//!
//! Sensitive columns (provider access/refresh tokens, raw claims, PKCE
//! verifiers) are sealed with AES-256-GCM before they ever reach the
//! [`crate::store::TokenStore`] boundary; the store only ever sees opaque
//! ciphertext. Fingerprints used for token lookup are unsalted SHA-256,
//! which is acceptable because MXCP tokens carry at least 128 bits of
//! entropy by construction (see [`crate::session_manager`]).

use base64::Engine;
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AuthError, AuthResult};

/// A 32-byte AES-256-GCM key resolved at startup through the embedding
/// application's secret-resolution conventions (env indirection, vault
/// reference, file reference). The auth core never reads environment
/// variables directly — it receives the already-resolved key bytes.
#[derive(Clone)]
pub struct EncryptionKey(LessSafeKey);

impl EncryptionKey {
    /// Build a key from 32 raw bytes.
    ///
    /// # Errors
    /// Returns [`AuthError::Internal`] if `bytes` is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> AuthResult<Self> {
        let unbound = UnboundKey::new(&AES_256_GCM, bytes).map_err(|_| {
            tracing::error!("encryption key must be exactly 32 bytes");
            AuthError::Internal
        })?;
        Ok(Self(LessSafeKey::new(unbound)))
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// The subset of startup configuration that can be re-resolved on a live
/// system without a restart. Held behind an `arc_swap::ArcSwap` by
/// [`crate::session_manager::SessionManager`] so a reload swaps the whole
/// set atomically — readers never observe a torn combination of old and
/// new secrets.
#[derive(Clone)]
pub struct ResolvedSecrets {
    pub encryption_key: EncryptionKey,
}

/// A sealed (encrypted) byte blob as it is persisted in the store: opaque
/// ciphertext with an authenticated-encryption tag, plus the nonce used to
/// produce it.
#[derive(Clone, Serialize, Deserialize)]
pub struct Sealed {
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
}

impl std::fmt::Debug for Sealed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sealed")
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

impl Sealed {
    /// Encrypt `plaintext` under `key`.
    ///
    /// # Errors
    /// Returns [`AuthError::Internal`] if the system RNG fails.
    pub fn seal(key: &EncryptionKey, plaintext: &[u8]) -> AuthResult<Self> {
        let rng = SystemRandom::new();
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rng.fill(&mut nonce_bytes).map_err(|_| AuthError::Internal)?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.to_vec();
        key.0
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| AuthError::Internal)?;

        Ok(Self {
            nonce: nonce_bytes,
            ciphertext: in_out,
        })
    }

    /// Encrypt a UTF-8 string.
    pub fn seal_str(key: &EncryptionKey, plaintext: &str) -> AuthResult<Self> {
        Self::seal(key, plaintext.as_bytes())
    }

    /// Decrypt back to plaintext bytes.
    ///
    /// A decryption failure here always means tamper or key mismatch —
    /// never a recoverable condition. Callers must treat this as
    /// [`AuthError::Tamper`], not retry, and revoke the owning session.
    pub fn open(&self, key: &EncryptionKey) -> AuthResult<Vec<u8>> {
        let nonce = Nonce::assume_unique_for_key(self.nonce);
        let mut in_out = self.ciphertext.clone();
        let plaintext = key
            .0
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| AuthError::Tamper)?;
        Ok(plaintext.to_vec())
    }

    /// Decrypt back to a UTF-8 string.
    pub fn open_str(&self, key: &EncryptionKey) -> AuthResult<String> {
        let bytes = self.open(key)?;
        String::from_utf8(bytes).map_err(|_| AuthError::Tamper)
    }

    /// Encode as a single base64url string for storage in a TEXT column.
    #[must_use]
    pub fn to_storage_string(&self) -> String {
        let mut buf = Vec::with_capacity(NONCE_LEN + self.ciphertext.len());
        buf.extend_from_slice(&self.nonce);
        buf.extend_from_slice(&self.ciphertext);
        base64::engine::general_purpose::STANDARD.encode(buf)
    }

    /// Decode from the storage representation produced by
    /// [`Sealed::to_storage_string`].
    pub fn from_storage_string(s: &str) -> AuthResult<Self> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(|_| AuthError::Tamper)?;
        if raw.len() < NONCE_LEN {
            return Err(AuthError::Tamper);
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(nonce_bytes);
        Ok(Self {
            nonce,
            ciphertext: ciphertext.to_vec(),
        })
    }
}

/// SHA-256 fingerprint of a raw opaque token, used as the store lookup key.
///
/// Unsalted SHA-256 is acceptable here only because MXCP tokens are minted
/// with at least 128 bits of entropy (see [`crate::session_manager::mint_token`]);
/// this function must never be applied to low-entropy secrets such as
/// passwords.
#[must_use]
pub fn fingerprint(raw_token: &str) -> String {
    let digest = Sha256::digest(raw_token.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> EncryptionKey {
        EncryptionKey::from_bytes(&[7u8; 32]).unwrap()
    }

    #[test]
    fn seal_open_round_trips() {
        let key = test_key();
        let sealed = Sealed::seal_str(&key, "provider-access-token").unwrap();
        assert_eq!(sealed.open_str(&key).unwrap(), "provider-access-token");
    }

    #[test]
    fn storage_round_trip_preserves_ciphertext() {
        let key = test_key();
        let sealed = Sealed::seal_str(&key, "refresh-token-value").unwrap();
        let encoded = sealed.to_storage_string();
        let decoded = Sealed::from_storage_string(&encoded).unwrap();
        assert_eq!(decoded.open_str(&key).unwrap(), "refresh-token-value");
    }

    #[test]
    fn tampered_ciphertext_fails_closed() {
        let key = test_key();
        let sealed = Sealed::seal_str(&key, "secret").unwrap();
        let mut encoded = sealed.to_storage_string();
        // Flip a character deep enough to land in the ciphertext, not the nonce.
        let mid = encoded.len() - 2;
        let flipped = if encoded.as_bytes()[mid] == b'A' { 'B' } else { 'A' };
        encoded.replace_range(mid..=mid, &flipped.to_string());
        let tampered = Sealed::from_storage_string(&encoded).unwrap();
        assert!(matches!(tampered.open_str(&key), Err(AuthError::Tamper)));
    }

    #[test]
    fn wrong_key_fails_closed() {
        let key_a = test_key();
        let key_b = EncryptionKey::from_bytes(&[9u8; 32]).unwrap();
        let sealed = Sealed::seal_str(&key_a, "secret").unwrap();
        assert!(matches!(sealed.open_str(&key_b), Err(AuthError::Tamper)));
    }

    #[test]
    fn fingerprint_is_deterministic_and_not_reversible_by_inspection() {
        let fp1 = fingerprint("same-token");
        let fp2 = fingerprint("same-token");
        assert_eq!(fp1, fp2);
        assert_ne!(fp1, "same-token");
    }

    #[test]
    fn fingerprint_differs_for_different_tokens() {
        assert_ne!(fingerprint("token-a"), fingerprint("token-b"));
    }
}
