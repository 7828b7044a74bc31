//! In-process keystore backed by AES-256-GCM-SIV.
//!
//! Key material lives only in this process and, unless supplied explicitly,
//! is generated fresh at construction — envelopes wrapped by a generated
//! keystore are unreadable after a restart. Intended for development and
//! tests; production deployments use [`super::KmsKeystore`].
//!
//! **Algorithm choice:** AES-256-GCM-SIV (RFC 8452) is nonce-misuse-resistant,
//! so a repeated nonce degrades to deterministic encryption instead of
//! breaking confidentiality and authentication outright.

use std::collections::HashMap;

use aes_gcm_siv::{
    aead::{Aead, KeyInit, OsRng},
    Aes256GcmSiv, Nonce,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use bytes::Bytes;
use common::MasterKeyReference;
use sha2::{Digest, Sha256};

use super::{Keystore, KeystoreError, WrappedKey};

/// Byte length of an AES-256 master key (32 bytes = 256 bits).
pub const KEY_LEN: usize = 32;

/// Byte length of an AES-GCM-SIV nonce (12 bytes = 96 bits).
pub const NONCE_LEN: usize = 12;

/// In-memory keystore holding one AES-256 key per master key reference.
pub struct LocalKeystore {
    keys: HashMap<MasterKeyReference, [u8; KEY_LEN]>,
}

impl LocalKeystore {
    /// Create an empty keystore.
    pub fn new() -> Self {
        Self {
            keys: HashMap::new(),
        }
    }

    /// Create a keystore with freshly generated key material for `refs`.
    pub fn generate(refs: impl IntoIterator<Item = MasterKeyReference>) -> Self {
        use aes_gcm_siv::aead::rand_core::RngCore;
        let mut keys = HashMap::new();
        for reference in refs {
            let mut key = [0u8; KEY_LEN];
            OsRng.fill_bytes(&mut key);
            keys.insert(reference, key);
        }
        Self { keys }
    }

    /// Add a key with explicit material; replaces any existing entry.
    pub fn with_key(mut self, reference: MasterKeyReference, key: [u8; KEY_LEN]) -> Self {
        self.keys.insert(reference, key);
        self
    }

    fn cipher_for(&self, master_key: &MasterKeyReference) -> Result<Aes256GcmSiv, KeystoreError> {
        let key = self
            .keys
            .get(master_key)
            .ok_or_else(|| KeystoreError::UnknownKey(master_key.clone()))?;
        Aes256GcmSiv::new_from_slice(key)
            .map_err(|_| KeystoreError::CryptoFailure("invalid master key length".into()))
    }
}

impl Default for LocalKeystore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LocalKeystore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material — not even in debug builds.
        f.debug_struct("LocalKeystore")
            .field("keys", &self.keys.len())
            .finish()
    }
}

#[async_trait]
impl Keystore for LocalKeystore {
    async fn wrap(
        &self,
        master_key: &MasterKeyReference,
        plaintext: &[u8],
    ) -> Result<WrappedKey, KeystoreError> {
        let cipher = self.cipher_for(master_key)?;

        // Fresh random nonce per wrap via the OS CSPRNG.
        use aes_gcm_siv::aead::rand_core::RngCore;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| KeystoreError::CryptoFailure("aead encryption failed".into()))?;

        Ok(WrappedKey {
            ciphertext: Bytes::from(ciphertext),
            nonce: Bytes::copy_from_slice(&nonce_bytes),
        })
    }

    async fn unwrap(
        &self,
        master_key: &MasterKeyReference,
        wrapped: &WrappedKey,
    ) -> Result<Vec<u8>, KeystoreError> {
        let cipher = self.cipher_for(master_key)?;
        if wrapped.nonce.len() != NONCE_LEN {
            return Err(KeystoreError::CryptoFailure(format!(
                "invalid nonce length: expected {NONCE_LEN} bytes, got {}",
                wrapped.nonce.len()
            )));
        }
        let nonce = Nonce::from_slice(&wrapped.nonce);
        cipher
            .decrypt(nonce, wrapped.ciphertext.as_ref())
            .map_err(|_| KeystoreError::CryptoFailure("aead authentication failed".into()))
    }

    async fn key_digest(&self, master_key: &MasterKeyReference) -> Result<String, KeystoreError> {
        let key = self
            .keys
            .get(master_key)
            .ok_or_else(|| KeystoreError::UnknownKey(master_key.clone()))?;
        let digest = Sha256::digest(key);
        Ok(URL_SAFE_NO_PAD.encode(digest))
    }
}
