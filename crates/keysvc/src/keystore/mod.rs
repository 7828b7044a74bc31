//! Keystore Adapter: the boundary behind which master key material lives.
//!
//! The service never sees master key bytes. A [`Keystore`] can wrap and
//! unwrap symmetric key blobs under a [`MasterKeyReference`] and report an
//! opaque digest identifying each key. Two backends are provided:
//!
//! - [`KmsKeystore`]: AWS KMS, for production deployments.
//! - [`LocalKeystore`]: in-process AES-256-GCM-SIV, for development and tests.

pub mod kms;
pub mod local;

pub use kms::KmsKeystore;
pub use local::LocalKeystore;

use async_trait::async_trait;
use bytes::Bytes;
use common::MasterKeyReference;
#[cfg(test)]
use mockall::automock;
use thiserror::Error;

/// Errors produced by a keystore backend.
#[derive(Debug, Error)]
pub enum KeystoreError {
    /// The master key is not present in this keystore.
    #[error("master key not present in keystore: {0}")]
    UnknownKey(MasterKeyReference),

    /// The backend cannot currently be reached or is rate-limited.
    /// Transient; callers may retry.
    #[error("keystore unavailable: {0}")]
    Unavailable(String),

    /// The wrap or unwrap operation itself failed — wrong key material,
    /// tampered ciphertext, or a backend-side crypto error.
    #[error("wrap/unwrap operation failed: {0}")]
    CryptoFailure(String),
}

/// A symmetric key blob wrapped under a master key.
///
/// The nonce is backend-specific: the local AEAD backend stores the random
/// nonce used for the wrap, while KMS manages nonces internally and leaves
/// it empty. Both blobs are opaque to everything above the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedKey {
    /// Ciphertext of the symmetric key (including any authentication tag).
    pub ciphertext: Bytes,
    /// Cipher nonce, when the backend exposes one.
    pub nonce: Bytes,
}

/// Capability to wrap and unwrap symmetric key blobs under master keys.
///
/// Implementations must be safe to share across request handlers and the
/// re-encryption engine; calls may be slow (remote keystore) and must not be
/// made while holding locks on envelope or registry state.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Keystore: Send + Sync {
    /// Wrap `plaintext` under `master_key`.
    ///
    /// # Errors
    ///
    /// [`KeystoreError::UnknownKey`] if the key is not present in this
    /// keystore, [`KeystoreError::Unavailable`] on transient backend failure.
    async fn wrap(
        &self,
        master_key: &MasterKeyReference,
        plaintext: &[u8],
    ) -> Result<WrappedKey, KeystoreError>;

    /// Unwrap a previously wrapped blob under `master_key`.
    ///
    /// # Errors
    ///
    /// [`KeystoreError::CryptoFailure`] if authentication fails (wrong key or
    /// tampered blob), plus the same variants as [`Keystore::wrap`].
    async fn unwrap(
        &self,
        master_key: &MasterKeyReference,
        wrapped: &WrappedKey,
    ) -> Result<Vec<u8>, KeystoreError>;

    /// Opaque digest identifying the key behind `master_key`.
    ///
    /// Used at startup to verify that every configured key actually resolves
    /// in the keystore before the registry is seeded with it.
    async fn key_digest(&self, master_key: &MasterKeyReference) -> Result<String, KeystoreError>;
}
