//! Envelope Codec: the binding between a content item's symmetric key and a
//! master key.
//!
//! Every content item is encrypted with its own symmetric key; the key itself
//! is stored wrapped under a master key as a [`SymmetricKeyEnvelope`]. The
//! codec performs the wrap/unwrap through the Keystore Adapter and enforces
//! the lifecycle rules: new wraps only under a currently Active key, unwraps
//! under Active or Disabled keys (this is how legacy content stays readable),
//! and a hard failure when an envelope references a key that is no longer
//! registered at all.

pub mod store;

pub use store::{EnvelopeStore, InMemoryEnvelopeStore, VersionedEnvelope};

use std::sync::Arc;

use bytes::Bytes;
use common::MasterKeyReference;
use thiserror::Error;
use tracing::error;

use crate::keystore::{Keystore, KeystoreError, WrappedKey};
use crate::registry::{KeyState, MasterKeyRegistry};

/// Algorithm tag recorded in envelopes for the per-item symmetric keys.
pub const DEFAULT_KEY_ALGORITHM: &str = "AES";

/// A per-item symmetric content encryption key.
///
/// The buffer is overwritten with zeroes on drop to minimise the window
/// during which plaintext key material lives in RAM.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey(Vec<u8>);

impl SymmetricKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        // Zero the key material on drop.
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material — not even in debug builds.
        f.write_str("SymmetricKey([REDACTED])")
    }
}

/// The stored binding of one content item's symmetric key to a master key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymmetricKeyEnvelope {
    /// Identifier of the content item this envelope protects.
    pub content_id: String,
    /// Symmetric key ciphertext, wrapped under `master_key`.
    pub wrapped_key: Bytes,
    /// Cipher nonce of the wrap, when the keystore backend exposes one.
    pub nonce: Bytes,
    /// Algorithm tag of the symmetric key (e.g. `"AES"`).
    pub algorithm: String,
    /// The master key the symmetric key is wrapped under. Must always
    /// resolve to a registered record, Active or Disabled.
    pub master_key: MasterKeyReference,
}

/// Errors produced by the codec.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The target key is not registered, or is not Active at call time.
    /// Evaluated against the current registry snapshot.
    #[error("master key unknown or not active for wrapping: {0}")]
    UnknownMasterKey(MasterKeyReference),

    /// The envelope references a master key that has been pruned from the
    /// registry. This violates the registry's retention invariant and is
    /// fatal; the envelope is excluded from automated processing.
    #[error("envelope for content {content_id} references pruned master key {master_key}")]
    IntegrityViolation {
        content_id: String,
        master_key: MasterKeyReference,
    },

    /// The keystore failed the wrap/unwrap call.
    #[error(transparent)]
    Keystore(#[from] KeystoreError),
}

/// Wraps and unwraps symmetric keys against the registry and keystore.
#[derive(Clone)]
pub struct EnvelopeCodec {
    registry: MasterKeyRegistry,
    keystore: Arc<dyn Keystore>,
}

impl EnvelopeCodec {
    pub fn new(registry: MasterKeyRegistry, keystore: Arc<dyn Keystore>) -> Self {
        Self { registry, keystore }
    }

    /// Wrap `key` for `content_id` under `master_key`.
    ///
    /// The target must be Active in the registry snapshot current at call
    /// time; Disabled keys are never selected for new wraps.
    ///
    /// # Errors
    ///
    /// [`EnvelopeError::UnknownMasterKey`] when the target is unregistered or
    /// not Active; keystore failures pass through.
    pub async fn wrap(
        &self,
        content_id: &str,
        key: &SymmetricKey,
        master_key: &MasterKeyReference,
    ) -> Result<SymmetricKeyEnvelope, EnvelopeError> {
        let snapshot = self.registry.snapshot();
        if snapshot.state_of(master_key) != Some(KeyState::Active) {
            return Err(EnvelopeError::UnknownMasterKey(master_key.clone()));
        }

        let wrapped = self.keystore.wrap(master_key, key.as_bytes()).await?;

        Ok(SymmetricKeyEnvelope {
            content_id: content_id.to_owned(),
            wrapped_key: wrapped.ciphertext,
            nonce: wrapped.nonce,
            algorithm: DEFAULT_KEY_ALGORITHM.to_owned(),
            master_key: master_key.clone(),
        })
    }

    /// Unwrap the symmetric key held in `envelope`.
    ///
    /// Accepts Active and Disabled master keys alike — disabled keys remain
    /// valid for decryption of legacy content.
    ///
    /// # Errors
    ///
    /// [`EnvelopeError::IntegrityViolation`] if the referenced key is not
    /// registered at all; keystore failures pass through.
    pub async fn unwrap(
        &self,
        envelope: &SymmetricKeyEnvelope,
    ) -> Result<SymmetricKey, EnvelopeError> {
        let snapshot = self.registry.snapshot();
        if snapshot.get(&envelope.master_key).is_none() {
            error!(
                content_id = %envelope.content_id,
                key = %envelope.master_key,
                "envelope references a master key missing from the registry"
            );
            return Err(EnvelopeError::IntegrityViolation {
                content_id: envelope.content_id.clone(),
                master_key: envelope.master_key.clone(),
            });
        }

        let wrapped = WrappedKey {
            ciphertext: envelope.wrapped_key.clone(),
            nonce: envelope.nonce.clone(),
        };
        let plaintext = self.keystore.unwrap(&envelope.master_key, &wrapped).await?;
        Ok(SymmetricKey::new(plaintext))
    }
}
