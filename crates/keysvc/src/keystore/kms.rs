//! AWS KMS keystore backend.
//!
//! Master key aliases map directly to KMS key identifiers (key ID, ARN, or
//! `alias/...` name). Wrap and unwrap are KMS `Encrypt`/`Decrypt` calls; the
//! key material never leaves KMS.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_kms::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_kms::primitives::Blob;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use bytes::Bytes;
use common::MasterKeyReference;
use sha2::{Digest, Sha256};

use super::{Keystore, KeystoreError, WrappedKey};

/// Keystore backed by AWS KMS.
#[derive(Clone)]
pub struct KmsKeystore {
    client: aws_sdk_kms::Client,
}

impl KmsKeystore {
    /// Initialise a KMS keystore from the ambient AWS environment.
    ///
    /// Credentials are resolved via the standard AWS credential chain. An
    /// `endpoint` override points the client at a non-default KMS endpoint
    /// (VPC endpoint, localstack).
    pub async fn init(endpoint: Option<&str>) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        let mut builder = aws_sdk_kms::config::Builder::from(&config);
        if let Some(url) = endpoint {
            builder = builder.endpoint_url(url);
        }
        Self {
            client: aws_sdk_kms::Client::from_conf(builder.build()),
        }
    }

    /// Wrap an existing KMS client.
    pub fn from_client(client: aws_sdk_kms::Client) -> Self {
        Self { client }
    }

    fn map_sdk_error<E>(master_key: &MasterKeyReference, err: SdkError<E>) -> KeystoreError
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    {
        if let SdkError::ServiceError(ctx) = &err {
            if ctx.err().meta().code() == Some("NotFoundException") {
                return KeystoreError::UnknownKey(master_key.clone());
            }
            if ctx.err().meta().code() == Some("InvalidCiphertextException") {
                return KeystoreError::CryptoFailure(err.to_string());
            }
        }
        KeystoreError::Unavailable(err.to_string())
    }
}

#[async_trait]
impl Keystore for KmsKeystore {
    async fn wrap(
        &self,
        master_key: &MasterKeyReference,
        plaintext: &[u8],
    ) -> Result<WrappedKey, KeystoreError> {
        let resp = self
            .client
            .encrypt()
            .key_id(master_key.alias())
            .plaintext(Blob::new(plaintext.to_vec()))
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(master_key, e))?;

        let ciphertext = resp.ciphertext_blob().ok_or_else(|| {
            KeystoreError::CryptoFailure("KMS encrypt response contained no ciphertext".into())
        })?;

        Ok(WrappedKey {
            ciphertext: Bytes::copy_from_slice(ciphertext.as_ref()),
            // KMS manages nonces internally; the ciphertext blob is self-contained.
            nonce: Bytes::new(),
        })
    }

    async fn unwrap(
        &self,
        master_key: &MasterKeyReference,
        wrapped: &WrappedKey,
    ) -> Result<Vec<u8>, KeystoreError> {
        let resp = self
            .client
            .decrypt()
            .key_id(master_key.alias())
            .ciphertext_blob(Blob::new(wrapped.ciphertext.to_vec()))
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(master_key, e))?;

        let plaintext = resp.plaintext().ok_or_else(|| {
            KeystoreError::CryptoFailure("KMS decrypt response contained no plaintext".into())
        })?;

        Ok(plaintext.as_ref().to_vec())
    }

    async fn key_digest(&self, master_key: &MasterKeyReference) -> Result<String, KeystoreError> {
        let resp = self
            .client
            .describe_key()
            .key_id(master_key.alias())
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(master_key, e))?;

        let arn = resp
            .key_metadata()
            .and_then(|m| m.arn())
            .ok_or_else(|| KeystoreError::UnknownKey(master_key.clone()))?;

        // KMS never exposes key material; the key ARN is the stable identity
        // a digest can be derived from.
        let digest = Sha256::digest(arn.as_bytes());
        Ok(URL_SAFE_NO_PAD.encode(digest))
    }
}
