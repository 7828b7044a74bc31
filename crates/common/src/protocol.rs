//! Request and response types of the admin command surface.
//!
//! These types are serialised as JSON. Master key references always appear in
//! their canonical `<keystoreId>:<alias>` string form; request bodies carry
//! the raw identifier string so that handlers can reject malformed input with
//! a precise error instead of a generic deserialisation failure.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::keyref::MasterKeyReference;

// ---------------------------------------------------------------------------
// Key listing
// ---------------------------------------------------------------------------

/// Which set of master keys a listing request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyListMode {
    /// Keys usable for new wraps.
    #[default]
    Active,
    /// Keys retained for decryption of legacy content only.
    Inactive,
}

impl FromStr for KeyListMode {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(KeyListMode::Active),
            "inactive" => Ok(KeyListMode::Inactive),
            other => Err(ServiceError::BadRequest(format!(
                "unknown key list mode: {other}"
            ))),
        }
    }
}

/// Response body for key listings (`GET /keys`, `GET /keys/requiring-reencryption`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyListResponse {
    /// Master key references in listing order.
    pub keys: Vec<MasterKeyReference>,
}

// ---------------------------------------------------------------------------
// Key lifecycle commands
// ---------------------------------------------------------------------------

/// Request body for commands that target a single master key
/// (`POST /keys/enable`, `POST /keys/disable`, `POST /keys/reencrypt`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyActionRequest {
    /// Raw key identifier in `<keystoreId>:<alias>` form.
    pub key: String,
}

/// Successful response body for enable/disable commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyActionResponse {
    /// The resolved master key the command was applied to.
    pub key: MasterKeyReference,
}

/// Response body for an accepted re-encryption trigger.
///
/// Acceptance is not completion: the run proceeds in the background and its
/// end state is observed by polling the symmetric key count for `key` to zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReEncryptionAcceptedResponse {
    /// The resolved master key whose envelopes will be migrated.
    pub key: MasterKeyReference,
    /// Identifier of the background run, for log correlation.
    pub run_id: String,
}

// ---------------------------------------------------------------------------
// Symmetric key counts
// ---------------------------------------------------------------------------

/// Response body for `GET /keys/counts?key=...`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymmetricKeyCountResponse {
    /// The master key the count applies to.
    pub key: MasterKeyReference,
    /// Number of envelopes whose symmetric key is wrapped under `key`.
    pub count: u64,
}

/// Response body for `GET /keys/counts` without a key argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymmetricKeyCountsResponse {
    /// Total number of envelopes across all master keys.
    pub total: u64,
    /// Per-key envelope counts, keyed by canonical key identifier.
    pub counts: BTreeMap<MasterKeyReference, u64>,
}

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

/// Standard error response body returned on any non-2xx status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short machine-readable error code (e.g. `"unknown_master_key"`).
    pub code: String,
    /// Human-readable description safe to expose to callers.
    pub message: String,
}

impl ErrorResponse {
    /// Construct an [`ErrorResponse`] from a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<&ServiceError> for ErrorResponse {
    fn from(err: &ServiceError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Response body for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall service status: `"ok"`.
    pub status: String,
    /// Number of master keys currently active.
    pub active_keys: usize,
    /// Number of master keys currently disabled.
    pub disabled_keys: usize,
    /// Total number of envelopes in the content store.
    pub stored_envelopes: u64,
}
