//! Common error types shared across crates.

use thiserror::Error;

use crate::keyref::MasterKeyReference;

/// Top-level service error type.
///
/// Variants map to HTTP status codes returned to callers:
/// - [`ServiceError::MalformedKeyIdentifier`] / [`ServiceError::BadRequest`] → 400
/// - [`ServiceError::UnknownMasterKey`] → 404
/// - [`ServiceError::CannotDisableLastActiveKey`] / [`ServiceError::RotationAlreadyRunning`] → 409
/// - [`ServiceError::KeystoreUnavailable`] → 503
/// - [`ServiceError::EnvelopeIntegrityViolation`] / [`ServiceError::Internal`] → 500
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A key identifier does not match the `<keystoreId>:<alias>` pattern.
    #[error("malformed master key identifier: {0}")]
    MalformedKeyIdentifier(String),

    /// The referenced master key is not registered.
    #[error("unknown master key: {0}")]
    UnknownMasterKey(MasterKeyReference),

    /// Disabling this key would leave the registry without any active key.
    #[error("cannot disable the last remaining active master key: {0}")]
    CannotDisableLastActiveKey(MasterKeyReference),

    /// A re-encryption run for this key is already in flight.
    #[error("re-encryption already running for master key: {0}")]
    RotationAlreadyRunning(MasterKeyReference),

    /// The keystore backend cannot currently serve wrap/unwrap calls.
    /// Transient; the caller may retry.
    #[error("keystore unavailable: {0}")]
    KeystoreUnavailable(String),

    /// An envelope references a master key that no longer exists in the
    /// registry. Fatal — surfaced, never silently repaired.
    #[error("envelope integrity violation: {0}")]
    EnvelopeIntegrityViolation(String),

    /// The request was malformed in some other way — unknown mode, invalid JSON.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// An unexpected internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Returns the HTTP status code that should be sent for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            ServiceError::MalformedKeyIdentifier(_) => 400,
            ServiceError::UnknownMasterKey(_) => 404,
            ServiceError::CannotDisableLastActiveKey(_) => 409,
            ServiceError::RotationAlreadyRunning(_) => 409,
            ServiceError::KeystoreUnavailable(_) => 503,
            ServiceError::EnvelopeIntegrityViolation(_) => 500,
            ServiceError::BadRequest(_) => 400,
            ServiceError::Internal(_) => 500,
        }
    }

    /// Short machine-readable code used in error response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::MalformedKeyIdentifier(_) => "malformed_key_identifier",
            ServiceError::UnknownMasterKey(_) => "unknown_master_key",
            ServiceError::CannotDisableLastActiveKey(_) => "cannot_disable_last_active_key",
            ServiceError::RotationAlreadyRunning(_) => "rotation_already_running",
            ServiceError::KeystoreUnavailable(_) => "keystore_unavailable",
            ServiceError::EnvelopeIntegrityViolation(_) => "envelope_integrity_violation",
            ServiceError::BadRequest(_) => "bad_request",
            ServiceError::Internal(_) => "internal_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> MasterKeyReference {
        MasterKeyReference::new("main", "key-1").unwrap()
    }

    #[test]
    fn http_status_codes() {
        assert_eq!(
            ServiceError::MalformedKeyIdentifier("x".into()).http_status(),
            400
        );
        assert_eq!(ServiceError::UnknownMasterKey(key()).http_status(), 404);
        assert_eq!(
            ServiceError::CannotDisableLastActiveKey(key()).http_status(),
            409
        );
        assert_eq!(
            ServiceError::RotationAlreadyRunning(key()).http_status(),
            409
        );
        assert_eq!(
            ServiceError::KeystoreUnavailable("x".into()).http_status(),
            503
        );
        assert_eq!(
            ServiceError::EnvelopeIntegrityViolation("x".into()).http_status(),
            500
        );
        assert_eq!(ServiceError::BadRequest("x".into()).http_status(), 400);
        assert_eq!(ServiceError::Internal("x".into()).http_status(), 500);
    }

    #[test]
    fn display_includes_key_identifier() {
        let e = ServiceError::UnknownMasterKey(key());
        assert!(e.to_string().contains("main:key-1"));
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            ServiceError::MalformedKeyIdentifier("x".into()).code(),
            "malformed_key_identifier"
        );
        assert_eq!(
            ServiceError::CannotDisableLastActiveKey(key()).code(),
            "cannot_disable_last_active_key"
        );
    }
}
