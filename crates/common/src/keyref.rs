//! [`MasterKeyReference`]: identity of an encryption master key.
//!
//! Master keys may be loaded from more than one keystore, with potentially
//! overlapping aliases, so a key identity is always the pair of keystore ID
//! and alias. The canonical textual form is `<keystoreId>:<alias>` with
//! exactly one `:` separator — the same shape the admin command surface
//! accepts and returns.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ServiceError;

/// Identity of an encryption master key: `(keystore_id, alias)`.
///
/// Both components are non-empty and free of the `:` separator; construction
/// and parsing enforce this. Instances are immutable and used as map keys
/// throughout the service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MasterKeyReference {
    keystore_id: String,
    alias: String,
}

impl MasterKeyReference {
    /// Construct a reference from its two components.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::MalformedKeyIdentifier`] if either component
    /// is empty or contains the `:` separator.
    pub fn new(
        keystore_id: impl Into<String>,
        alias: impl Into<String>,
    ) -> Result<Self, ServiceError> {
        let keystore_id = keystore_id.into();
        let alias = alias.into();
        if keystore_id.is_empty() || alias.is_empty() {
            return Err(ServiceError::MalformedKeyIdentifier(format!(
                "{keystore_id}:{alias}"
            )));
        }
        if keystore_id.contains(':') || alias.contains(':') {
            return Err(ServiceError::MalformedKeyIdentifier(format!(
                "{keystore_id}:{alias}"
            )));
        }
        Ok(Self { keystore_id, alias })
    }

    /// ID of the keystore from which the key is loaded.
    pub fn keystore_id(&self) -> &str {
        &self.keystore_id
    }

    /// Alias of the key within its keystore.
    pub fn alias(&self) -> &str {
        &self.alias
    }
}

impl fmt::Display for MasterKeyReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.keystore_id, self.alias)
    }
}

impl FromStr for MasterKeyReference {
    type Err = ServiceError;

    /// Parse the canonical `<keystoreId>:<alias>` form.
    ///
    /// Exactly one `:` separator with non-empty text on both sides; any other
    /// shape is a [`ServiceError::MalformedKeyIdentifier`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(keystore_id), Some(alias), None)
                if !keystore_id.is_empty() && !alias.is_empty() =>
            {
                Ok(Self {
                    keystore_id: keystore_id.to_owned(),
                    alias: alias.to_owned(),
                })
            }
            _ => Err(ServiceError::MalformedKeyIdentifier(s.to_owned())),
        }
    }
}

// Serialised as the canonical string form so references read naturally in
// JSON bodies and as JSON map keys.
impl Serialize for MasterKeyReference {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MasterKeyReference {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trip() {
        let parsed: MasterKeyReference = "main:backup-key".parse().unwrap();
        assert_eq!(parsed.keystore_id(), "main");
        assert_eq!(parsed.alias(), "backup-key");
        assert_eq!(parsed.to_string(), "main:backup-key");
    }

    #[test]
    fn parse_rejects_missing_separator() {
        assert!("mainbackup".parse::<MasterKeyReference>().is_err());
    }

    #[test]
    fn parse_rejects_empty_components() {
        assert!(":alias".parse::<MasterKeyReference>().is_err());
        assert!("keystore:".parse::<MasterKeyReference>().is_err());
        assert!(":".parse::<MasterKeyReference>().is_err());
        assert!("".parse::<MasterKeyReference>().is_err());
    }

    #[test]
    fn parse_rejects_multiple_separators() {
        assert!("main:alias:extra".parse::<MasterKeyReference>().is_err());
    }

    #[test]
    fn new_rejects_separator_in_components() {
        assert!(MasterKeyReference::new("main:2", "alias").is_err());
        assert!(MasterKeyReference::new("main", "a:b").is_err());
    }

    #[test]
    fn equality_is_componentwise() {
        let a = MasterKeyReference::new("main", "key").unwrap();
        let b: MasterKeyReference = "main:key".parse().unwrap();
        let c = MasterKeyReference::new("other", "key").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn serde_as_string() {
        let key = MasterKeyReference::new("main", "key-1").unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"main:key-1\"");
        let decoded: MasterKeyReference = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn serde_rejects_malformed() {
        assert!(serde_json::from_str::<MasterKeyReference>("\"no-separator\"").is_err());
    }

    #[test]
    fn ordering_is_lexicographic() {
        let a = MasterKeyReference::new("main", "alpha").unwrap();
        let b = MasterKeyReference::new("main", "beta").unwrap();
        let c = MasterKeyReference::new("other", "alpha").unwrap();
        assert!(a < b);
        assert!(b < c);
    }
}
