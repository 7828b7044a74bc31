//! Configuration loading and validation for the key service.
//!
//! All values are read from environment variables at startup. The process will
//! exit with a clear error message if any required variable is missing or invalid.

use std::collections::HashSet;

use anyhow::{Context, Result};
use common::MasterKeyReference;
use serde::Deserialize;

/// Validated key service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Keystore backend: `"local"` (in-process, dev/test) or `"kms"`.
    #[serde(default = "default_keystore_backend")]
    pub keystore_backend: String,

    /// Comma-separated master key identifiers (`<keystoreId>:<alias>`).
    /// **Required.**
    pub master_keys: String,

    /// Comma-separated identifiers of keys that start out disabled.
    #[serde(default)]
    pub disabled_keys: String,

    /// Endpoint URL override for the KMS client (VPC endpoint, localstack).
    #[serde(default)]
    pub kms_endpoint: Option<String>,

    /// Envelopes per re-encryption batch; the checkpoint unit.
    #[serde(default = "default_reencryption_batch_size")]
    pub reencryption_batch_size: usize,

    /// Emit a progress log line every N processed envelopes. `0` disables.
    #[serde(default = "default_reencryption_log_interval")]
    pub reencryption_log_interval: u64,

    /// Port the admin HTTP server listens on.
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// OTLP endpoint for traces and metrics. When unset, telemetry is
    /// limited to structured log output.
    #[serde(default)]
    pub otel_exporter_otlp_endpoint: Option<String>,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_keystore_backend() -> String {
    "local".into()
}
fn default_reencryption_batch_size() -> usize {
    100
}
fn default_reencryption_log_interval() -> u64 {
    1000
}
fn default_http_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent or cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        if !matches!(self.keystore_backend.as_str(), "local" | "kms") {
            anyhow::bail!(
                "KEYSTORE_BACKEND must be \"local\" or \"kms\", got {:?}",
                self.keystore_backend
            );
        }
        if self.master_keys.trim().is_empty() {
            anyhow::bail!("MASTER_KEYS is required and must not be empty");
        }
        if self.reencryption_batch_size == 0 {
            anyhow::bail!("REENCRYPTION_BATCH_SIZE must be > 0");
        }
        self.master_key_refs()?;
        self.disabled_key_refs()?;
        Ok(())
    }

    /// Parse the configured master key identifiers, preserving order.
    pub fn master_key_refs(&self) -> Result<Vec<MasterKeyReference>> {
        parse_identifier_list(&self.master_keys).context("invalid MASTER_KEYS entry")
    }

    /// Parse the configured start-disabled identifiers.
    pub fn disabled_key_refs(&self) -> Result<HashSet<MasterKeyReference>> {
        Ok(parse_identifier_list(&self.disabled_keys)
            .context("invalid DISABLED_KEYS entry")?
            .into_iter()
            .collect())
    }
}

fn parse_identifier_list(raw: &str) -> Result<Vec<MasterKeyReference>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse::<MasterKeyReference>()
                .with_context(|| format!("malformed master key identifier: {entry:?}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            keystore_backend: default_keystore_backend(),
            master_keys: "main:key-a,main:key-b".into(),
            disabled_keys: String::new(),
            kms_endpoint: None,
            reencryption_batch_size: default_reencryption_batch_size(),
            reencryption_log_interval: default_reencryption_log_interval(),
            http_port: default_http_port(),
            otel_exporter_otlp_endpoint: None,
            log_level: default_log_level(),
        }
    }

    #[test]
    fn defaults_are_correct() {
        assert_eq!(default_keystore_backend(), "local");
        assert_eq!(default_reencryption_batch_size(), 100);
        assert_eq!(default_reencryption_log_interval(), 1000);
        assert_eq!(default_http_port(), 8080);
        assert_eq!(default_log_level(), "info");
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn master_key_refs_parse_in_order() {
        let refs = base_config().master_key_refs().unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].alias(), "key-a");
        assert_eq!(refs[1].alias(), "key-b");
    }

    #[test]
    fn validate_rejects_empty_master_keys() {
        let cfg = Config {
            master_keys: "  ".into(),
            ..base_config()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_malformed_identifier() {
        let cfg = Config {
            master_keys: "main:key-a,nosep".into(),
            ..base_config()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_unknown_backend() {
        let cfg = Config {
            keystore_backend: "vault".into(),
            ..base_config()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_batch_size() {
        let cfg = Config {
            reencryption_batch_size: 0,
            ..base_config()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn disabled_keys_parse_with_whitespace() {
        let cfg = Config {
            disabled_keys: " main:old , main:older ".into(),
            ..base_config()
        };
        let refs = cfg.disabled_key_refs().unwrap();
        assert_eq!(refs.len(), 2);
    }
}
