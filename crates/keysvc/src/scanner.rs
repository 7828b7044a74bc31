//! Eligibility Scanner: reports which master keys still protect live content.
//!
//! A disabled key with a non-zero envelope count is "eligible for
//! re-encryption" — it cannot be retired for good until the re-encryption
//! engine has driven its count to zero. Counts come from one consistent read
//! of the envelope store; a rotation running concurrently may make them
//! momentarily stale, but they converge to the true value once the run
//! commits its swaps.

use std::collections::BTreeMap;
use std::sync::Arc;

use common::MasterKeyReference;

use crate::envelope::store::{EnvelopeStore, StoreError};
use crate::registry::{KeyState, MasterKeyRegistry};

/// Read-only view over the registry and envelope store.
#[derive(Clone)]
pub struct EligibilityScanner {
    registry: MasterKeyRegistry,
    store: Arc<dyn EnvelopeStore>,
}

impl EligibilityScanner {
    pub fn new(registry: MasterKeyRegistry, store: Arc<dyn EnvelopeStore>) -> Self {
        Self { registry, store }
    }

    /// Total number of envelopes across all master keys.
    pub async fn count_total(&self) -> Result<u64, StoreError> {
        self.store.count_total().await
    }

    /// Number of envelopes wrapped under `master_key`.
    ///
    /// Zero for keys no envelope references, registered or not.
    pub async fn count_for(&self, master_key: &MasterKeyReference) -> Result<u64, StoreError> {
        self.store.count_for(master_key).await
    }

    /// Per-master-key envelope counts.
    pub async fn counts_by_key(&self) -> Result<BTreeMap<MasterKeyReference, u64>, StoreError> {
        self.store.counts_by_key().await
    }

    /// Disabled master keys that still protect at least one envelope,
    /// ordered oldest-disabled-first: keys retired longest should be
    /// cleared first.
    pub async fn keys_requiring_reencryption(
        &self,
    ) -> Result<Vec<MasterKeyReference>, StoreError> {
        let snapshot = self.registry.snapshot();
        let counts = self.store.counts_by_key().await?;

        let mut eligible: Vec<(u64, &MasterKeyReference)> = snapshot
            .in_state(KeyState::Disabled)
            .filter(|record| counts.get(record.reference()).copied().unwrap_or(0) > 0)
            .map(|record| (record.disabled_since().unwrap_or(0), record.reference()))
            .collect();
        eligible.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));

        Ok(eligible
            .into_iter()
            .map(|(_, reference)| reference.clone())
            .collect())
    }
}
