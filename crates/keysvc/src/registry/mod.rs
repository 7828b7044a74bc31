//! Master Key Registry: the authoritative set of master key records and
//! their lifecycle state.
//!
//! Readers never lock: the full record set is published as an immutable
//! [`RegistrySnapshot`] behind `arc-swap`, so `enable`/`disable` never race
//! with concurrent wrap/unwrap or scanning. Mutations serialize against each
//! other behind an async mutex, re-validate their preconditions against the
//! snapshot current *inside* the critical section, and publish a new snapshot
//! with a bumped version in a single atomic swap.

pub mod snapshot;

pub use snapshot::{KeyState, MasterKeyRecord, RegistrySnapshot};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use common::{MasterKeyReference, ServiceError};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::envelope::store::{EnvelopeStore, StoreError};

/// Errors produced by the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The referenced master key is not registered.
    #[error("unknown master key: {0}")]
    UnknownKey(MasterKeyReference),

    /// Disabling this key would leave the registry without any active key.
    #[error("cannot disable last remaining active master key: {0}")]
    LastActiveKey(MasterKeyReference),

    /// The registry would be seeded without a single active key.
    #[error("at least one master key must be active")]
    NoActiveKeys,

    /// Pruning was requested for a key that is still active.
    #[error("master key is still active: {0}")]
    StillActive(MasterKeyReference),

    /// Pruning was requested while envelopes still reference the key.
    #[error("master key {reference} still protects {count} symmetric keys")]
    StillReferenced {
        reference: MasterKeyReference,
        count: u64,
    },

    /// The envelope store could not be read during the prune check.
    #[error("envelope storage failed: {0}")]
    Store(#[from] StoreError),
}

impl From<RegistryError> for ServiceError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownKey(key) => ServiceError::UnknownMasterKey(key),
            RegistryError::LastActiveKey(key) => ServiceError::CannotDisableLastActiveKey(key),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

/// Thread-safe master key registry.
///
/// Cheap to clone; all clones share the same snapshot and writer lock.
#[derive(Clone)]
pub struct MasterKeyRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    snapshot: ArcSwap<RegistrySnapshot>,
    // Serializes mutations; readers go through `snapshot` and never take it.
    write_lock: Mutex<()>,
}

impl MasterKeyRegistry {
    /// Seed the registry with the configured master keys.
    ///
    /// Every key in `disabled` must also appear in `keys`. Keys not listed as
    /// disabled start out Active.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownKey`] if a disabled reference is not
    /// among the seeded keys, or [`RegistryError::NoActiveKeys`] if seeding
    /// would leave no active key.
    pub fn seed(
        keys: Vec<MasterKeyReference>,
        disabled: &HashSet<MasterKeyReference>,
    ) -> Result<Self, RegistryError> {
        let seeded: HashSet<&MasterKeyReference> = keys.iter().collect();
        if let Some(unknown) = disabled.iter().find(|d| !seeded.contains(d)) {
            return Err(RegistryError::UnknownKey(unknown.clone()));
        }
        drop(seeded);

        let now = now_millis();
        let mut records = HashMap::new();
        for reference in keys {
            let state = if disabled.contains(&reference) {
                KeyState::Disabled
            } else {
                KeyState::Active
            };
            records.insert(
                reference.clone(),
                MasterKeyRecord::new(reference, state, now),
            );
        }

        let snapshot = RegistrySnapshot::new(1, records);
        if snapshot.active().is_empty() {
            return Err(RegistryError::NoActiveKeys);
        }

        info!(
            active = snapshot.active().len(),
            disabled = snapshot.disabled().len(),
            "master key registry seeded"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                snapshot: ArcSwap::new(Arc::new(snapshot)),
                write_lock: Mutex::new(()),
            }),
        })
    }

    /// Load the current snapshot. Lock-free; safe on any hot path.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.inner.snapshot.load_full()
    }

    /// Active key references in activation order.
    pub fn list_active(&self) -> Vec<MasterKeyReference> {
        self.snapshot().active()
    }

    /// Disabled key references in activation order.
    pub fn list_disabled(&self) -> Vec<MasterKeyReference> {
        self.snapshot().disabled()
    }

    /// Transition a key to Active, (re-)allowing its use for new wraps.
    ///
    /// Idempotent if the key is already active.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownKey`] if the reference is not
    /// registered.
    pub async fn enable(&self, reference: &MasterKeyReference) -> Result<(), RegistryError> {
        let _guard = self.inner.write_lock.lock().await;
        let current = self.inner.snapshot.load();

        let record = current
            .get(reference)
            .ok_or_else(|| RegistryError::UnknownKey(reference.clone()))?;

        if record.state() == KeyState::Active {
            debug!(key = %reference, "master key already active");
            return Ok(());
        }

        let mut records = current.records().clone();
        records.insert(reference.clone(), record.enabled(now_millis()));
        self.publish(&current, records);

        info!(key = %reference, "master key enabled");
        Ok(())
    }

    /// Transition a key to Disabled, preventing its use for new wraps.
    ///
    /// The key remains available for decryption of existing envelopes.
    /// Idempotent if the key is already disabled.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownKey`] if the reference is not
    /// registered, or [`RegistryError::LastActiveKey`] if it is the sole
    /// remaining active key. The last-active check is evaluated against the
    /// snapshot current inside the mutation lock, so two concurrent disables
    /// cannot race the registry down to zero active keys.
    pub async fn disable(&self, reference: &MasterKeyReference) -> Result<(), RegistryError> {
        let _guard = self.inner.write_lock.lock().await;
        let current = self.inner.snapshot.load();

        let record = current
            .get(reference)
            .ok_or_else(|| RegistryError::UnknownKey(reference.clone()))?;

        if record.state() == KeyState::Disabled {
            debug!(key = %reference, "master key already disabled");
            return Ok(());
        }

        let remaining = current
            .in_state(KeyState::Active)
            .filter(|r| r.reference() != reference)
            .count();
        if remaining == 0 {
            return Err(RegistryError::LastActiveKey(reference.clone()));
        }

        let mut records = current.records().clone();
        records.insert(reference.clone(), record.disabled(now_millis()));
        self.publish(&current, records);

        info!(key = %reference, "master key disabled");
        Ok(())
    }

    /// Remove a retired key record entirely. Irreversible.
    ///
    /// Only a Disabled record whose envelope count is zero may be pruned; the
    /// count is read from `store` inside the mutation lock. Because new wraps
    /// never target disabled keys, the count cannot rise again once zero.
    ///
    /// # Errors
    ///
    /// [`RegistryError::UnknownKey`], [`RegistryError::StillActive`] or
    /// [`RegistryError::StillReferenced`] when the preconditions fail.
    // Retained for the administrative prune flow; not exposed over HTTP.
    #[allow(dead_code)]
    pub async fn prune(
        &self,
        reference: &MasterKeyReference,
        store: &dyn EnvelopeStore,
    ) -> Result<(), RegistryError> {
        let _guard = self.inner.write_lock.lock().await;
        let current = self.inner.snapshot.load();

        let record = current
            .get(reference)
            .ok_or_else(|| RegistryError::UnknownKey(reference.clone()))?;
        if record.state() == KeyState::Active {
            return Err(RegistryError::StillActive(reference.clone()));
        }

        let count = store.count_for(reference).await?;
        if count > 0 {
            return Err(RegistryError::StillReferenced {
                reference: reference.clone(),
                count,
            });
        }

        let mut records = current.records().clone();
        records.remove(reference);
        self.publish(&current, records);

        info!(key = %reference, "master key record pruned");
        Ok(())
    }

    fn publish(
        &self,
        current: &RegistrySnapshot,
        records: HashMap<MasterKeyReference, MasterKeyRecord>,
    ) {
        let next = RegistrySnapshot::new(current.version() + 1, records);
        self.inner.snapshot.store(Arc::new(next));
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::store::InMemoryEnvelopeStore;
    use crate::envelope::SymmetricKeyEnvelope;
    use bytes::Bytes;

    fn key(alias: &str) -> MasterKeyReference {
        MasterKeyReference::new("main", alias).unwrap()
    }

    fn registry(active: &[&str], disabled: &[&str]) -> MasterKeyRegistry {
        let keys = active
            .iter()
            .chain(disabled.iter())
            .map(|alias| key(alias))
            .collect();
        let disabled = disabled.iter().map(|alias| key(alias)).collect();
        MasterKeyRegistry::seed(keys, &disabled).unwrap()
    }

    #[test]
    fn seed_rejects_all_disabled() {
        let keys = vec![key("a")];
        let disabled = [key("a")].into_iter().collect();
        assert!(matches!(
            MasterKeyRegistry::seed(keys, &disabled),
            Err(RegistryError::NoActiveKeys)
        ));
    }

    #[test]
    fn seed_rejects_unknown_disabled_reference() {
        let keys = vec![key("a")];
        let disabled = [key("ghost")].into_iter().collect();
        assert!(matches!(
            MasterKeyRegistry::seed(keys, &disabled),
            Err(RegistryError::UnknownKey(_))
        ));
    }

    #[tokio::test]
    async fn disable_last_active_key_rejected() {
        let reg = registry(&["only"], &[]);
        let result = reg.disable(&key("only")).await;
        assert!(matches!(result, Err(RegistryError::LastActiveKey(_))));
        // State unchanged.
        assert_eq!(reg.list_active(), vec![key("only")]);
        assert!(reg.list_disabled().is_empty());
    }

    #[tokio::test]
    async fn disable_then_enable_round_trip() {
        let reg = registry(&["a", "b"], &[]);
        reg.disable(&key("a")).await.unwrap();
        assert_eq!(reg.list_active(), vec![key("b")]);
        assert_eq!(reg.list_disabled(), vec![key("a")]);

        reg.enable(&key("a")).await.unwrap();
        assert!(reg.list_disabled().is_empty());
        assert_eq!(reg.list_active().len(), 2);
    }

    #[tokio::test]
    async fn enable_unknown_key_rejected() {
        let reg = registry(&["a"], &[]);
        assert!(matches!(
            reg.enable(&key("ghost")).await,
            Err(RegistryError::UnknownKey(_))
        ));
    }

    #[tokio::test]
    async fn enable_is_idempotent() {
        let reg = registry(&["a"], &[]);
        let version_before = reg.snapshot().version();
        reg.enable(&key("a")).await.unwrap();
        // No state change, no new snapshot.
        assert_eq!(reg.snapshot().version(), version_before);
    }

    #[tokio::test]
    async fn disable_is_idempotent() {
        let reg = registry(&["a", "b"], &[]);
        reg.disable(&key("b")).await.unwrap();
        let version = reg.snapshot().version();
        reg.disable(&key("b")).await.unwrap();
        assert_eq!(reg.snapshot().version(), version);
    }

    #[tokio::test]
    async fn mutations_bump_snapshot_version() {
        let reg = registry(&["a", "b"], &[]);
        let v1 = reg.snapshot().version();
        reg.disable(&key("a")).await.unwrap();
        let v2 = reg.snapshot().version();
        assert_eq!(v2, v1 + 1);
    }

    #[tokio::test]
    async fn readers_hold_pre_mutation_snapshot() {
        let reg = registry(&["a", "b"], &[]);
        let before = reg.snapshot();
        reg.disable(&key("a")).await.unwrap();
        // The old snapshot is still fully intact for its holders.
        assert_eq!(before.state_of(&key("a")), Some(KeyState::Active));
        assert_eq!(reg.snapshot().state_of(&key("a")), Some(KeyState::Disabled));
    }

    #[tokio::test]
    async fn wrap_target_follows_most_recent_enable() {
        let reg = registry(&["a"], &[]);
        // Freshly seeded: only candidate.
        assert_eq!(reg.snapshot().current_wrap_target(), Some(key("a")));
    }

    #[tokio::test]
    async fn prune_requires_disabled_and_unreferenced() {
        let reg = registry(&["a", "b"], &[]);
        let store = InMemoryEnvelopeStore::new();

        // Active key cannot be pruned.
        assert!(matches!(
            reg.prune(&key("a"), &store).await,
            Err(RegistryError::StillActive(_))
        ));

        reg.disable(&key("a")).await.unwrap();
        store
            .insert(SymmetricKeyEnvelope {
                content_id: "content-1".into(),
                wrapped_key: Bytes::from_static(b"blob"),
                nonce: Bytes::new(),
                algorithm: "AES".into(),
                master_key: key("a"),
            })
            .await
            .unwrap();

        // Still referenced by one envelope.
        assert!(matches!(
            reg.prune(&key("a"), &store).await,
            Err(RegistryError::StillReferenced { count: 1, .. })
        ));

        store.remove("content-1").await.unwrap();
        reg.prune(&key("a"), &store).await.unwrap();
        assert!(reg.snapshot().get(&key("a")).is_none());

        // Pruning again reports the key as unknown.
        assert!(matches!(
            reg.prune(&key("a"), &store).await,
            Err(RegistryError::UnknownKey(_))
        ));
    }
}
