//! Envelope storage boundary.
//!
//! The content storage layer owns the envelope table; this service reads and
//! mutates it exclusively through [`EnvelopeStore`]. Every stored envelope
//! carries a per-item version used as the compare-and-swap token: the swap is
//! the sole unit of commitment during rotation, so a concurrent writer that
//! replaced an item since it was read simply wins the race.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::MasterKeyReference;
use thiserror::Error;
use tokio::sync::RwLock;

use super::SymmetricKeyEnvelope;

/// Errors produced by an envelope store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An envelope already exists for the content item.
    #[error("envelope already exists for content item {0}")]
    AlreadyExists(String),

    /// The backend cannot currently be reached. Raised by durable backends;
    /// the in-memory store never produces it.
    #[allow(dead_code)]
    #[error("envelope storage unavailable: {0}")]
    Unavailable(String),
}

/// An envelope plus its compare-and-swap version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedEnvelope {
    pub envelope: SymmetricKeyEnvelope,
    /// Monotonically increasing per-item version; bumped by every mutation.
    pub version: u64,
}

/// Storage operations over the envelope table.
#[async_trait]
pub trait EnvelopeStore: Send + Sync {
    /// Fetch one envelope by content id.
    async fn get(&self, content_id: &str) -> Result<Option<VersionedEnvelope>, StoreError>;

    /// Insert a new envelope at version 1.
    ///
    /// # Errors
    ///
    /// [`StoreError::AlreadyExists`] if the content item already has one.
    async fn insert(&self, envelope: SymmetricKeyEnvelope) -> Result<(), StoreError>;

    /// Replace an item's envelope unconditionally, bumping its version.
    ///
    /// This is the content-write path: a new content write supersedes
    /// whatever envelope was stored before. Inserts when absent.
    async fn replace(&self, envelope: SymmetricKeyEnvelope) -> Result<u64, StoreError>;

    /// Swap an item's envelope only if its version still equals
    /// `expected_version`.
    ///
    /// Returns `false` without modifying anything when the version moved or
    /// the item was removed — the concurrent mutation already supersedes the
    /// caller's intent.
    async fn compare_and_swap(
        &self,
        expected_version: u64,
        envelope: SymmetricKeyEnvelope,
    ) -> Result<bool, StoreError>;

    /// Remove an item's envelope. Returns whether one was present.
    async fn remove(&self, content_id: &str) -> Result<bool, StoreError>;

    /// Envelopes wrapped under `master_key` with content id strictly greater
    /// than `cursor`, in content id order, at most `limit` items.
    async fn scan_wrapped_by(
        &self,
        master_key: &MasterKeyReference,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<Vec<VersionedEnvelope>, StoreError>;

    /// Total number of stored envelopes.
    async fn count_total(&self) -> Result<u64, StoreError>;

    /// Number of envelopes wrapped under `master_key`.
    async fn count_for(&self, master_key: &MasterKeyReference) -> Result<u64, StoreError>;

    /// Per-master-key envelope counts, taken from one consistent read.
    async fn counts_by_key(&self) -> Result<BTreeMap<MasterKeyReference, u64>, StoreError>;
}

/// In-memory envelope store.
///
/// Backed by an ordered map behind a `tokio::sync::RwLock`; the write lock is
/// held only for the map operation itself, never across keystore calls.
#[derive(Clone, Default)]
pub struct InMemoryEnvelopeStore {
    inner: Arc<RwLock<BTreeMap<String, VersionedEnvelope>>>,
}

impl InMemoryEnvelopeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EnvelopeStore for InMemoryEnvelopeStore {
    async fn get(&self, content_id: &str) -> Result<Option<VersionedEnvelope>, StoreError> {
        Ok(self.inner.read().await.get(content_id).cloned())
    }

    async fn insert(&self, envelope: SymmetricKeyEnvelope) -> Result<(), StoreError> {
        let mut map = self.inner.write().await;
        if map.contains_key(&envelope.content_id) {
            return Err(StoreError::AlreadyExists(envelope.content_id));
        }
        map.insert(
            envelope.content_id.clone(),
            VersionedEnvelope {
                envelope,
                version: 1,
            },
        );
        Ok(())
    }

    async fn replace(&self, envelope: SymmetricKeyEnvelope) -> Result<u64, StoreError> {
        let mut map = self.inner.write().await;
        let version = map
            .get(&envelope.content_id)
            .map(|existing| existing.version + 1)
            .unwrap_or(1);
        map.insert(
            envelope.content_id.clone(),
            VersionedEnvelope { envelope, version },
        );
        Ok(version)
    }

    async fn compare_and_swap(
        &self,
        expected_version: u64,
        envelope: SymmetricKeyEnvelope,
    ) -> Result<bool, StoreError> {
        let mut map = self.inner.write().await;
        match map.get_mut(&envelope.content_id) {
            Some(existing) if existing.version == expected_version => {
                existing.version += 1;
                existing.envelope = envelope;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove(&self, content_id: &str) -> Result<bool, StoreError> {
        Ok(self.inner.write().await.remove(content_id).is_some())
    }

    async fn scan_wrapped_by(
        &self,
        master_key: &MasterKeyReference,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<Vec<VersionedEnvelope>, StoreError> {
        let map = self.inner.read().await;
        let range: Box<dyn Iterator<Item = (&String, &VersionedEnvelope)> + '_> = match cursor {
            Some(cursor) => Box::new(
                map.range::<str, _>((
                    std::ops::Bound::Excluded(cursor),
                    std::ops::Bound::Unbounded,
                )),
            ),
            None => Box::new(map.iter()),
        };
        Ok(range
            .filter(|(_, item)| &item.envelope.master_key == master_key)
            .take(limit)
            .map(|(_, item)| item.clone())
            .collect())
    }

    async fn count_total(&self) -> Result<u64, StoreError> {
        Ok(self.inner.read().await.len() as u64)
    }

    async fn count_for(&self, master_key: &MasterKeyReference) -> Result<u64, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .values()
            .filter(|item| &item.envelope.master_key == master_key)
            .count() as u64)
    }

    async fn counts_by_key(&self) -> Result<BTreeMap<MasterKeyReference, u64>, StoreError> {
        let map = self.inner.read().await;
        let mut counts = BTreeMap::new();
        for item in map.values() {
            *counts.entry(item.envelope.master_key.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn key(alias: &str) -> MasterKeyReference {
        MasterKeyReference::new("main", alias).unwrap()
    }

    fn envelope(content_id: &str, alias: &str) -> SymmetricKeyEnvelope {
        SymmetricKeyEnvelope {
            content_id: content_id.into(),
            wrapped_key: Bytes::from_static(b"wrapped"),
            nonce: Bytes::new(),
            algorithm: "AES".into(),
            master_key: key(alias),
        }
    }

    #[tokio::test]
    async fn insert_and_get() {
        let store = InMemoryEnvelopeStore::new();
        store.insert(envelope("c1", "a")).await.unwrap();
        let item = store.get("c1").await.unwrap().unwrap();
        assert_eq!(item.version, 1);
        assert_eq!(item.envelope.master_key, key("a"));
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn insert_rejects_duplicate() {
        let store = InMemoryEnvelopeStore::new();
        store.insert(envelope("c1", "a")).await.unwrap();
        assert!(matches!(
            store.insert(envelope("c1", "a")).await,
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn replace_bumps_version() {
        let store = InMemoryEnvelopeStore::new();
        store.insert(envelope("c1", "a")).await.unwrap();
        let version = store.replace(envelope("c1", "b")).await.unwrap();
        assert_eq!(version, 2);
        let item = store.get("c1").await.unwrap().unwrap();
        assert_eq!(item.envelope.master_key, key("b"));
    }

    #[tokio::test]
    async fn cas_succeeds_on_matching_version() {
        let store = InMemoryEnvelopeStore::new();
        store.insert(envelope("c1", "a")).await.unwrap();
        assert!(store.compare_and_swap(1, envelope("c1", "b")).await.unwrap());
        let item = store.get("c1").await.unwrap().unwrap();
        assert_eq!(item.version, 2);
        assert_eq!(item.envelope.master_key, key("b"));
    }

    #[tokio::test]
    async fn cas_skips_on_stale_version() {
        let store = InMemoryEnvelopeStore::new();
        store.insert(envelope("c1", "a")).await.unwrap();
        store.replace(envelope("c1", "a")).await.unwrap(); // version now 2
        assert!(!store.compare_and_swap(1, envelope("c1", "b")).await.unwrap());
        // Untouched by the failed swap.
        let item = store.get("c1").await.unwrap().unwrap();
        assert_eq!(item.envelope.master_key, key("a"));
        assert_eq!(item.version, 2);
    }

    #[tokio::test]
    async fn cas_skips_on_removed_item() {
        let store = InMemoryEnvelopeStore::new();
        store.insert(envelope("c1", "a")).await.unwrap();
        store.remove("c1").await.unwrap();
        assert!(!store.compare_and_swap(1, envelope("c1", "b")).await.unwrap());
    }

    #[tokio::test]
    async fn scan_filters_pages_and_orders() {
        let store = InMemoryEnvelopeStore::new();
        for id in ["c1", "c2", "c3", "c4", "c5"] {
            store.insert(envelope(id, "a")).await.unwrap();
        }
        store.replace(envelope("c3", "b")).await.unwrap();

        let first = store.scan_wrapped_by(&key("a"), None, 2).await.unwrap();
        assert_eq!(
            first
                .iter()
                .map(|i| i.envelope.content_id.as_str())
                .collect::<Vec<_>>(),
            vec!["c1", "c2"]
        );

        let rest = store
            .scan_wrapped_by(&key("a"), Some("c2"), 10)
            .await
            .unwrap();
        assert_eq!(
            rest.iter()
                .map(|i| i.envelope.content_id.as_str())
                .collect::<Vec<_>>(),
            vec!["c4", "c5"]
        );
    }

    #[tokio::test]
    async fn counts_reflect_contents() {
        let store = InMemoryEnvelopeStore::new();
        store.insert(envelope("c1", "a")).await.unwrap();
        store.insert(envelope("c2", "a")).await.unwrap();
        store.insert(envelope("c3", "b")).await.unwrap();

        assert_eq!(store.count_total().await.unwrap(), 3);
        assert_eq!(store.count_for(&key("a")).await.unwrap(), 2);
        assert_eq!(store.count_for(&key("ghost")).await.unwrap(), 0);

        let by_key = store.counts_by_key().await.unwrap();
        assert_eq!(by_key[&key("a")], 2);
        assert_eq!(by_key[&key("b")], 1);
        assert_eq!(by_key.len(), 2);
    }
}
