//! Background execution of re-encryption runs.
//!
//! The admin command that triggers a rotation is fire-and-forget: the
//! tracker spawns the engine on a Tokio task and the caller observes true
//! completion by polling the symmetric key count toward zero. At most one
//! run per source key is in flight at a time, and every run carries a
//! cancellation token so shutdown can stop the fleet at batch boundaries.

use std::collections::HashMap;
use std::sync::Arc;

use common::{MasterKeyReference, ServiceError};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::ReEncryptionEngine;

/// Errors produced when triggering a run.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// A run for this source key is already in flight.
    #[error("re-encryption already running for master key: {0}")]
    AlreadyRunning(MasterKeyReference),
}

impl From<TrackerError> for ServiceError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::AlreadyRunning(key) => ServiceError::RotationAlreadyRunning(key),
        }
    }
}

/// Spawns and supervises background re-encryption runs.
#[derive(Clone)]
pub struct RotationTracker {
    engine: ReEncryptionEngine,
    runs: Arc<Mutex<HashMap<MasterKeyReference, CancellationToken>>>,
}

impl RotationTracker {
    pub fn new(engine: ReEncryptionEngine) -> Self {
        Self {
            engine,
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start a background run for `source`, returning its run id.
    ///
    /// # Errors
    ///
    /// [`TrackerError::AlreadyRunning`] when a run for the same key has not
    /// finished yet — the in-flight run already converges toward the same
    /// end state.
    pub async fn start(&self, source: MasterKeyReference) -> Result<Uuid, TrackerError> {
        let mut runs = self.runs.lock().await;
        if runs.contains_key(&source) {
            return Err(TrackerError::AlreadyRunning(source));
        }

        let token = CancellationToken::new();
        runs.insert(source.clone(), token.clone());
        drop(runs);

        let run_id = Uuid::new_v4();
        let engine = self.engine.clone();
        let runs = self.runs.clone();
        tokio::spawn(async move {
            match engine.re_encrypt(run_id, &source, &token).await {
                Ok(report) if report.completed => {
                    info!(run_id = %report.run_id, key = %report.source, migrated = report.migrated, "background re-encryption finished");
                }
                Ok(_) => {
                    info!(run_id = %run_id, key = %source, "background re-encryption cancelled; checkpoint retained");
                }
                Err(e) => {
                    warn!(run_id = %run_id, key = %source, error = %e, "background re-encryption failed; resumable from checkpoint");
                }
            }
            runs.lock().await.remove(&source);
        });

        Ok(run_id)
    }

    /// Whether a run for `source` is currently in flight.
    pub async fn is_running(&self, source: &MasterKeyReference) -> bool {
        self.runs.lock().await.contains_key(source)
    }

    /// Cancel every in-flight run. Each stops at its next batch boundary
    /// with its checkpoint saved.
    pub async fn shutdown(&self) {
        for token in self.runs.lock().await.values() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::store::{EnvelopeStore, InMemoryEnvelopeStore};
    use crate::envelope::{EnvelopeCodec, SymmetricKey};
    use crate::keystore::{Keystore, KeystoreError, LocalKeystore, WrappedKey};
    use crate::registry::MasterKeyRegistry;
    use crate::rotation::InMemoryCheckpointStore;
    use std::collections::HashSet;
    use std::time::Duration;

    fn key(alias: &str) -> MasterKeyReference {
        MasterKeyReference::new("local", alias).unwrap()
    }

    /// Delegating keystore that slows every unwrap, keeping runs in flight
    /// long enough for the tests to observe them.
    struct SlowKeystore(LocalKeystore);

    #[async_trait::async_trait]
    impl Keystore for SlowKeystore {
        async fn wrap(
            &self,
            master_key: &MasterKeyReference,
            plaintext: &[u8],
        ) -> Result<WrappedKey, KeystoreError> {
            self.0.wrap(master_key, plaintext).await
        }

        async fn unwrap(
            &self,
            master_key: &MasterKeyReference,
            wrapped: &WrappedKey,
        ) -> Result<Vec<u8>, KeystoreError> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.0.unwrap(master_key, wrapped).await
        }

        async fn key_digest(
            &self,
            master_key: &MasterKeyReference,
        ) -> Result<String, KeystoreError> {
            self.0.key_digest(master_key).await
        }
    }

    async fn setup(items: usize) -> (MasterKeyRegistry, Arc<InMemoryEnvelopeStore>, RotationTracker)
    {
        let refs = vec![key("a"), key("b")];
        let keystore = Arc::new(SlowKeystore(LocalKeystore::generate(refs.clone())));
        let registry = MasterKeyRegistry::seed(refs, &HashSet::new()).unwrap();
        let codec = EnvelopeCodec::new(registry.clone(), keystore);
        let store = Arc::new(InMemoryEnvelopeStore::new());

        for i in 0..items {
            let symmetric = SymmetricKey::new(vec![i as u8 + 1; 16]);
            let envelope = codec
                .wrap(&format!("content-{i:03}"), &symmetric, &key("a"))
                .await
                .unwrap();
            store.insert(envelope).await.unwrap();
        }
        registry.disable(&key("a")).await.unwrap();

        let engine = ReEncryptionEngine::new(
            registry.clone(),
            codec,
            store.clone(),
            Arc::new(InMemoryCheckpointStore::new()),
            1,
            0,
        );
        (registry, store, RotationTracker::new(engine))
    }

    async fn wait_until_idle(tracker: &RotationTracker, source: &MasterKeyReference) {
        for _ in 0..500 {
            if !tracker.is_running(source).await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("rotation for {source} never finished");
    }

    #[tokio::test]
    async fn concurrent_start_for_same_key_rejected() {
        let (_registry, store, tracker) = setup(5).await;

        tracker.start(key("a")).await.unwrap();
        let second = tracker.start(key("a")).await;
        assert!(matches!(second, Err(TrackerError::AlreadyRunning(_))));

        wait_until_idle(&tracker, &key("a")).await;
        assert_eq!(store.count_for(&key("a")).await.unwrap(), 0);

        // After completion a fresh trigger is accepted (and is a no-op).
        tracker.start(key("a")).await.unwrap();
        wait_until_idle(&tracker, &key("a")).await;
    }

    #[tokio::test]
    async fn shutdown_cancels_in_flight_runs() {
        let (_registry, _store, tracker) = setup(20).await;

        tracker.start(key("a")).await.unwrap();
        tracker.shutdown().await;
        wait_until_idle(&tracker, &key("a")).await;
        assert!(!tracker.is_running(&key("a")).await);
    }
}
