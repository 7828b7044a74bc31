//! Rotation checkpoints: the resumable cursor of a re-encryption run.
//!
//! A checkpoint is saved at every batch boundary, so an interrupted run
//! (cancellation, keystore outage, process restart) resumes behind the last
//! committed batch instead of starting over. The store is a seam: the
//! in-memory implementation covers a single process lifetime, and a durable
//! backend can implement the same trait without touching the engine.

use async_trait::async_trait;
use common::MasterKeyReference;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Persistent state of one re-encryption run, keyed by its source key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationCheckpoint {
    /// The master key whose envelopes are being migrated.
    pub source: MasterKeyReference,
    /// Content id of the last item a batch finished with; scanning resumes
    /// strictly after it. `None` means the run has not committed a batch yet.
    pub cursor: Option<String>,
    /// Envelopes migrated so far, across resumes.
    pub migrated: u64,
    /// Envelopes skipped because a concurrent writer superseded them.
    pub skipped: u64,
    /// Envelopes excluded because of integrity violations.
    pub violations: u64,
}

impl RotationCheckpoint {
    pub fn new(source: MasterKeyReference) -> Self {
        Self {
            source,
            cursor: None,
            migrated: 0,
            skipped: 0,
            violations: 0,
        }
    }
}

/// Error raised when checkpoint storage cannot be reached. Raised by durable
/// backends; the in-memory store never produces it.
#[derive(Debug, Error)]
#[error("checkpoint storage unavailable: {0}")]
pub struct CheckpointError(pub String);

/// Storage for rotation checkpoints, one per source master key.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the checkpoint of an interrupted run, if any.
    async fn load(
        &self,
        source: &MasterKeyReference,
    ) -> Result<Option<RotationCheckpoint>, CheckpointError>;

    /// Persist a checkpoint, replacing any previous one for the same source.
    async fn save(&self, checkpoint: RotationCheckpoint) -> Result<(), CheckpointError>;

    /// Drop the checkpoint once its run has completed.
    async fn clear(&self, source: &MasterKeyReference) -> Result<(), CheckpointError>;
}

/// In-memory checkpoint store; checkpoints live for the process lifetime.
#[derive(Clone, Default)]
pub struct InMemoryCheckpointStore {
    inner: Arc<RwLock<HashMap<MasterKeyReference, RotationCheckpoint>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(
        &self,
        source: &MasterKeyReference,
    ) -> Result<Option<RotationCheckpoint>, CheckpointError> {
        Ok(self.inner.read().await.get(source).cloned())
    }

    async fn save(&self, checkpoint: RotationCheckpoint) -> Result<(), CheckpointError> {
        self.inner
            .write()
            .await
            .insert(checkpoint.source.clone(), checkpoint);
        Ok(())
    }

    async fn clear(&self, source: &MasterKeyReference) -> Result<(), CheckpointError> {
        self.inner.write().await.remove(source);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(alias: &str) -> MasterKeyReference {
        MasterKeyReference::new("main", alias).unwrap()
    }

    #[tokio::test]
    async fn save_load_clear_round_trip() {
        let store = InMemoryCheckpointStore::new();
        assert!(store.load(&key("a")).await.unwrap().is_none());

        let mut checkpoint = RotationCheckpoint::new(key("a"));
        checkpoint.cursor = Some("content-17".into());
        checkpoint.migrated = 17;
        store.save(checkpoint.clone()).await.unwrap();

        assert_eq!(store.load(&key("a")).await.unwrap(), Some(checkpoint));
        assert!(store.load(&key("b")).await.unwrap().is_none());

        store.clear(&key("a")).await.unwrap();
        assert!(store.load(&key("a")).await.unwrap().is_none());
    }

    #[test]
    fn checkpoint_serialises_for_durable_backends() {
        let mut checkpoint = RotationCheckpoint::new(key("a"));
        checkpoint.cursor = Some("content-3".into());
        let json = serde_json::to_string(&checkpoint).unwrap();
        assert!(json.contains("\"main:a\""));
        let decoded: RotationCheckpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, checkpoint);
    }
}
