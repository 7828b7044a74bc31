//! Re-encryption Engine: migrates symmetric keys off a retired master key.
//!
//! # Run model
//!
//! A run walks all envelopes wrapped under a source key in bounded batches.
//! For each envelope it unwraps the symmetric key under the source key,
//! wraps it under the target key, and commits the new envelope with a
//! compare-and-swap on the envelope version read during the scan. The swap
//! is the sole unit of commitment: an interrupted run never leaves an
//! envelope half-migrated.
//!
//! The target is re-resolved from the registry at the start of every batch,
//! so administrators changing the active key mid-run redirect later batches
//! instead of feeding a stale target. A checkpoint is saved at each batch
//! boundary; cancellation, keystore outages and process restarts resume from
//! it. Runs are idempotent — migrated envelopes no longer match the source
//! key and are naturally excluded from any later run.

pub mod checkpoint;
pub mod tracker;

pub use checkpoint::{
    CheckpointError, CheckpointStore, InMemoryCheckpointStore, RotationCheckpoint,
};
pub use tracker::RotationTracker;

use std::sync::Arc;

use common::MasterKeyReference;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::envelope::store::{EnvelopeStore, StoreError};
use crate::envelope::{EnvelopeCodec, EnvelopeError, SymmetricKeyEnvelope, VersionedEnvelope};
use crate::keystore::KeystoreError;
use crate::registry::MasterKeyRegistry;

/// Errors that abort a re-encryption run.
///
/// All of them leave committed swaps intact; the run resumes from its last
/// checkpoint once the cause clears.
#[derive(Debug, Error)]
pub enum RotationError {
    /// The source key is not registered at all.
    #[error("unknown master key: {0}")]
    UnknownSourceKey(MasterKeyReference),

    /// The registry reported no active key to wrap under. Unreachable while
    /// the registry's last-active-key invariant holds.
    #[error("no active master key available as re-encryption target")]
    NoActiveTarget,

    /// The keystore no longer serves the key an envelope is wrapped under.
    #[error("master key not available in keystore: {0}")]
    SourceKeyUnavailable(MasterKeyReference),

    /// The keystore cannot currently be reached; transient.
    #[error("keystore unavailable, run suspended: {0}")]
    KeystoreUnavailable(String),

    /// The envelope store failed mid-run.
    #[error("envelope storage failed: {0}")]
    Store(#[from] StoreError),

    /// The checkpoint store failed mid-run.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// Outcome of one re-encryption run (complete or cancelled).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationReport {
    pub run_id: Uuid,
    pub source: MasterKeyReference,
    /// Batches processed in this run.
    pub batches: u64,
    /// Envelopes migrated onto the target key in this run.
    pub migrated: u64,
    /// Envelopes skipped because a concurrent write superseded them.
    pub skipped: u64,
    /// Envelopes excluded from processing: integrity violations and blobs
    /// that failed to unwrap.
    pub violations: u64,
    /// `true` when the scan was exhausted; `false` when cancelled.
    pub completed: bool,
}

/// Batch/rotation engine for symmetric key re-encryption.
#[derive(Clone)]
pub struct ReEncryptionEngine {
    registry: MasterKeyRegistry,
    codec: EnvelopeCodec,
    store: Arc<dyn EnvelopeStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    batch_size: usize,
    log_interval: u64,
}

impl ReEncryptionEngine {
    pub fn new(
        registry: MasterKeyRegistry,
        codec: EnvelopeCodec,
        store: Arc<dyn EnvelopeStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        batch_size: usize,
        log_interval: u64,
    ) -> Self {
        Self {
            registry,
            codec,
            store,
            checkpoints,
            batch_size: batch_size.max(1),
            log_interval,
        }
    }

    /// Migrate every envelope wrapped under `source` onto the currently
    /// active key.
    ///
    /// Rotating an Active key is permitted (defensive re-wrap) but the usual
    /// call targets a Disabled key. Completion is defined by the eligibility
    /// scanner reporting a zero count for `source`, not by this method
    /// returning — a cancelled run returns `Ok` with `completed == false`.
    ///
    /// # Errors
    ///
    /// [`RotationError::UnknownSourceKey`] when `source` is not registered;
    /// otherwise the run aborts at its checkpoint with the keystore or
    /// storage error that stopped it.
    pub async fn re_encrypt(
        &self,
        run_id: Uuid,
        source: &MasterKeyReference,
        cancel: &CancellationToken,
    ) -> Result<RotationReport, RotationError> {
        if self.registry.snapshot().get(source).is_none() {
            return Err(RotationError::UnknownSourceKey(source.clone()));
        }

        let mut checkpoint = match self.checkpoints.load(source).await? {
            Some(existing) => {
                info!(
                    run_id = %run_id,
                    key = %source,
                    cursor = ?existing.cursor,
                    "resuming re-encryption from checkpoint"
                );
                existing
            }
            None => RotationCheckpoint::new(source.clone()),
        };

        let mut report = RotationReport {
            run_id,
            source: source.clone(),
            batches: 0,
            migrated: 0,
            skipped: 0,
            violations: 0,
            completed: false,
        };

        info!(run_id = %run_id, key = %source, "re-encryption run starting");

        'batches: loop {
            // Cancellation is cooperative and only honoured here, so an
            // envelope is never left between unwrap and swap.
            if cancel.is_cancelled() {
                self.checkpoints.save(checkpoint).await?;
                info!(run_id = %run_id, key = %source, "re-encryption cancelled at batch boundary");
                return Ok(report);
            }

            // The target is re-resolved every batch: a key enabled or
            // disabled mid-run redirects the remaining batches.
            let target = self
                .registry
                .snapshot()
                .current_wrap_target()
                .ok_or(RotationError::NoActiveTarget)?;

            let batch = self
                .store
                .scan_wrapped_by(source, checkpoint.cursor.as_deref(), self.batch_size)
                .await?;
            if batch.is_empty() {
                break;
            }
            report.batches += 1;

            for item in &batch {
                match self.rewrap_item(item, &target).await {
                    Ok(rewrapped) => {
                        let swapped = match self
                            .store
                            .compare_and_swap(item.version, rewrapped)
                            .await
                        {
                            Ok(swapped) => swapped,
                            Err(e) => {
                                self.checkpoints.save(checkpoint).await?;
                                return Err(RotationError::Store(e));
                            }
                        };
                        if swapped {
                            report.migrated += 1;
                            checkpoint.migrated += 1;
                        } else {
                            report.skipped += 1;
                            checkpoint.skipped += 1;
                            info!(
                                run_id = %run_id,
                                content_id = %item.envelope.content_id,
                                "envelope superseded by concurrent write; skipped"
                            );
                        }
                    }
                    Err(EnvelopeError::IntegrityViolation { .. }) => {
                        report.violations += 1;
                        checkpoint.violations += 1;
                        error!(
                            run_id = %run_id,
                            content_id = %item.envelope.content_id,
                            key = %item.envelope.master_key,
                            "integrity violation; envelope excluded from re-encryption"
                        );
                    }
                    Err(EnvelopeError::Keystore(KeystoreError::CryptoFailure(msg))) => {
                        report.violations += 1;
                        checkpoint.violations += 1;
                        error!(
                            run_id = %run_id,
                            content_id = %item.envelope.content_id,
                            error = %msg,
                            "envelope failed to unwrap; excluded from re-encryption"
                        );
                    }
                    Err(EnvelopeError::UnknownMasterKey(stale)) => {
                        // The target lost its active status between batch
                        // start and this wrap. Leave the cursor on the
                        // previous item and re-resolve.
                        warn!(
                            run_id = %run_id,
                            target = %stale,
                            "re-encryption target no longer active; re-resolving"
                        );
                        self.checkpoints.save(checkpoint.clone()).await?;
                        continue 'batches;
                    }
                    Err(EnvelopeError::Keystore(KeystoreError::UnknownKey(missing))) => {
                        self.checkpoints.save(checkpoint).await?;
                        return Err(RotationError::SourceKeyUnavailable(missing));
                    }
                    Err(EnvelopeError::Keystore(KeystoreError::Unavailable(msg))) => {
                        self.checkpoints.save(checkpoint).await?;
                        warn!(
                            run_id = %run_id,
                            key = %source,
                            "keystore unavailable; re-encryption suspended at checkpoint"
                        );
                        return Err(RotationError::KeystoreUnavailable(msg));
                    }
                }

                checkpoint.cursor = Some(item.envelope.content_id.clone());

                let processed = report.migrated + report.skipped + report.violations;
                if self.log_interval > 0 && processed > 0 && processed % self.log_interval == 0 {
                    info!(run_id = %run_id, processed, "re-encryption progress");
                }
            }

            self.checkpoints.save(checkpoint.clone()).await?;
        }

        report.completed = true;
        self.checkpoints.clear(source).await?;
        info!(
            run_id = %run_id,
            key = %source,
            batches = report.batches,
            migrated = report.migrated,
            skipped = report.skipped,
            violations = report.violations,
            "re-encryption run complete"
        );
        Ok(report)
    }

    /// Unwrap under the envelope's recorded key and wrap under `target`.
    /// No locks are held across these keystore calls.
    async fn rewrap_item(
        &self,
        item: &VersionedEnvelope,
        target: &MasterKeyReference,
    ) -> Result<SymmetricKeyEnvelope, EnvelopeError> {
        let symmetric = self.codec.unwrap(&item.envelope).await?;
        self.codec
            .wrap(&item.envelope.content_id, &symmetric, target)
            .await
    }
}
