//! `cas-keysvc` — binary entry point.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise the telemetry pipeline (tracing + optional OTLP).
//! 3. Construct the configured keystore backend.
//! 4. Verify every configured master key against the keystore and seed the
//!    [`registry::MasterKeyRegistry`].
//! 5. Assemble envelope store, codec, scanner, re-encryption engine and
//!    rotation tracker.
//! 6. Build the Axum router and start the admin HTTP server.

mod config;
mod envelope;
mod keystore;
mod registry;
mod rotation;
mod scanner;
mod server;
mod telemetry;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use config::Config;
use envelope::store::InMemoryEnvelopeStore;
use envelope::EnvelopeCodec;
use keystore::{Keystore, KmsKeystore, LocalKeystore};
use registry::MasterKeyRegistry;
use rotation::{InMemoryCheckpointStore, ReEncryptionEngine, RotationTracker};
use scanner::EligibilityScanner;
use server::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init_telemetry(cfg.otel_exporter_otlp_endpoint.as_deref(), &cfg.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        http_port = cfg.http_port,
        "cas-keysvc starting"
    );

    // -----------------------------------------------------------------------
    // 3. Keystore backend
    // -----------------------------------------------------------------------
    let key_refs = cfg.master_key_refs()?;
    let keystore: Arc<dyn Keystore> = match cfg.keystore_backend.as_str() {
        "kms" => Arc::new(KmsKeystore::init(cfg.kms_endpoint.as_deref()).await),
        _ => {
            warn!("local keystore generates ephemeral key material; for development only");
            Arc::new(LocalKeystore::generate(key_refs.clone()))
        }
    };

    // -----------------------------------------------------------------------
    // 4. Master key verification + registry seed
    // -----------------------------------------------------------------------
    for reference in &key_refs {
        let digest = keystore
            .key_digest(reference)
            .await
            .with_context(|| format!("master key {reference} is not available in the keystore"))?;
        info!(key = %reference, digest = %digest, "master key verified");
    }
    let registry = MasterKeyRegistry::seed(key_refs, &cfg.disabled_key_refs()?)
        .context("failed to seed master key registry")?;

    // -----------------------------------------------------------------------
    // 5. Envelope store, codec, scanner, engine, tracker
    // -----------------------------------------------------------------------
    let store = Arc::new(InMemoryEnvelopeStore::new());
    let codec = EnvelopeCodec::new(registry.clone(), keystore);
    let scanner = EligibilityScanner::new(registry.clone(), store.clone());
    let engine = ReEncryptionEngine::new(
        registry.clone(),
        codec,
        store,
        Arc::new(InMemoryCheckpointStore::new()),
        cfg.reencryption_batch_size,
        cfg.reencryption_log_interval,
    );
    let tracker = Arc::new(RotationTracker::new(engine));

    // -----------------------------------------------------------------------
    // 6. HTTP server
    // -----------------------------------------------------------------------
    let state = AppState::new(registry, scanner, tracker.clone());
    let router = server::router::build(state);

    let addr: std::net::SocketAddr = ([0, 0, 0, 0], cfg.http_port).into();
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(tracker))
        .await?;

    Ok(())
}

/// Resolves on SIGINT; cancels in-flight re-encryption runs so they stop at
/// a batch boundary with their checkpoints saved.
async fn shutdown_signal(tracker: Arc<RotationTracker>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    info!("shutdown signal received; cancelling re-encryption runs");
    tracker.shutdown().await;
}
