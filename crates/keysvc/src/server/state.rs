//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use crate::registry::MasterKeyRegistry;
use crate::rotation::RotationTracker;
use crate::scanner::EligibilityScanner;

/// Application state shared across all request handlers.
///
/// All fields are cheaply cloneable (`Arc`-backed) so that Axum can clone the
/// state for each request without copying expensive data.
#[derive(Clone)]
pub struct AppState {
    /// Authoritative master key records and lifecycle state.
    pub registry: MasterKeyRegistry,
    /// Count and eligibility queries over the envelope store.
    pub scanner: EligibilityScanner,
    /// Background re-encryption runs.
    pub tracker: Arc<RotationTracker>,
}

impl AppState {
    /// Create a new [`AppState`] from the assembled components.
    pub fn new(
        registry: MasterKeyRegistry,
        scanner: EligibilityScanner,
        tracker: Arc<RotationTracker>,
    ) -> Self {
        Self {
            registry,
            scanner,
            tracker,
        }
    }
}
