//! Axum middleware layers applied to the router.
//!
//! Includes request tracing, timeout enforcement, and response compression.

use std::time::Duration;

/// Default per-request timeout applied to all routes.
///
/// Long-running work (re-encryption) is dispatched to background tasks, so
/// every request is expected to complete well within this bound.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
