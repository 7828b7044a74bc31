//! Axum router construction.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer, trace::TraceLayer};

use super::{handlers, middleware, state::AppState};

/// Build the application [`Router`] with all routes and middleware attached.
pub fn build(state: AppState) -> Router {
    Router::new()
        .route("/keys", get(handlers::list_keys))
        .route("/keys/enable", post(handlers::enable_key))
        .route("/keys/disable", post(handlers::disable_key))
        .route("/keys/counts", get(handlers::count_keys))
        .route(
            "/keys/requiring-reencryption",
            get(handlers::keys_requiring_reencryption),
        )
        .route("/keys/reencrypt", post(handlers::reencrypt))
        .route("/health", get(handlers::health))
        .fallback(handlers::not_found)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(middleware::REQUEST_TIMEOUT))
        .layer(CompressionLayer::new())
        .with_state(state)
}
