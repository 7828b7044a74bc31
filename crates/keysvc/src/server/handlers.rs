//! Axum request handlers for the admin command surface.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::protocol::{
    ErrorResponse, HealthResponse, KeyActionRequest, KeyActionResponse, KeyListMode,
    KeyListResponse, ReEncryptionAcceptedResponse, SymmetricKeyCountResponse,
    SymmetricKeyCountsResponse,
};
use common::{MasterKeyReference, ServiceError};
use serde::Deserialize;

use super::state::AppState;

fn error_response(err: &ServiceError) -> Response {
    let status = StatusCode::from_u16(err.http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorResponse::from(err))).into_response()
}

/// Query parameters for `GET /keys`.
#[derive(Debug, Deserialize)]
pub struct ListParams {
    /// `active` (default) or `inactive`.
    mode: Option<String>,
}

/// `GET /keys` — list master keys by lifecycle state.
pub async fn list_keys(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Response {
    let mode = match params.mode.as_deref().map(str::parse::<KeyListMode>) {
        None => KeyListMode::default(),
        Some(Ok(mode)) => mode,
        Some(Err(e)) => return error_response(&e),
    };

    let keys = match mode {
        KeyListMode::Active => state.registry.list_active(),
        KeyListMode::Inactive => state.registry.list_disabled(),
    };
    (StatusCode::OK, Json(KeyListResponse { keys })).into_response()
}

/// `POST /keys/enable` — (re-)allow a master key for new wraps.
pub async fn enable_key(
    State(state): State<AppState>,
    Json(req): Json<KeyActionRequest>,
) -> Response {
    let key: MasterKeyReference = match req.key.parse() {
        Ok(key) => key,
        Err(e) => return error_response(&e),
    };
    match state.registry.enable(&key).await {
        Ok(()) => (StatusCode::OK, Json(KeyActionResponse { key })).into_response(),
        Err(e) => error_response(&ServiceError::from(e)),
    }
}

/// `POST /keys/disable` — retire a master key from new wraps.
///
/// The key stays available for decryption; disabling the sole active key is
/// rejected with a conflict.
pub async fn disable_key(
    State(state): State<AppState>,
    Json(req): Json<KeyActionRequest>,
) -> Response {
    let key: MasterKeyReference = match req.key.parse() {
        Ok(key) => key,
        Err(e) => return error_response(&e),
    };
    match state.registry.disable(&key).await {
        Ok(()) => (StatusCode::OK, Json(KeyActionResponse { key })).into_response(),
        Err(e) => error_response(&ServiceError::from(e)),
    }
}

/// Query parameters for `GET /keys/counts`.
#[derive(Debug, Deserialize)]
pub struct CountParams {
    /// Restrict the count to one key identifier.
    key: Option<String>,
}

/// `GET /keys/counts` — symmetric key counts, per key or aggregate.
pub async fn count_keys(
    State(state): State<AppState>,
    Query(params): Query<CountParams>,
) -> Response {
    match params.key.as_deref() {
        Some(raw) => {
            let key: MasterKeyReference = match raw.parse() {
                Ok(key) => key,
                Err(e) => return error_response(&e),
            };
            match state.scanner.count_for(&key).await {
                Ok(count) => {
                    (StatusCode::OK, Json(SymmetricKeyCountResponse { key, count }))
                        .into_response()
                }
                Err(e) => error_response(&ServiceError::Internal(e.to_string())),
            }
        }
        None => {
            let total = match state.scanner.count_total().await {
                Ok(total) => total,
                Err(e) => return error_response(&ServiceError::Internal(e.to_string())),
            };
            match state.scanner.counts_by_key().await {
                Ok(counts) => (
                    StatusCode::OK,
                    Json(SymmetricKeyCountsResponse { total, counts }),
                )
                    .into_response(),
                Err(e) => error_response(&ServiceError::Internal(e.to_string())),
            }
        }
    }
}

/// `GET /keys/requiring-reencryption` — disabled keys still protecting content.
pub async fn keys_requiring_reencryption(State(state): State<AppState>) -> Response {
    match state.scanner.keys_requiring_reencryption().await {
        Ok(keys) => (StatusCode::OK, Json(KeyListResponse { keys })).into_response(),
        Err(e) => error_response(&ServiceError::Internal(e.to_string())),
    }
}

/// `POST /keys/reencrypt` — trigger a background re-encryption run.
///
/// Returns `202 Accepted`; completion is observed by polling the count for
/// the key toward zero.
pub async fn reencrypt(
    State(state): State<AppState>,
    Json(req): Json<KeyActionRequest>,
) -> Response {
    let key: MasterKeyReference = match req.key.parse() {
        Ok(key) => key,
        Err(e) => return error_response(&e),
    };
    // Identity errors are reported synchronously, before the run is spawned.
    if state.registry.snapshot().get(&key).is_none() {
        return error_response(&ServiceError::UnknownMasterKey(key));
    }
    match state.tracker.start(key.clone()).await {
        Ok(run_id) => (
            StatusCode::ACCEPTED,
            Json(ReEncryptionAcceptedResponse {
                key,
                run_id: run_id.to_string(),
            }),
        )
            .into_response(),
        Err(e) => error_response(&ServiceError::from(e)),
    }
}

/// `GET /health` — liveness check with registry and store gauges.
pub async fn health(State(state): State<AppState>) -> Response {
    let stored_envelopes = match state.scanner.count_total().await {
        Ok(total) => total,
        Err(e) => return error_response(&ServiceError::Internal(e.to_string())),
    };
    let snapshot = state.registry.snapshot();
    let body = HealthResponse {
        status: "ok".into(),
        active_keys: snapshot.active().len(),
        disabled_keys: snapshot.disabled().len(),
        stored_envelopes,
    };
    (StatusCode::OK, Json(body)).into_response()
}

/// Catch-all 404 handler.
pub async fn not_found() -> impl IntoResponse {
    let err = ErrorResponse::new("not_found", "the requested resource does not exist");
    (StatusCode::NOT_FOUND, Json(err))
}
