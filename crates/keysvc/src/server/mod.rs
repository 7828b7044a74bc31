//! Axum HTTP server, routing, and middleware for the admin command surface.
//!
//! # Responsibilities
//! - Define the Axum router with all admin routes and shared middleware.
//! - Inject shared application state (`AppState`) into handlers.
//! - Translate domain errors into the `{code, message}` error body with the
//!   status mapping defined by [`common::ServiceError`].

pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;
