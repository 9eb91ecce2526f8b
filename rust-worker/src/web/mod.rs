//! Web server module for the verification front door.
//!
//! This module provides a thin web server that:
//! - Enqueues verification requests onto the pending queue
//! - Verifies tokens from verification links
//! - Reports queue depths for operators
//!
//! All delivery happens in the background worker.

pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use handlers::{
    enqueue_verification, health, queue_depths, verify_email, AppState, EnqueueRequest,
    EnqueueResponse, HealthResponse, QueueDepths, VerifyQuery, VerifyResponse,
};

/// Build the router with every endpoint mounted.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/verification-requests", post(enqueue_verification))
        .route("/verify-email", get(verify_email))
        .route("/queues", get(queue_depths))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
