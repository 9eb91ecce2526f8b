//! HTTP endpoint handlers.
//!
//! Enqueueing only pushes the address onto the pending queue and returns;
//! the worker picks it up on its next drain.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::QueueNames;
use crate::delivery::VerificationSigner;
use crate::queue::{Job, QueueStore};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn QueueStore>,
    pub queues: Arc<QueueNames>,
    pub signer: VerificationSigner,
}

impl AppState {
    pub fn new(store: Arc<dyn QueueStore>, queues: QueueNames, signer: VerificationSigner) -> Self {
        Self {
            store,
            queues: Arc::new(queues),
            signer,
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Enqueue
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub email: String,
}

#[derive(Serialize)]
pub struct EnqueueResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Queue a verification email for dispatch.
pub async fn enqueue_verification(
    State(state): State<AppState>,
    Json(request): Json<EnqueueRequest>,
) -> impl IntoResponse {
    let email = request.email.trim().to_string();

    if email.parse::<lettre::Address>().is_err() {
        warn!(email_length = email.len(), "enqueue_invalid_email");
        return (
            StatusCode::BAD_REQUEST,
            Json(EnqueueResponse {
                status: "invalid_email",
                email: None,
            }),
        );
    }

    let job = Job::new(email.clone());
    if let Err(e) = state.store.push(&state.queues.pending, &job).await {
        error!(error = %e, "enqueue_failed");
        let status = if e.is_unavailable() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        return (
            status,
            Json(EnqueueResponse {
                status: "error",
                email: None,
            }),
        );
    }

    info!(email = %email, queue = %state.queues.pending, "verification_enqueued");

    (
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            status: "enqueued",
            email: Some(email),
        }),
    )
}

// =============================================================================
// Verify
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    pub token: Option<String>,
}

#[derive(Serialize)]
pub struct VerifyResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
}

/// Check a token from a verification link.
pub async fn verify_email(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> impl IntoResponse {
    let Some(token) = query.token.filter(|t| !t.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(VerifyResponse {
                email: None,
                error: Some("Missing token"),
            }),
        );
    };

    match state.signer.verify(&token) {
        Some(email) => {
            info!(email = %email, "email_verified");
            (
                StatusCode::OK,
                Json(VerifyResponse {
                    email: Some(email),
                    error: None,
                }),
            )
        }
        None => (
            StatusCode::BAD_REQUEST,
            Json(VerifyResponse {
                email: None,
                error: Some("Invalid token"),
            }),
        ),
    }
}

// =============================================================================
// Queue depths
// =============================================================================

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueDepths {
    pub pending: usize,
    pub in_flight: usize,
    pub dead_letter: usize,
}

/// Current length of the pending, in-flight and dead-letter queues.
pub async fn queue_depths(State(state): State<AppState>) -> impl IntoResponse {
    let queues = &state.queues;
    let depths = async {
        Ok::<_, crate::error::QueueError>(QueueDepths {
            pending: state.store.len(&queues.pending).await?,
            in_flight: state.store.len(&queues.in_flight).await?,
            dead_letter: state.store.len(&queues.dead_letter).await?,
        })
    };

    match depths.await {
        Ok(depths) => (StatusCode::OK, Json(depths)).into_response(),
        Err(e) => {
            error!(error = %e, "queue_depths_failed");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}
