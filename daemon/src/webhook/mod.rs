// SPDX-License-Identifier: MIT
//! Webhook ingress — the HTTP surface the forge calls.
//!
//! `POST /webhook` verifies the HMAC signature over the raw body, validates
//! the payload shape, and enqueues a [`ReviewJob`]. The request does no
//! other work; review latency lives in the worker. `GET /health` bypasses
//! signature checks.

use crate::queue::{ReviewJob, ReviewQueue};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Raw-body cap; anything larger is rejected by the extractor.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// PR actions that trigger a review.
const ALLOWED_ACTIONS: &[&str] = &["opened", "synchronize", "reopened", "ready_for_review"];

/// Shared state for the ingress routes.
pub struct IngressState {
    pub webhook_secret: String,
    pub queue: Arc<dyn ReviewQueue>,
    pub queue_backend: &'static str,
    pub started_at: Instant,
}

pub fn router(state: Arc<IngressState>) -> Router {
    Router::new()
        .route("/webhook", post(handle_webhook))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

async fn health(State(state): State<Arc<IngressState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "queue_backend": state.queue_backend,
    }))
}

async fn handle_webhook(
    State(state): State<Arc<IngressState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok());
    if !verify_signature(state.webhook_secret.as_bytes(), &body, signature) {
        warn!("webhook signature verification failed");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid signature"})),
        )
            .into_response();
    }

    // Invalid JSON becomes an empty object so the shape checks below reject
    // it with a clean 400 instead of a parse-specific path.
    let payload: Value = serde_json::from_slice(&body).unwrap_or_else(|_| json!({}));

    let event = headers
        .get("x-github-event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if event != "pull_request" {
        return ignored(format!("event {event:?} is not reviewed"));
    }

    let request_id = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match evaluate_payload(&payload, request_id) {
        Disposition::Accept(job) => {
            let job_id = job.id.clone();
            info!(
                job_id,
                owner = %job.owner,
                repo = %job.repo,
                pr = job.pr_number,
                action = %job.action,
                "webhook accepted — enqueueing review job"
            );
            // Fire-and-forget: the 202 is already decided; an enqueue
            // failure is an operator problem, not the sender's.
            if let Err(e) = state.queue.enqueue(*job).await {
                warn!(job_id, err = %e, "failed to enqueue review job");
            }
            (
                StatusCode::ACCEPTED,
                Json(json!({
                    "status": "queued",
                    "jobId": job_id,
                    "message": "review scheduled",
                })),
            )
                .into_response()
        }
        Disposition::Ignore(reason) => ignored(reason.to_string()),
        Disposition::Invalid(reason) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": reason})),
        )
            .into_response(),
    }
}

fn ignored(reason: String) -> Response {
    (
        StatusCode::OK,
        Json(json!({"status": "ignored", "reason": reason})),
    )
        .into_response()
}

/// Constant-time verification of `X-Hub-Signature-256: sha256=<hex>`.
/// Missing header, malformed hex, length mismatch, and wrong digest all
/// fail through the same `Mac::verify_slice` path.
pub fn verify_signature(secret: &[u8], body: &[u8], header: Option<&str>) -> bool {
    let Some(header) = header else { return false };
    let Some(hex_digest) = header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// What to do with a structurally verified `pull_request` payload.
#[derive(Debug)]
pub enum Disposition {
    Accept(Box<ReviewJob>),
    Ignore(&'static str),
    Invalid(&'static str),
}

/// Validate payload shape and review-worthiness, and build the job.
pub fn evaluate_payload(payload: &Value, request_id: Option<String>) -> Disposition {
    let Some(action) = payload.get("action").and_then(|v| v.as_str()) else {
        return Disposition::Invalid("missing action");
    };
    let Some(number) = payload.get("number").and_then(|v| v.as_u64()) else {
        return Disposition::Invalid("missing number");
    };
    let Some(pull_request) = payload.get("pull_request").filter(|v| v.is_object()) else {
        return Disposition::Invalid("missing pull_request");
    };
    let Some(repository) = payload.get("repository").filter(|v| v.is_object()) else {
        return Disposition::Invalid("missing repository");
    };

    if !ALLOWED_ACTIONS.contains(&action) {
        return Disposition::Ignore("action does not trigger review");
    }
    if pull_request
        .get("draft")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
    {
        return Disposition::Ignore("draft PR");
    }

    let Some(installation_id) = payload
        .get("installation")
        .and_then(|i| i.get("id"))
        .and_then(|v| v.as_u64())
    else {
        return Disposition::Invalid("missing installation id");
    };

    let owner = repository
        .get("owner")
        .and_then(|o| o.get("login"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let repo = repository
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    if owner.is_empty() || repo.is_empty() {
        return Disposition::Invalid("missing repository coordinates");
    }
    let sha = pull_request
        .get("head")
        .and_then(|h| h.get("sha"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let request_id = request_id.or_else(|| Some(uuid::Uuid::new_v4().to_string()));
    Disposition::Accept(Box::new(ReviewJob::new(
        owner,
        repo,
        number,
        sha,
        installation_id,
        action.to_string(),
        request_id,
    )))
}
