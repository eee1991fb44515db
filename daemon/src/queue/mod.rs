// SPDX-License-Identifier: MIT
//! Job queue — decouples webhook ingestion from review work.
//!
//! Two backends behind one capability: [`memory::MemoryQueue`] (FIFO,
//! at-most-once, development) and [`durable::DurableQueue`] (SQLite-backed,
//! at-least-once with bounded retries). Redelivery is possible on the
//! durable backend, so handlers must be idempotent.

pub mod durable;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Jobs a worker runs concurrently.
pub const WORKER_CONCURRENCY: usize = 3;

/// Delivery attempts before a job is parked as failed (durable backend).
pub const MAX_ATTEMPTS: i64 = 3;

/// One review request, created by the webhook ingress and consumed by a
/// worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewJob {
    pub id: String,
    pub owner: String,
    pub repo: String,
    pub pr_number: u64,
    pub sha: String,
    pub installation_id: u64,
    pub action: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ReviewJob {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        owner: String,
        repo: String,
        pr_number: u64,
        sha: String,
        installation_id: u64,
        action: String,
        request_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner,
            repo,
            pr_number,
            sha,
            installation_id,
            action,
            created_at: Utc::now(),
            request_id,
        }
    }
}

/// Worker callback. Cloned per job; must be idempotent on the durable
/// backend because redelivery is at-least-once.
pub type JobHandler = Arc<dyn Fn(ReviewJob) -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[async_trait]
pub trait ReviewQueue: Send + Sync {
    async fn enqueue(&self, job: ReviewJob) -> Result<()>;

    /// Run the worker loop: dequeue jobs and invoke `handler` with up to
    /// [`WORKER_CONCURRENCY`] jobs in flight. Returns once the queue is
    /// closed and in-flight jobs have drained.
    async fn process(&self, handler: JobHandler) -> Result<()>;

    /// Stop accepting jobs and wake the worker loop for shutdown.
    async fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_serde_round_trip() {
        let job = ReviewJob::new(
            "acme".to_string(),
            "webapp".to_string(),
            42,
            "deadbeef".to_string(),
            7001,
            "opened".to_string(),
            Some("req-1".to_string()),
        );
        let json = serde_json::to_string(&job).expect("serialize");
        let back: ReviewJob = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, job);
    }
}
