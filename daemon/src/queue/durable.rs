// SPDX-License-Identifier: MIT
//! Durable queue backend on SQLite.
//!
//! At-least-once delivery: a job is claimed by flipping its row to
//! `running`, and a failed handler re-queues it with exponential backoff
//! (1 s, 2 s, 4 s) until [`MAX_ATTEMPTS`] is reached, after which the row
//! is parked as `failed`. Completed rows are pruned beyond the last 100,
//! failed rows beyond the last 1000.

use super::{JobHandler, ReviewJob, ReviewQueue, MAX_ATTEMPTS, WORKER_CONCURRENCY};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::{sqlite::SqliteConnectOptions, Executor, Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, warn};

/// Completed rows kept for inspection.
const KEEP_DONE: i64 = 100;
/// Failed rows kept for inspection.
const KEEP_FAILED: i64 = 1000;
/// Idle poll interval while waiting for ready jobs.
const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(500);

pub struct DurableQueue {
    pool: SqlitePool,
    notify: Notify,
    closed: AtomicBool,
}

impl DurableQueue {
    pub async fn new(db_path: &Path) -> Result<Self> {
        let opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .create_if_missing(true);
        let pool = SqlitePool::connect_with(opts)
            .await
            .context("opening queue database")?;
        // Raw execute: the migration holds more than one statement.
        pool.execute(include_str!("migrations/001_jobs.sql"))
            .await
            .context("migrating queue schema")?;
        Ok(Self {
            pool,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Claim the oldest ready job, flipping it to `running`. Returns the
    /// job and its attempt count so far.
    pub async fn claim_one(&self) -> Result<Option<(ReviewJob, i64)>> {
        let now = Utc::now().to_rfc3339();
        let row = sqlx::query(
            "UPDATE review_jobs SET status = 'running', updated_at = ?1
             WHERE id = (
                 SELECT id FROM review_jobs
                 WHERE status = 'queued' AND not_before <= ?1
                 ORDER BY created_at LIMIT 1
             )
             RETURNING payload, attempts",
        )
        .bind(&now)
        .fetch_optional(&self.pool)
        .await
        .context("claiming job")?;

        let Some(row) = row else { return Ok(None) };
        let payload: String = row.get("payload");
        let attempts: i64 = row.get("attempts");
        let job: ReviewJob = serde_json::from_str(&payload).context("decoding job payload")?;
        Ok(Some((job, attempts)))
    }

    /// Mark a job done and prune old completed rows.
    pub async fn complete(&self, job_id: &str) -> Result<()> {
        complete_in(&self.pool, job_id).await
    }

    /// Record a failed attempt: requeue with backoff, or park as `failed`
    /// once the attempt budget is spent.
    pub async fn fail(&self, job_id: &str, prior_attempts: i64, error: &str) -> Result<()> {
        fail_in(&self.pool, job_id, prior_attempts, error).await
    }

    pub async fn status_of(&self, job_id: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT status FROM review_jobs WHERE id = ?1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("status")))
    }
}

async fn complete_in(pool: &SqlitePool, job_id: &str) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    sqlx::query("UPDATE review_jobs SET status = 'done', updated_at = ?2 WHERE id = ?1")
        .bind(job_id)
        .bind(&now)
        .execute(pool)
        .await?;
    prune_in(pool, "done", KEEP_DONE).await
}

async fn fail_in(pool: &SqlitePool, job_id: &str, prior_attempts: i64, error: &str) -> Result<()> {
    let attempts = prior_attempts + 1;
    let now = Utc::now();
    if attempts >= MAX_ATTEMPTS {
        sqlx::query(
            "UPDATE review_jobs
             SET status = 'failed', attempts = ?2, last_error = ?3, updated_at = ?4
             WHERE id = ?1",
        )
        .bind(job_id)
        .bind(attempts)
        .bind(error)
        .bind(now.to_rfc3339())
        .execute(pool)
        .await?;
        warn!(job_id, attempts, "job parked as failed");
        return prune_in(pool, "failed", KEEP_FAILED).await;
    }

    // Exponential backoff starting at 1 s.
    let delay = ChronoDuration::seconds(1i64 << (attempts - 1));
    sqlx::query(
        "UPDATE review_jobs
         SET status = 'queued', attempts = ?2, last_error = ?3,
             not_before = ?4, updated_at = ?5
         WHERE id = ?1",
    )
    .bind(job_id)
    .bind(attempts)
    .bind(error)
    .bind((now + delay).to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(pool)
    .await?;
    debug!(job_id, attempts, delay_secs = delay.num_seconds(), "job requeued");
    Ok(())
}

async fn prune_in(pool: &SqlitePool, status: &str, keep: i64) -> Result<()> {
    sqlx::query(
        "DELETE FROM review_jobs
         WHERE status = ?1 AND id NOT IN (
             SELECT id FROM review_jobs WHERE status = ?1
             ORDER BY updated_at DESC LIMIT ?2
         )",
    )
    .bind(status)
    .bind(keep)
    .execute(pool)
    .await?;
    Ok(())
}

#[async_trait]
impl ReviewQueue for DurableQueue {
    async fn enqueue(&self, job: ReviewJob) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            anyhow::bail!("queue is closed");
        }
        let payload = serde_json::to_string(&job)?;
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO review_jobs (id, payload, status, attempts, not_before, created_at, updated_at)
             VALUES (?1, ?2, 'queued', 0, ?3, ?3, ?3)",
        )
        .bind(&job.id)
        .bind(&payload)
        .bind(&now)
        .execute(&self.pool)
        .await
        .context("enqueueing job")?;
        self.notify.notify_one();
        Ok(())
    }

    async fn process(&self, handler: JobHandler) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(WORKER_CONCURRENCY));
        loop {
            match self.claim_one().await {
                Ok(Some((job, attempts))) => {
                    let permit = semaphore
                        .clone()
                        .acquire_owned()
                        .await
                        .expect("semaphore never closed");
                    let handler = handler.clone();
                    let pool = self.pool.clone();
                    tokio::spawn(async move {
                        let job_id = job.id.clone();
                        match handler(job).await {
                            Ok(()) => {
                                if let Err(e) = complete_in(&pool, &job_id).await {
                                    warn!(job_id, err = %e, "failed to mark job done");
                                }
                            }
                            Err(e) => {
                                if let Err(e2) =
                                    fail_in(&pool, &job_id, attempts, &e.to_string()).await
                                {
                                    warn!(job_id, err = %e2, "failed to record job failure");
                                }
                            }
                        }
                        drop(permit);
                    });
                }
                Ok(None) => {
                    if self.closed.load(Ordering::Acquire) {
                        break;
                    }
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep(POLL_INTERVAL) => {}
                    }
                }
                Err(e) => {
                    warn!(err = %e, "claim query failed");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }

        // Drain in-flight jobs before returning.
        let _all = semaphore
            .acquire_many(WORKER_CONCURRENCY as u32)
            .await
            .expect("semaphore never closed");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(n: u64) -> ReviewJob {
        ReviewJob::new(
            "acme".to_string(),
            "webapp".to_string(),
            n,
            format!("sha{n}"),
            1,
            "synchronize".to_string(),
            Some("req".to_string()),
        )
    }

    async fn queue() -> (tempfile::TempDir, DurableQueue) {
        let dir = tempfile::tempdir().expect("tempdir");
        let q = DurableQueue::new(&dir.path().join("queue.db"))
            .await
            .expect("queue");
        (dir, q)
    }

    #[tokio::test]
    async fn enqueue_claim_round_trip() {
        let (_dir, q) = queue().await;
        let original = job(42);
        q.enqueue(original.clone()).await.expect("enqueue");

        let (claimed, attempts) = q.claim_one().await.expect("claim").expect("a job");
        assert_eq!(claimed, original, "every field survives the queue");
        assert_eq!(attempts, 0);

        // Claimed jobs are invisible to other claims.
        assert!(q.claim_one().await.expect("claim").is_none());

        q.complete(&claimed.id).await.expect("complete");
        assert_eq!(q.status_of(&claimed.id).await.unwrap().as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn failure_requeues_with_backoff_then_parks() {
        let (_dir, q) = queue().await;
        let j = job(1);
        q.enqueue(j.clone()).await.expect("enqueue");

        // First failure: requeued with not_before in the future.
        let (_, attempts) = q.claim_one().await.unwrap().expect("claim 1");
        q.fail(&j.id, attempts, "transient").await.expect("fail 1");
        assert_eq!(q.status_of(&j.id).await.unwrap().as_deref(), Some("queued"));
        assert!(
            q.claim_one().await.unwrap().is_none(),
            "backoff keeps the job invisible until not_before"
        );

        // Force readiness and burn the remaining attempts.
        sqlx::query("UPDATE review_jobs SET not_before = ?1")
            .bind((Utc::now() - ChronoDuration::seconds(1)).to_rfc3339())
            .execute(&q.pool)
            .await
            .expect("reset");
        let (_, attempts) = q.claim_one().await.unwrap().expect("claim 2");
        assert_eq!(attempts, 1);
        q.fail(&j.id, attempts, "transient").await.expect("fail 2");

        sqlx::query("UPDATE review_jobs SET not_before = ?1")
            .bind((Utc::now() - ChronoDuration::seconds(1)).to_rfc3339())
            .execute(&q.pool)
            .await
            .expect("reset");
        let (_, attempts) = q.claim_one().await.unwrap().expect("claim 3");
        assert_eq!(attempts, 2);
        q.fail(&j.id, attempts, "permanent").await.expect("fail 3");

        assert_eq!(q.status_of(&j.id).await.unwrap().as_deref(), Some("failed"));
        assert!(q.claim_one().await.unwrap().is_none(), "failed jobs stay parked");
    }

    #[tokio::test]
    async fn worker_loop_processes_and_drains() {
        let (_dir, q) = queue().await;
        q.enqueue(job(1)).await.expect("enqueue");
        q.enqueue(job(2)).await.expect("enqueue");
        q.close().await.expect("close");

        let count = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let count2 = count.clone();
        let handler: JobHandler = Arc::new(move |_job| {
            let count = count2.clone();
            Box::pin(async move {
                count.fetch_add(1, Ordering::Relaxed);
                Ok(())
            })
        });
        q.process(handler).await.expect("process");
        assert_eq!(count.load(Ordering::Relaxed), 2);
    }
}
