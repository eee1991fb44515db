// SPDX-License-Identifier: MIT
//! In-memory FIFO queue: single-process, at-most-once, no persistence.
//! The development backend.

use super::{JobHandler, ReviewJob, ReviewQueue, WORKER_CONCURRENCY};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, Semaphore};
use tracing::warn;

pub struct MemoryQueue {
    jobs: Mutex<VecDeque<ReviewJob>>,
    notify: Notify,
    closed: AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReviewQueue for MemoryQueue {
    async fn enqueue(&self, job: ReviewJob) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            anyhow::bail!("queue is closed");
        }
        self.jobs.lock().await.push_back(job);
        self.notify.notify_one();
        Ok(())
    }

    async fn process(&self, handler: JobHandler) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(WORKER_CONCURRENCY));
        loop {
            let job = self.jobs.lock().await.pop_front();
            match job {
                Some(job) => {
                    let permit = semaphore
                        .clone()
                        .acquire_owned()
                        .await
                        .expect("semaphore never closed");
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        let job_id = job.id.clone();
                        if let Err(e) = handler(job).await {
                            warn!(job_id, err = %e, "job handler failed");
                        }
                        drop(permit);
                    });
                }
                None => {
                    if self.closed.load(Ordering::Acquire) {
                        break;
                    }
                    // notify_one stores a permit, so an enqueue racing this
                    // wait is not lost.
                    self.notify.notified().await;
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
    use std::sync::Mutex as StdMutex;

    fn job(n: u64) -> ReviewJob {
        ReviewJob::new(
            "acme".to_string(),
            "webapp".to_string(),
            n,
            format!("sha{n}"),
            1,
            "opened".to_string(),
            None,
        )
    }

    #[tokio::test]
    async fn fifo_order_and_field_preservation() {
        let queue = Arc::new(MemoryQueue::new());
        let seen: Arc<StdMutex<Vec<ReviewJob>>> = Arc::new(StdMutex::new(Vec::new()));

        for n in 1..=3 {
            queue.enqueue(job(n)).await.expect("enqueue");
        }
        queue.close().await.expect("close");

        let seen2 = seen.clone();
        let handler: JobHandler = Arc::new(move |job| {
            let seen = seen2.clone();
            Box::pin(async move {
                seen.lock().unwrap().push(job);
                Ok(())
            })
        });
        queue.process(handler).await.expect("process");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        let numbers: Vec<u64> = seen.iter().map(|j| j.pr_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(seen[0].sha, "sha1");
        assert_eq!(seen[0].owner, "acme");
    }

    #[tokio::test]
    async fn enqueue_after_close_is_rejected() {
        let queue = MemoryQueue::new();
        queue.close().await.expect("close");
        assert!(queue.enqueue(job(1)).await.is_err());
    }

    #[tokio::test]
    async fn handler_errors_do_not_stop_the_loop() {
        let queue = Arc::new(MemoryQueue::new());
        queue.enqueue(job(1)).await.expect("enqueue");
        queue.enqueue(job(2)).await.expect("enqueue");
        queue.close().await.expect("close");

        let count = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let count2 = count.clone();
        let handler: JobHandler = Arc::new(move |job| {
            let count = count2.clone();
            Box::pin(async move {
                count.fetch_add(1, Ordering::Relaxed);
                if job.pr_number == 1 {
                    anyhow::bail!("boom");
                }
                Ok(())
            })
        });
        queue.process(handler).await.expect("process");
        assert_eq!(count.load(Ordering::Relaxed), 2, "at-most-once, no retry");
    }
}
