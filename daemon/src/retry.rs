// SPDX-License-Identifier: MIT
//! Exponential-backoff retry for upstream calls (forge REST, LLM APIs).

use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, the first try included.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled after each failure.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Millisecond-scale delays for unit tests.
    pub fn instant() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    fn delay_for(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Run `op` until it succeeds or `config.max_attempts` is exhausted,
/// sleeping an exponentially growing delay between failures. Returns the
/// last error when every attempt fails.
pub async fn retry<F, Fut, T, E>(config: &RetryConfig, what: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = config.max_attempts.max(1);
    let mut failures = 0u32;

    loop {
        match op().await {
            Ok(value) => {
                if failures > 0 {
                    debug!(what, failures, "retry succeeded");
                }
                return Ok(value);
            }
            Err(e) => {
                failures += 1;
                if failures >= attempts {
                    warn!(what, attempts, err = %e, "all retry attempts exhausted");
                    return Err(e);
                }
                let delay = config.delay_for(failures);
                warn!(
                    what,
                    attempt = failures,
                    delay_ms = delay.as_millis() as u64,
                    err = %e,
                    "attempt failed — retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn first_success_returns_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry(&RetryConfig::instant(), "op", || {
            calls.fetch_add(1, Ordering::Relaxed);
            async { Ok(7) }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry(&RetryConfig::instant(), "op", || {
            let n = calls.fetch_add(1, Ordering::Relaxed) + 1;
            async move {
                if n < 3 {
                    Err(format!("transient {n}"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = retry(&RetryConfig::instant(), "op", || {
            calls.fetch_add(1, Ordering::Relaxed);
            async { Err("permanent".to_string()) }
        })
        .await;
        assert_eq!(result.unwrap_err(), "permanent");
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn delays_grow_and_cap() {
        let config = RetryConfig {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(config.delay_for(1), Duration::from_millis(100));
        assert_eq!(config.delay_for(2), Duration::from_millis(200));
        assert_eq!(config.delay_for(3), Duration::from_millis(350));
        assert_eq!(config.delay_for(8), Duration::from_millis(350));
    }
}
