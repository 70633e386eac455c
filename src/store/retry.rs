//! Retry with a fixed wait between attempts.

use std::future::Future;
use tokio::time::sleep;

use crate::store::config::RetryConfig;

/// Retry policy implementation
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create new retry policy
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Execute with retry
    ///
    /// Any failure is retried up to the configured attempts with the fixed
    /// configured wait in between; the last error is surfaced unchanged.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    if attempt >= max_attempts {
                        tracing::error!("Store call failed after {} attempts: {}", attempt, err);
                        return Err(err);
                    }

                    tracing::warn!(
                        "Store call failed (attempt {}/{}), retrying after {:?}: {}",
                        attempt,
                        max_attempts,
                        self.config.wait_between,
                        err
                    );

                    sleep(self.config.wait_between).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts,
            wait_between: Duration::from_millis(1),
        })
    }

    #[tokio::test]
    async fn test_succeeds_first_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<i32, String> = fast_retry(3)
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<i32, String> = fast_retry(3)
            .execute(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err("transient".to_string())
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<i32, String> = fast_retry(3)
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("down".to_string())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
