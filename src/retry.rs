use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::SchedulerConfig;
use crate::error::SourceError;
use crate::ratelimit::TokenBucket;

/// Fixed-delay retry for adapter calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    pub fn from_config(scheduler: &SchedulerConfig) -> Self {
        Self::new(scheduler.retry_attempts, scheduler.retry_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    /// Each attempt takes a token from `limiter` first. A pause between
    /// attempts ends early when `cancel` turns true, and the last error is
    /// returned. Returns the final result and the number of attempts made.
    pub async fn call<T, F, Fut>(
        &self,
        source: &str,
        limiter: &TokenBucket,
        cancel: &watch::Receiver<bool>,
        mut op: F,
    ) -> (Result<T, SourceError>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let mut cancel = cancel.clone();
        let mut attempt = 0;
        loop {
            attempt += 1;
            limiter.acquire().await;
            match op().await {
                Ok(value) => return (Ok(value), attempt),
                Err(err) if err.is_retryable() && attempt < self.attempts => {
                    let pause = match &err {
                        SourceError::RateLimited {
                            retry_after: Some(hint),
                        } => *hint,
                        _ => self.delay,
                    };
                    debug!(
                        source,
                        attempt,
                        pause_secs = pause.as_secs(),
                        error = %err,
                        "retrying source call"
                    );
                    let cancelled = tokio::select! {
                        _ = tokio::time::sleep(pause) => false,
                        Ok(_) = cancel.wait_for(|stop| *stop) => true,
                    };
                    if cancelled {
                        debug!(source, attempt, "retry abandoned, run cancelled");
                        return (Err(err), attempt);
                    }
                }
                Err(err) => {
                    if err.is_retryable() {
                        warn!(source, attempts = attempt, error = %err, "retries exhausted");
                    }
                    return (Err(err), attempt);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn limiter() -> TokenBucket {
        TokenBucket::per_minute("test", 10_000)
    }

    fn running() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_retried_with_fixed_delay() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1800));
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let (result, attempts) = policy
            .call("slack", &limiter(), &running(), || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(SourceError::Transient("503".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(2));
        assert_eq!(attempts, 3);
        let elapsed = start.elapsed();
        // two fixed pauses, no growth
        assert!(elapsed >= Duration::from_secs(3600));
        assert!(elapsed < Duration::from_secs(3700));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_attempts_return_last_error() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let calls = AtomicU32::new(0);
        let (result, attempts): (Result<(), _>, _) = policy
            .call("github", &limiter(), &running(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SourceError::Transient("timeout".into())) }
            })
            .await;
        assert!(matches!(result, Err(SourceError::Transient(_))));
        assert_eq!(attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_errors_not_retried() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1));
        for err in [
            SourceError::AuthInvalid,
            SourceError::NotFound("T-1".into()),
            SourceError::Malformed("bad".into()),
        ] {
            let calls = AtomicU32::new(0);
            let (result, attempts): (Result<(), _>, _) = policy
                .call("jira", &limiter(), &running(), || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let err = err.clone();
                    async move { Err(err) }
                })
                .await;
            assert_eq!(result, Err(err));
            assert_eq!(attempts, 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_hint_honoured() {
        let policy = RetryPolicy::new(2, Duration::from_secs(1800));
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let (result, _) = policy
            .call("slack", &limiter(), &running(), || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(SourceError::RateLimited {
                            retry_after: Some(Duration::from_secs(5)),
                        })
                    } else {
                        Ok(())
                    }
                }
            })
            .await;
        assert!(result.is_ok());
        assert!(start.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cuts_retry_pause_short() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1800));
        let (stop, cancel) = watch::channel(false);
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            stop.send_replace(true);
        });
        let (result, attempts): (Result<(), _>, _) = policy
            .call("slack", &limiter(), &cancel, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SourceError::Transient("503".into())) }
            })
            .await;
        assert!(matches!(result, Err(SourceError::Transient(_))));
        assert_eq!(attempts, 1);
        assert!(start.elapsed() < Duration::from_secs(120));
    }
}
