use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// Token bucket with continuous refill.
///
/// Capacity equals the per-minute rate, so a quiet source can burst one
/// minute's worth of calls and then settles to the steady rate. Waiters are
/// served in arrival order because the lock is held while sleeping.
pub struct TokenBucket {
    name: String,
    capacity: f64,
    per_second: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn per_minute(name: &str, rate: u32) -> Self {
        let capacity = rate.max(1) as f64;
        Self {
            name: name.to_string(),
            capacity,
            per_second: capacity / 60.0,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Wait until a token is available, then take it.
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;
        loop {
            let now = Instant::now();
            let elapsed = now.duration_since(state.last_refill).as_secs_f64();
            state.tokens = (state.tokens + elapsed * self.per_second).min(self.capacity);
            state.last_refill = now;

            if state.tokens >= 1.0 {
                state.tokens -= 1.0;
                return;
            }

            let wait = Duration::from_secs_f64((1.0 - state.tokens) / self.per_second);
            trace!(source = %self.name, wait_ms = wait.as_millis() as u64, "rate limited");
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_block() {
        let bucket = TokenBucket::per_minute("slack", 2);
        let start = Instant::now();
        bucket.acquire().await;
        bucket.acquire().await;
        assert!(start.elapsed() < Duration::from_secs(1));

        bucket.acquire().await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(29), "waited {:?}", waited);
        assert!(waited <= Duration::from_secs(31), "waited {:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_caps_at_capacity() {
        let bucket = TokenBucket::per_minute("github", 3);
        bucket.acquire().await;
        tokio::time::sleep(Duration::from_secs(600)).await;

        let start = Instant::now();
        for _ in 0..3 {
            bucket.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_secs(1));
        bucket.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(19), "waited {:?}", start.elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_bucket_across_tasks() {
        let bucket = std::sync::Arc::new(TokenBucket::per_minute("jira", 60));
        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..65 {
            let bucket = bucket.clone();
            handles.push(tokio::spawn(async move { bucket.acquire().await }));
        }
        for h in handles {
            h.await.unwrap();
        }
        // 60 burst + 5 at one per second
        assert!(start.elapsed() >= Duration::from_secs(4));
    }
}
