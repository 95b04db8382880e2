//! Hand-rolled token bucket (§4.2). Not a wrapper around a crate: the
//! pacing semantics (burst credit, no re-debit on retry) are specific
//! enough that lazy refill on `tokio::time::sleep` is the direct
//! translation of the contract.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Token bucket rate limiter: capacity = burst, refill rate = qps
/// tokens/sec. `acquire` blocks the caller until one token is available.
pub struct TokenBucket {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_per_sec: f64,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(qps: f64, burst: u32) -> Self {
        let capacity = burst.max(1) as f64;
        Self {
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_per_sec: qps.max(0.0),
        }
    }

    /// Waits until a single token is available, consuming it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().expect("token bucket mutex poisoned");
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else if self.refill_per_sec <= 0.0 {
                    Some(Duration::from_secs(3600))
                } else {
                    let shortfall = 1.0 - state.tokens;
                    Some(Duration::from_secs_f64(shortfall / self.refill_per_sec))
                }
            };

            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_tokens_acquire_immediately() {
        let bucket = TokenBucket::new(1.0, 3);
        let start = Instant::now();
        for _ in 0..3 {
            bucket.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn exhausted_bucket_waits_for_refill() {
        let bucket = TokenBucket::new(10.0, 1);
        bucket.acquire().await;
        let start = Instant::now();
        bucket.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(80));
    }
}
