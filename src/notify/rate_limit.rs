use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

/// Token bucket per notification topic
///
/// A throttled caller may wait for a token, but never longer than the bound
/// passed to [`TopicLimiter::acquire_within`].
pub struct TopicLimiter {
    buckets: DashMap<String, TokenBucket>,
    max_tokens: u32,
    /// Tokens per second
    refill_rate: f64,
}

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TopicLimiter {
    #[must_use]
    pub fn new(max_tokens: u32, refill_per_minute: u32) -> Self {
        Self {
            buckets: DashMap::new(),
            max_tokens,
            refill_rate: f64::from(refill_per_minute) / 60.0,
        }
    }

    /// Take a token, or report how long until one is available
    pub fn try_acquire(&self, topic: &str) -> Result<(), Duration> {
        let now = Instant::now();
        let mut bucket = self
            .buckets
            .entry(topic.to_string())
            .or_insert_with(|| TokenBucket {
                tokens: f64::from(self.max_tokens),
                last_refill: now,
            });

        let elapsed = now.duration_since(bucket.last_refill);
        let tokens_to_add = elapsed.as_secs_f64() * self.refill_rate;
        if tokens_to_add > 0.0 {
            bucket.tokens = (bucket.tokens + tokens_to_add).min(f64::from(self.max_tokens));
            bucket.last_refill = now;
        }

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }

        if self.refill_rate <= 0.0 {
            return Err(Duration::MAX);
        }
        Err(Duration::from_secs_f64((1.0 - bucket.tokens) / self.refill_rate))
    }

    /// Wait for a token for at most `max_wait`; `false` means the caller should drop
    pub async fn acquire_within(&self, topic: &str, max_wait: Duration) -> bool {
        let started = Instant::now();
        loop {
            match self.try_acquire(topic) {
                Ok(()) => return true,
                Err(wait) => {
                    let waited = started.elapsed();
                    if waited.saturating_add(wait) > max_wait {
                        debug!(topic, ?wait, "no token within {max_wait:?}");
                        return false;
                    }
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}
