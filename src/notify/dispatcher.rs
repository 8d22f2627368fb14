//! Delivery with rate limiting and retries
//!
//! Every notification first needs a token from its topic's bucket. It may wait
//! up to the configured queue bound for one; after that it is dropped with
//! [`MonitorError::RateLimited`]. Transient transport failures are retried with
//! exponential backoff (`base * 2^n`, capped), permanent ones are not.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use super::priority::Notification;
use super::rate_limit::TopicLimiter;
use super::transport::NotificationTransport;
use crate::config::Config;
use crate::error::MonitorError;

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResult {
    pub delivered: bool,
    /// Attempts made after the first one
    pub retries: u32,
    pub error: Option<MonitorError>,
}

impl DispatchResult {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self.error, Some(MonitorError::RateLimited { .. }))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based)
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

pub struct Dispatcher {
    transport: Arc<dyn NotificationTransport>,
    limiter: TopicLimiter,
    queue_wait: Duration,
    retry: RetryPolicy,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn NotificationTransport>,
        limiter: TopicLimiter,
        queue_wait: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            limiter,
            queue_wait,
            retry,
        }
    }

    pub fn from_config(config: &Config, transport: Arc<dyn NotificationTransport>) -> Self {
        Self::new(
            transport,
            TopicLimiter::new(config.rate_limit.burst, config.rate_limit.refill_per_minute),
            Duration::from_millis(config.rate_limit.queue_wait_ms),
            RetryPolicy {
                attempts: config.retry.attempts,
                base_delay: Duration::from_millis(config.retry.base_delay_ms),
                max_delay: Duration::from_millis(config.retry.max_delay_ms),
            },
        )
    }

    #[instrument(skip_all, fields(topic = %notification.topic, title = %notification.title))]
    pub async fn dispatch(&self, notification: &Notification) -> DispatchResult {
        if !self
            .limiter
            .acquire_within(&notification.topic, self.queue_wait)
            .await
        {
            warn!("dropping notification, topic is rate limited");
            return DispatchResult {
                delivered: false,
                retries: 0,
                error: Some(MonitorError::RateLimited {
                    topic: notification.topic.clone(),
                }),
            };
        }

        let mut retries = 0;
        loop {
            match self.transport.send(notification).await {
                Ok(()) => {
                    return DispatchResult {
                        delivered: true,
                        retries,
                        error: None,
                    };
                }
                Err(e) if e.is_transient() && retries + 1 < self.retry.attempts => {
                    retries += 1;
                    let delay = self.retry.delay(retries);
                    debug!(retries, delay_ms = delay.as_millis(), "transient failure: {e}");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(retries, "delivery failed: {e}");
                    return DispatchResult {
                        delivered: false,
                        retries,
                        error: Some(e),
                    };
                }
            }
        }
    }
}
