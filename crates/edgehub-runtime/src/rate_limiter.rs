//! Rate Limiting for outbound traffic
//!
//! Token bucket admission control bounding the rate at which messages leave
//! the node. The bucket holds at most `burst` tokens and refills at `qps`
//! tokens per second; each send consumes one token. A caller finding the
//! bucket empty waits cooperatively until a token is available or its
//! cancellation token fires.

use edgehub_core::{EdgeHubConfig, EdgeHubError, EdgeHubResult};
use std::sync::{Mutex, MutexGuard};
use tokio::time::{sleep, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Absorbs float rounding so a refill landing a hair under one token counts
const TOKEN_EPSILON: f64 = 1e-9;

/// Token bucket state
#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket rate limiter
#[derive(Debug)]
pub struct RateLimiter {
    qps: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a rate limiter with a full bucket
    ///
    /// `qps` must be positive and `burst` at least one; both are checked by
    /// [`EdgeHubConfig::validate`].
    pub fn new(qps: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            qps,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Create a rate limiter from the `message_qps`/`message_burst` options
    pub fn from_config(config: &EdgeHubConfig) -> Self {
        Self::new(config.message_qps, config.message_burst)
    }

    /// Take a token if one is available right now
    pub fn try_acquire(&self) -> bool {
        self.reserve().is_none()
    }

    /// Wait for a token and consume it
    ///
    /// Returns [`EdgeHubError::Canceled`] if `cancel` fires first; no token is
    /// consumed in that case.
    pub async fn acquire(&self, cancel: &CancellationToken) -> EdgeHubResult<()> {
        loop {
            let wait = match self.reserve() {
                None => return Ok(()),
                Some(wait) => wait,
            };
            trace!("Rate limiter empty, waiting {:?} for a token", wait);

            tokio::select! {
                _ = sleep(wait) => {}
                _ = cancel.cancelled() => return Err(EdgeHubError::Canceled),
            }
        }
    }

    /// Tokens currently in the bucket
    pub fn available(&self) -> f64 {
        let mut bucket = self.lock();
        self.refill(&mut bucket);
        bucket.tokens
    }

    pub fn qps(&self) -> f64 {
        self.qps
    }

    pub fn burst(&self) -> u32 {
        self.burst as u32
    }

    /// Consume a token, or report how long until one is available
    fn reserve(&self) -> Option<Duration> {
        let mut bucket = self.lock();
        self.refill(&mut bucket);

        if bucket.tokens + TOKEN_EPSILON >= 1.0 {
            bucket.tokens = (bucket.tokens - 1.0).max(0.0);
            None
        } else {
            let missing = 1.0 - bucket.tokens;
            // Very small rates yield waits beyond what a Duration holds
            Some(Duration::try_from_secs_f64(missing / self.qps).unwrap_or(Duration::MAX))
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * self.qps).min(self.burst);
        bucket.last_refill = now;
    }

    fn lock(&self) -> MutexGuard<'_, Bucket> {
        // The bucket holds plain numbers, a poisoned lock leaves it consistent
        self.bucket.lock().unwrap_or_else(|e| e.into_inner())
    }
}
