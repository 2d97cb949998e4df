//! Token-bucket rate limiter composed with a concurrency semaphore
//!
//! Every `acquire` takes a concurrency slot and consumes one token from a
//! bucket of capacity `rate_limit`. A background task returns consumed tokens
//! at one per `1 / rate_limit` seconds, so sustained throughput converges to
//! `rate_limit` requests per second while at most `concurrency_limit`
//! requests are in flight.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::RateLimitError;

#[derive(Debug)]
struct Bucket {
    /// Consumed tokens not yet returned; never exceeds the rate limit
    pending: usize,
    last_refill: Instant,
}

/// Held for the duration of one request; dropping it frees the concurrency slot
#[derive(Debug)]
pub struct Throttle {
    _slot: OwnedSemaphorePermit,
}

#[derive(Debug)]
pub struct RateLimiter {
    rate_limit: u32,
    concurrency_limit: usize,
    slots: Arc<Semaphore>,
    tokens: Arc<Semaphore>,
    bucket: Arc<Mutex<Bucket>>,
    replenisher: Mutex<Option<JoinHandle<()>>>,
}

impl RateLimiter {
    /// Create a limiter and start its replenishment task.
    ///
    /// `concurrency_limit` defaults to 1. Must be called inside a tokio runtime.
    pub fn new(rate_limit: u32, concurrency_limit: Option<usize>) -> Result<Self, RateLimitError> {
        if rate_limit == 0 {
            return Err(RateLimitError::InvalidConfig(
                "rate limit must be a positive number".into(),
            ));
        }
        let concurrency_limit = concurrency_limit.unwrap_or(1);
        if concurrency_limit == 0 {
            return Err(RateLimitError::InvalidConfig(
                "concurrency limit must be a positive number".into(),
            ));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            RateLimitError::InvalidConfig("the rate limiter needs a running tokio runtime".into())
        })?;

        let period = Duration::from_nanos((1_000_000_000u64 / rate_limit as u64).max(1));
        let tokens = Arc::new(Semaphore::new(rate_limit as usize));
        let bucket = Arc::new(Mutex::new(Bucket {
            pending: 0,
            last_refill: Instant::now(),
        }));

        let handle = runtime.spawn(replenish(tokens.clone(), bucket.clone(), period));
        tracing::debug!(rate_limit, concurrency_limit, "Rate limiter started");

        Ok(Self {
            rate_limit,
            concurrency_limit,
            slots: Arc::new(Semaphore::new(concurrency_limit)),
            tokens,
            bucket,
            replenisher: Mutex::new(Some(handle)),
        })
    }

    pub fn rate_limit(&self) -> u32 {
        self.rate_limit
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    pub fn is_closed(&self) -> bool {
        self.slots.is_closed()
    }

    /// Wait for a free concurrency slot and a token.
    ///
    /// Fails with `Closed` once the limiter has been closed, including for
    /// callers already waiting.
    pub async fn acquire(&self) -> Result<Throttle, RateLimitError> {
        let slot = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RateLimitError::Closed)?;

        let token = self.tokens.acquire().await.map_err(|_| RateLimitError::Closed)?;
        // Returned later by the replenisher, not on drop
        token.forget();
        self.bucket.lock().pending += 1;

        Ok(Throttle { _slot: slot })
    }

    /// Stop the replenishment task and wake all waiters. Idempotent.
    pub async fn close(&self) -> Result<(), RateLimitError> {
        self.slots.close();
        self.tokens.close();

        let handle = self.replenisher.lock().take();
        let Some(handle) = handle else {
            return Ok(());
        };

        handle.abort();
        match handle.await {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancelled() => {
                tracing::debug!("Rate limiter replenishment task cancelled");
                Ok(())
            }
            Err(e) => Err(RateLimitError::TaskFailed(e.to_string())),
        }
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        if let Some(handle) = self.replenisher.get_mut().take() {
            handle.abort();
        }
    }
}

async fn replenish(tokens: Arc<Semaphore>, bucket: Arc<Mutex<Bucket>>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if tokens.is_closed() {
            break;
        }

        let mut bucket = bucket.lock();
        if bucket.pending == 0 {
            continue;
        }

        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill);
        let earned = (elapsed.as_nanos() / period.as_nanos()) as usize;
        if earned == 0 {
            continue;
        }

        let released = earned.min(bucket.pending);
        bucket.pending -= released;
        bucket.last_refill = now;
        tokens.add_permits(released);
    }
}
