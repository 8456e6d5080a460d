use crate::clock::{Clock, SystemClock};
use crate::storage::{WindowRecord, WindowStore};
use crate::{Decision, RateLimitKey, Result, Window};
use std::sync::Arc;
use tracing::debug;

/// Sliding window log limiter over an ordered-set store.
/// Every attempt is recorded, counted and (when over the limit) taken back out
/// in one atomic store call, so concurrent checks on a key can never both see
/// room for the last slot and a rejection never leaves a record behind.
pub struct SlidingWindowLimiter<S: WindowStore> {
    storage: S,
    clock: Arc<dyn Clock>,
    key_prefix: String,
}

impl<S: WindowStore> SlidingWindowLimiter<S> {
    pub fn new(storage: S, key_prefix: &str) -> Self {
        Self::with_clock(storage, key_prefix, Arc::new(SystemClock))
    }

    pub fn with_clock(storage: S, key_prefix: &str, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            clock,
            key_prefix: key_prefix.to_string(),
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// The raw check; store faults come back as errors for the policy layer
    pub async fn try_check(&self, key: &RateLimitKey, window: Window) -> Result<Decision> {
        let now = self.clock.now_secs();
        let storage_key = key.storage_key(&self.key_prefix);
        let record = WindowRecord::new(now);

        let snapshot = self
            .storage
            .record_attempt(
                &storage_key,
                &record,
                window.window_seconds,
                window.max_requests,
            )
            .await?;

        let oldest = snapshot.oldest.unwrap_or(now);
        let reset = (oldest + window.window_seconds).saturating_sub(now);

        if !snapshot.admitted {
            debug!(key = %key, count = snapshot.count, limit = window.max_requests, retry_after = reset, "Rate limit exceeded");
            return Ok(Decision::rejected(window.max_requests, reset, reset));
        }

        let remaining = window.max_requests.saturating_sub(snapshot.count as u32);
        debug!(key = %key, remaining, "Rate limit check passed");
        Ok(Decision::admitted(window.max_requests, remaining, reset))
    }
}
