//! Fail-open policy.
//!
//! A store fault never reaches the protected request path: the attempt is
//! admitted and marked `degraded`. Every call tries the real check first unless
//! the optional breaker has been tripped by a run of consecutive faults.

use crate::algorithms::SlidingWindowLimiter;
use crate::metrics::MetricsSink;
use crate::storage::WindowStore;
use crate::{Decision, RateLimitKey, RateLimiter, Window};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterHealth {
    Normal,
    Degraded,
}

/// Skips the store for `cooldown` once `failure_threshold` consecutive faults pile up
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    consecutive_failures: AtomicU32,
    open_until: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            consecutive_failures: AtomicU32::new(0),
            open_until: Mutex::new(None),
        }
    }

    pub fn is_open(&self) -> bool {
        let Ok(mut open_until) = self.open_until.lock() else {
            return false;
        };
        match *open_until {
            Some(until) if Instant::now() < until => true,
            Some(_) => {
                // cooldown over, let the next call probe the store
                *open_until = None;
                false
            }
            None => false,
        }
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.failure_threshold {
            if let Ok(mut open_until) = self.open_until.lock() {
                *open_until = Some(Instant::now() + self.cooldown);
            }
            self.consecutive_failures.store(0, Ordering::Relaxed);
            warn!(failures, cooldown_ms = self.cooldown.as_millis() as u64, "Circuit opened, skipping store");
        }
    }
}

pub struct FailOpenLimiter<S: WindowStore> {
    inner: SlidingWindowLimiter<S>,
    metrics: Arc<dyn MetricsSink>,
    breaker: Option<CircuitBreaker>,
    degraded: AtomicBool,
}

impl<S: WindowStore> FailOpenLimiter<S> {
    pub fn new(inner: SlidingWindowLimiter<S>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            inner,
            metrics,
            breaker: None,
            degraded: AtomicBool::new(false),
        }
    }

    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn inner(&self) -> &SlidingWindowLimiter<S> {
        &self.inner
    }

    pub fn health(&self) -> LimiterHealth {
        if self.degraded.load(Ordering::Relaxed) {
            LimiterHealth::Degraded
        } else {
            LimiterHealth::Normal
        }
    }

    fn mark_normal(&self) {
        if self.degraded.swap(false, Ordering::Relaxed) {
            info!("Rate limit store reachable again, enforcing limits");
        }
    }

    fn mark_degraded(&self) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            warn!("Rate limit store unavailable, failing open");
        }
    }
}

#[async_trait::async_trait]
impl<S: WindowStore> RateLimiter for FailOpenLimiter<S> {
    async fn check(&self, key: &RateLimitKey, window: Window) -> Decision {
        if let Some(breaker) = &self.breaker
            && breaker.is_open()
        {
            debug!(key = %key, "Circuit open, admitting without store");
            let decision = Decision::failed_open(window.max_requests);
            self.metrics.record_decision(&decision);
            return decision;
        }

        let decision = match self.inner.try_check(key, window).await {
            Ok(decision) => {
                if let Some(breaker) = &self.breaker {
                    breaker.record_success();
                }
                self.mark_normal();
                decision
            }
            Err(e) => {
                warn!(key = %key, error = %e, kind = e.kind(), "Rate limit check failed, allowing request");
                self.metrics.record_store_error(&e);
                if let Some(breaker) = &self.breaker {
                    breaker.record_failure();
                }
                self.mark_degraded();
                Decision::failed_open(window.max_requests)
            }
        };

        self.metrics.record_decision(&decision);
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opens_after_threshold_and_recovers() {
        let breaker = CircuitBreaker::new(3, Duration::from_millis(500));
        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open());
        breaker.record_failure();
        assert!(breaker.is_open());

        tokio::time::advance(Duration::from_millis(501)).await;
        assert!(!breaker.is_open());
    }

    #[tokio::test]
    async fn test_success_resets_failure_run() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(10));
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert!(!breaker.is_open());
    }
}
