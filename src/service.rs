//! Rate limiter service
//!
//! The facade the web layer talks to. Resolves the window for a key (explicit
//! arguments, then endpoint override, then the global default) and runs the
//! fail-open check.

use crate::algorithms::SlidingWindowLimiter;
use crate::clock::{Clock, SystemClock};
use crate::config::{LimitsConfig, PolicyConfig, Settings, StoreBackend};
use crate::metrics::MetricsSink;
use crate::policy::{CircuitBreaker, FailOpenLimiter, LimiterHealth};
use crate::sentinel::{MasterLocator, RedisSentinelClient, SentinelClient};
use crate::storage::{MemoryStore, RedisConnector, SentinelStore, WindowStore};
use crate::{Decision, RateLimitKey, RateLimiter, Result, Window};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const MEMORY_PURGE_INTERVAL: Duration = Duration::from_secs(60);

pub struct RateLimiterService {
    limiter: FailOpenLimiter<Arc<dyn WindowStore>>,
    limits: LimitsConfig,
}

impl RateLimiterService {
    /// Build the store described by `settings` and wrap it in the fail-open policy
    pub async fn connect(settings: &Settings, metrics: Arc<dyn MetricsSink>) -> Result<Self> {
        settings.validate()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let store: Arc<dyn WindowStore> = match settings.store.backend {
            StoreBackend::Sentinel => {
                let members = settings
                    .sentinel
                    .addresses
                    .iter()
                    .map(|address| {
                        RedisSentinelClient::new(
                            address,
                            settings.sentinel.password.as_deref(),
                            settings.sentinel.discovery_timeout(),
                        )
                        .map(|client| Arc::new(client) as Arc<dyn SentinelClient>)
                    })
                    .collect::<Result<Vec<_>>>()?;

                let locator = MasterLocator::new(
                    settings.sentinel.master_name.clone(),
                    members,
                    settings.sentinel.discovery_timeout(),
                    settings.sentinel.discovery,
                );
                let connector = RedisConnector::new(
                    settings.store.password.clone(),
                    settings.store.db,
                    settings.sentinel.discovery_timeout(),
                );
                let store = SentinelStore::new(
                    locator,
                    connector,
                    settings.store.operation_timeout(),
                    Arc::clone(&metrics),
                );

                // not fatal: checks fail open until the quorum answers
                match store.warm_up().await {
                    Ok(master) => info!(master = %master, "Rate limiter using sentinel-managed store"),
                    Err(e) => warn!(error = %e, "Could not resolve master at startup, failing open until it can"),
                }
                Arc::new(store)
            }
            StoreBackend::Memory => {
                info!("Rate limiter using in-memory storage backend");
                let store = MemoryStore::new();
                spawn_memory_purge(store.clone(), Arc::clone(&clock));
                Arc::new(store)
            }
        };

        Self::with_store(
            store,
            settings.limits.clone(),
            &settings.policy,
            clock,
            metrics,
        )
    }

    /// Create with a custom storage backend (tests, embedding).
    /// Fails with `Configuration` when any configured window is unusable.
    pub fn with_store(
        store: Arc<dyn WindowStore>,
        limits: LimitsConfig,
        policy: &PolicyConfig,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self> {
        limits.validate()?;
        let inner = SlidingWindowLimiter::with_clock(store, &limits.key_prefix, clock);
        let mut limiter = FailOpenLimiter::new(inner, metrics);
        if policy.breaker_failure_threshold > 0 {
            limiter = limiter.with_breaker(CircuitBreaker::new(
                policy.breaker_failure_threshold,
                Duration::from_millis(policy.breaker_cooldown_ms),
            ));
        }
        Ok(Self { limiter, limits })
    }

    pub fn health(&self) -> LimiterHealth {
        self.limiter.health()
    }

    pub fn has_endpoint_override(&self, endpoint: &str) -> bool {
        self.limits.endpoints.contains_key(endpoint)
    }

    /// Configured window for an endpoint tag, or the global default
    pub fn window_for(&self, endpoint: Option<&str>) -> Window {
        let (window_seconds, max_requests) = match endpoint.and_then(|e| self.limits.endpoints.get(e)) {
            Some(o) => (o.window_seconds, o.max_requests),
            None => (
                self.limits.default_window_seconds,
                self.limits.default_max_requests,
            ),
        };
        Window {
            window_seconds,
            max_requests,
        }
    }

    /// Explicit `window`/`max_requests` win over the configured ones.
    /// Always yields a decision; store trouble shows up as `degraded`.
    pub async fn check_rate_limit(
        &self,
        identity: &str,
        endpoint: Option<&str>,
        window: Option<u64>,
        max_requests: Option<u32>,
    ) -> Decision {
        let configured = self.window_for(endpoint);
        // zero from a caller means "use the configured value"
        let resolved = Window {
            window_seconds: window.filter(|w| *w > 0).unwrap_or(configured.window_seconds),
            max_requests: max_requests.filter(|m| *m > 0).unwrap_or(configured.max_requests),
        };

        let key = RateLimitKey::new(identity, endpoint);
        self.limiter.check(&key, resolved).await
    }

    /// Failed login attempts share the primitive under the `login` endpoint tag
    pub async fn record_failed_login(&self, identity: &str) -> Decision {
        let key = RateLimitKey::login(identity);
        let window = self.window_for(key.endpoint.as_deref());
        self.limiter.check(&key, window).await
    }

    /// Drop all rate limit state in the namespace. Test and admin use only.
    pub async fn reset_all(&self) -> Result<u64> {
        let inner = self.limiter.inner();
        let removed = inner.storage().delete_prefix(inner.key_prefix()).await?;
        info!(prefix = %inner.key_prefix(), removed, "Reset all rate limit state");
        Ok(removed)
    }
}

fn spawn_memory_purge(store: MemoryStore, clock: Arc<dyn Clock>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(MEMORY_PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            let purged = store.purge_expired(clock.now_secs());
            if purged > 0 {
                debug!(purged, "Purged expired in-memory rate limit keys");
            }
        }
    });
}
