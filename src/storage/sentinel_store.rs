//! Failover-aware store: every operation runs against whatever node the
//! quorum currently calls master.
//!
//! The resolved node is cached until an operation on it fails. Any fault drops
//! the cache so the next operation re-resolves. A read-only rejection means the
//! cached master was demoted under us, so it is re-resolved immediately and the
//! operation retried once.

use super::{NodeConnector, WindowRecord, WindowSnapshot, WindowStore};
use crate::metrics::MetricsSink;
use crate::sentinel::{MasterEndpoint, MasterLocator};
use crate::{RateLimitError, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

pub struct SentinelStore<C: NodeConnector> {
    locator: MasterLocator,
    connector: C,
    op_timeout: Duration,
    current: RwLock<Option<(MasterEndpoint, Arc<C::Node>)>>,
    // last master we successfully connected to, survives invalidation
    last_master: Mutex<Option<MasterEndpoint>>,
    metrics: Arc<dyn MetricsSink>,
}

impl<C: NodeConnector> SentinelStore<C> {
    pub fn new(
        locator: MasterLocator,
        connector: C,
        op_timeout: Duration,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            locator,
            connector,
            op_timeout,
            current: RwLock::new(None),
            last_master: Mutex::new(None),
            metrics,
        }
    }

    pub fn locator(&self) -> &MasterLocator {
        &self.locator
    }

    /// Endpoint of the cached connection, if one is live
    pub async fn current_master(&self) -> Option<MasterEndpoint> {
        self.current
            .read()
            .await
            .as_ref()
            .map(|(endpoint, _)| endpoint.clone())
    }

    /// Resolve and connect once up front so the first request doesn't pay for it
    pub async fn warm_up(&self) -> Result<MasterEndpoint> {
        let (endpoint, _) = self.node().await?;
        Ok(endpoint)
    }

    async fn node(&self) -> Result<(MasterEndpoint, Arc<C::Node>)> {
        if let Some((endpoint, node)) = self.current.read().await.as_ref() {
            return Ok((endpoint.clone(), Arc::clone(node)));
        }

        let mut current = self.current.write().await;
        // another caller may have resolved while we waited for the lock
        if let Some((endpoint, node)) = current.as_ref() {
            return Ok((endpoint.clone(), Arc::clone(node)));
        }

        let endpoint = self.locator.discover_master().await?;
        let node = Arc::new(self.connector.connect(&endpoint).await?);

        let mut last = self.last_master.lock().await;
        match last.as_ref() {
            Some(previous) if *previous != endpoint => {
                info!(
                    master_name = %self.locator.master_name(),
                    from = %previous,
                    to = %endpoint,
                    "Master changed"
                );
                self.metrics.record_master_change(previous, &endpoint);
            }
            None => info!(master_name = %self.locator.master_name(), master = %endpoint, "Resolved master"),
            _ => {}
        }
        *last = Some(endpoint.clone());

        *current = Some((endpoint.clone(), Arc::clone(&node)));
        Ok((endpoint, node))
    }

    async fn invalidate(&self, failed: &MasterEndpoint) {
        let mut current = self.current.write().await;
        if matches!(current.as_ref(), Some((endpoint, _)) if endpoint == failed) {
            *current = None;
        }
    }

    async fn attempt<T, F, Fut>(&self, op: &'static str, f: &F) -> Result<T>
    where
        F: Fn(Arc<C::Node>) -> Fut + Sync,
        Fut: Future<Output = Result<T>> + Send,
    {
        let (endpoint, node) = self.node().await?;
        let outcome = match tokio::time::timeout(self.op_timeout, f(node)).await {
            Ok(result) => result,
            Err(_) => Err(RateLimitError::StoreUnavailable(format!(
                "{} on {} timed out after {:?}",
                op, endpoint, self.op_timeout
            ))),
        };
        if let Err(e) = &outcome {
            warn!(op, master = %endpoint, error = %e, "Store operation failed, dropping connection");
            self.invalidate(&endpoint).await;
        }
        outcome
    }

    async fn run<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: Fn(Arc<C::Node>) -> Fut + Sync,
        Fut: Future<Output = Result<T>> + Send,
    {
        match self.attempt(op, &f).await {
            Err(RateLimitError::ReadOnly(_)) => {
                // stale master: the cache is already gone, so this re-resolves
                self.attempt(op, &f).await.map_err(|e| {
                    RateLimitError::StoreUnavailable(format!(
                        "{} still failing after re-discovery: {}",
                        op, e
                    ))
                })
            }
            other => other,
        }
    }
}

#[async_trait::async_trait]
impl<C: NodeConnector> WindowStore for SentinelStore<C> {
    async fn record_attempt(
        &self,
        key: &str,
        record: &WindowRecord,
        window_secs: u64,
        max_requests: u32,
    ) -> Result<WindowSnapshot> {
        self.run("record_attempt", |node| async move {
            node.record_attempt(key, record, window_secs, max_requests)
                .await
        })
        .await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        self.run("delete_prefix", |node| async move {
            node.delete_prefix(prefix).await
        })
        .await
    }
}
