//! Deterministic stand-ins for a sentinel-managed Redis deployment.
//!
//! `SimCluster` owns a handful of data nodes sharing one replicated dataset,
//! plus sentinels whose view of the network can be cut per member. Failover
//! only happens when a majority of sentinels agree the master is gone and a
//! majority can still reach a replica to promote.

#![allow(dead_code)]

use sentinel_rate_limiter::metrics::MetricsSink;
use sentinel_rate_limiter::sentinel::{DiscoveryMode, MasterEndpoint, MasterLocator, SentinelClient};
use sentinel_rate_limiter::storage::{
    MemoryStore, NodeConnector, SentinelStore, WindowRecord, WindowSnapshot, WindowStore,
};
use sentinel_rate_limiter::{RateLimitError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const OPERATION_TIMEOUT: Duration = Duration::from_millis(200);
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
struct SentinelState {
    address: String,
    // the client can talk to this sentinel
    reachable: bool,
    // this sentinel can talk to the master node
    sees_master: bool,
    // this sentinel can talk to the replicas
    sees_replicas: bool,
    // answer this instead of the real master
    claim: Option<MasterEndpoint>,
}

#[derive(Debug)]
struct ClusterState {
    master: MasterEndpoint,
    nodes: Vec<MasterEndpoint>,
    up: HashMap<MasterEndpoint, bool>,
    latency: Duration,
    sentinels: Vec<SentinelState>,
    down_since: Option<Instant>,
    failovers: usize,
}

impl ClusterState {
    fn quorum(&self) -> usize {
        self.sentinels.len() / 2 + 1
    }

    fn is_up(&self, endpoint: &MasterEndpoint) -> bool {
        self.up.get(endpoint).copied().unwrap_or(false)
    }
}

#[derive(Clone)]
pub struct SimCluster {
    state: Arc<Mutex<ClusterState>>,
    data: MemoryStore,
}

impl SimCluster {
    pub fn new(node_count: usize, sentinel_count: usize) -> Self {
        let nodes: Vec<MasterEndpoint> = (0..node_count)
            .map(|i| MasterEndpoint::new(format!("10.0.0.{}", i + 1), 6379))
            .collect();
        let sentinels = (0..sentinel_count)
            .map(|i| SentinelState {
                address: format!("10.0.1.{}:26379", i + 1),
                reachable: true,
                sees_master: true,
                sees_replicas: true,
                claim: None,
            })
            .collect();
        let state = ClusterState {
            master: nodes[0].clone(),
            up: nodes.iter().map(|n| (n.clone(), true)).collect(),
            nodes,
            latency: Duration::ZERO,
            sentinels,
            down_since: None,
            failovers: 0,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            data: MemoryStore::new(),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut ClusterState) -> T) -> T {
        let mut state = self.state.lock().expect("cluster state poisoned");
        f(&mut state)
    }

    pub fn master(&self) -> MasterEndpoint {
        self.with_state(|s| s.master.clone())
    }

    pub fn nodes(&self) -> Vec<MasterEndpoint> {
        self.with_state(|s| s.nodes.clone())
    }

    pub fn failovers(&self) -> usize {
        self.with_state(|s| s.failovers)
    }

    pub fn data(&self) -> &MemoryStore {
        &self.data
    }

    pub fn kill_node(&self, endpoint: &MasterEndpoint) {
        self.with_state(|s| {
            s.up.insert(endpoint.clone(), false);
        });
    }

    pub fn revive_node(&self, endpoint: &MasterEndpoint) {
        self.with_state(|s| {
            s.up.insert(endpoint.clone(), true);
        });
    }

    /// Role change without any sentinel involvement; the old master stays up as a replica
    pub fn promote(&self, endpoint: &MasterEndpoint) {
        self.with_state(|s| s.master = endpoint.clone());
    }

    pub fn set_latency(&self, latency: Duration) {
        self.with_state(|s| s.latency = latency);
    }

    pub fn set_sentinel_reachable(&self, index: usize, reachable: bool) {
        self.with_state(|s| s.sentinels[index].reachable = reachable);
    }

    /// Cut a sentinel off from the master node only
    pub fn partition_sentinel_from_master(&self, index: usize) {
        self.with_state(|s| s.sentinels[index].sees_master = false);
    }

    /// Cut a sentinel off from every data node and from the client
    pub fn isolate_sentinel(&self, index: usize) {
        self.with_state(|s| {
            let sentinel = &mut s.sentinels[index];
            sentinel.reachable = false;
            sentinel.sees_master = false;
            sentinel.sees_replicas = false;
        });
    }

    pub fn set_sentinel_claim(&self, index: usize, claim: Option<MasterEndpoint>) {
        self.with_state(|s| s.sentinels[index].claim = claim);
    }

    pub fn set_all_sentinel_claims(&self, claim: Option<MasterEndpoint>) {
        self.with_state(|s| {
            for sentinel in &mut s.sentinels {
                sentinel.claim = claim.clone();
            }
        });
    }

    pub fn sentinels(&self) -> Vec<Arc<dyn SentinelClient>> {
        let count = self.with_state(|s| s.sentinels.len());
        (0..count)
            .map(|index| {
                Arc::new(SimSentinel {
                    index,
                    address: self.with_state(|s| s.sentinels[index].address.clone()),
                    cluster: self.clone(),
                }) as Arc<dyn SentinelClient>
            })
            .collect()
    }

    pub fn locator(&self, mode: DiscoveryMode) -> MasterLocator {
        MasterLocator::new("mymaster", self.sentinels(), DISCOVERY_TIMEOUT, mode)
    }

    pub fn connector(&self) -> SimConnector {
        SimConnector {
            cluster: self.clone(),
        }
    }

    pub fn store(&self, mode: DiscoveryMode, metrics: Arc<dyn MetricsSink>) -> SentinelStore<SimConnector> {
        SentinelStore::new(self.locator(mode), self.connector(), OPERATION_TIMEOUT, metrics)
    }

    /// One sentinel round: vote on the master, promote when a majority has
    /// considered it down for `down_after` and a majority can reach a replica.
    pub fn sentinel_round(&self, down_after: Duration) {
        self.with_state(|s| {
            let master_up = s.is_up(&s.master);
            let down_votes = s
                .sentinels
                .iter()
                .filter(|sentinel| !(sentinel.sees_master && master_up))
                .count();
            let can_promote = s.sentinels.iter().filter(|sentinel| sentinel.sees_replicas).count();
            let quorum = s.quorum();

            if down_votes < quorum {
                s.down_since = None;
                return;
            }
            let since = *s.down_since.get_or_insert_with(Instant::now);
            if since.elapsed() < down_after || can_promote < quorum {
                return;
            }

            let candidate = s
                .nodes
                .iter()
                .find(|node| **node != s.master && s.is_up(node))
                .cloned();
            if let Some(candidate) = candidate {
                s.master = candidate;
                s.failovers += 1;
                s.down_since = None;
            }
        });
    }

    pub fn spawn_failover_monitor(&self, down_after: Duration) -> JoinHandle<()> {
        let cluster = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(100)).await;
                cluster.sentinel_round(down_after);
            }
        })
    }
}

pub struct SimSentinel {
    index: usize,
    address: String,
    cluster: SimCluster,
}

#[async_trait::async_trait]
impl SentinelClient for SimSentinel {
    fn address(&self) -> &str {
        &self.address
    }

    async fn ask_master(&self, _master_name: &str) -> Result<MasterEndpoint> {
        self.cluster.with_state(|s| {
            let sentinel = &s.sentinels[self.index];
            if !sentinel.reachable {
                return Err(RateLimitError::StoreUnavailable(format!(
                    "sentinel {} unreachable",
                    sentinel.address
                )));
            }
            Ok(sentinel.claim.clone().unwrap_or_else(|| s.master.clone()))
        })
    }
}

pub struct SimConnector {
    cluster: SimCluster,
}

#[async_trait::async_trait]
impl NodeConnector for SimConnector {
    type Node = SimNode;

    async fn connect(&self, endpoint: &MasterEndpoint) -> Result<SimNode> {
        if !self.cluster.with_state(|s| s.is_up(endpoint)) {
            return Err(RateLimitError::StoreUnavailable(format!(
                "connection to {} refused",
                endpoint
            )));
        }
        Ok(SimNode {
            endpoint: endpoint.clone(),
            cluster: self.cluster.clone(),
        })
    }
}

/// Connection to one simulated node
pub struct SimNode {
    endpoint: MasterEndpoint,
    cluster: SimCluster,
}

impl SimNode {
    async fn writable(&self) -> Result<()> {
        let (up, master, latency) = self
            .cluster
            .with_state(|s| (s.is_up(&self.endpoint), s.master.clone(), s.latency));
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if !up {
            return Err(RateLimitError::StoreUnavailable(format!(
                "connection to {} reset",
                self.endpoint
            )));
        }
        if master != self.endpoint {
            return Err(RateLimitError::ReadOnly(format!(
                "READONLY {} is a replica",
                self.endpoint
            )));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl WindowStore for SimNode {
    async fn record_attempt(
        &self,
        key: &str,
        record: &WindowRecord,
        window_secs: u64,
        max_requests: u32,
    ) -> Result<WindowSnapshot> {
        self.writable().await?;
        self.cluster.data
            .record_attempt(key, record, window_secs, max_requests)
            .await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        self.writable().await?;
        self.cluster.data.delete_prefix(prefix).await
    }
}

/// Memory store with switchable faults and a call counter
#[derive(Clone, Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    unreachable: Arc<AtomicBool>,
    read_only: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unreachable(&self, value: bool) {
        self.unreachable.store(value, Ordering::SeqCst);
    }

    pub fn set_read_only(&self, value: bool) {
        self.read_only.store(value, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    fn check(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(RateLimitError::StoreUnavailable("connection refused".into()));
        }
        if self.read_only.load(Ordering::SeqCst) {
            return Err(RateLimitError::ReadOnly(
                "READONLY You can't write against a read only replica.".into(),
            ));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl WindowStore for FaultyStore {
    async fn record_attempt(
        &self,
        key: &str,
        record: &WindowRecord,
        window_secs: u64,
        max_requests: u32,
    ) -> Result<WindowSnapshot> {
        self.check()?;
        self.inner
            .record_attempt(key, record, window_secs, max_requests)
            .await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        self.check()?;
        self.inner.delete_prefix(prefix).await
    }
}
