pub mod memory;
pub mod redis_storage;
pub mod sentinel_store;

pub use memory::MemoryStore;
pub use redis_storage::{RedisConnector, RedisNode};
pub use sentinel_store::SentinelStore;

use crate::Result;
use crate::sentinel::MasterEndpoint;
use std::sync::Arc;

/// One request attempt as stored in a key's ordered set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowRecord {
    // arrival time, seconds since epoch; the set score
    pub score: u64,
    // `{timestamp}_{random}` so same-second records don't collide
    pub member: String,
}

impl WindowRecord {
    pub fn new(score: u64) -> Self {
        Self {
            score,
            member: format!("{}_{}", score, uuid::Uuid::new_v4().simple()),
        }
    }
}

/// Outcome of one recorded attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    // records inside the window right after the provisional insert
    pub count: u64,
    // score of the oldest record left in the set
    pub oldest: Option<u64>,
    // false when the provisional record was taken back out
    pub admitted: bool,
}

//Capability interface every rate limit store provides
#[async_trait::async_trait]
pub trait WindowStore: Send + Sync {
    /// As one atomic unit: drop records scored below `record.score - window_secs`,
    /// insert `record`, refresh the key's expiry, count, and remove `record`
    /// again if the count went past `max_requests`.
    async fn record_attempt(
        &self,
        key: &str,
        record: &WindowRecord,
        window_secs: u64,
        max_requests: u32,
    ) -> Result<WindowSnapshot>;

    //delete every key under `prefix:`, returns how many were removed
    async fn delete_prefix(&self, prefix: &str) -> Result<u64>;
}

#[async_trait::async_trait]
impl<T> WindowStore for Arc<T>
where
    T: WindowStore + ?Sized,
{
    async fn record_attempt(
        &self,
        key: &str,
        record: &WindowRecord,
        window_secs: u64,
        max_requests: u32,
    ) -> Result<WindowSnapshot> {
        (**self)
            .record_attempt(key, record, window_secs, max_requests)
            .await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        (**self).delete_prefix(prefix).await
    }
}

/// Opens a store handle bound to one concrete endpoint
#[async_trait::async_trait]
pub trait NodeConnector: Send + Sync {
    type Node: WindowStore + 'static;

    async fn connect(&self, endpoint: &MasterEndpoint) -> Result<Self::Node>;
}
