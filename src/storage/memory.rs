use super::{WindowRecord, WindowSnapshot, WindowStore};
use crate::Result;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Default)]
struct OrderedSet {
    records: BTreeSet<(u64, String)>,
    // score-time after which the whole key is gone
    expires_at: u64,
}

/// In-memory ordered sets. The per-key shard lock makes each call atomic.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<DashMap<String, OrderedSet>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: Arc::new(DashMap::new()),
        }
    }

    /// Number of records under `key`, ignoring expiry
    pub fn len(&self, key: &str) -> usize {
        self.data
            .get(key)
            .map(|entry| entry.records.len())
            .unwrap_or(0)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Drop keys whose expiry is strictly before `now`
    pub fn purge_expired(&self, now: u64) -> usize {
        let before = self.data.len();
        self.data.retain(|_, set| set.expires_at >= now);
        before - self.data.len()
    }
}

#[async_trait::async_trait]
impl WindowStore for MemoryStore {
    async fn record_attempt(
        &self,
        key: &str,
        record: &WindowRecord,
        window_secs: u64,
        max_requests: u32,
    ) -> Result<WindowSnapshot> {
        let now = record.score;
        let cutoff = now.saturating_sub(window_secs);
        let mut entry = self.data.entry(key.to_string()).or_default();
        let set = entry.value_mut();

        // a record scored exactly at the cutoff is still in the window
        if set.expires_at < now {
            set.records.clear();
        }
        set.records.retain(|(score, _)| *score >= cutoff);

        let provisional = (record.score, record.member.clone());
        set.records.insert(provisional.clone());
        set.expires_at = now + window_secs;

        let count = set.records.len() as u64;
        let admitted = count <= u64::from(max_requests);
        if !admitted {
            set.records.remove(&provisional);
        }

        Ok(WindowSnapshot {
            count,
            oldest: set.records.first().map(|(score, _)| *score),
            admitted,
        })
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let pattern = format!("{}:", prefix);
        let keys: Vec<String> = self
            .data
            .iter()
            .filter(|entry| entry.key().starts_with(&pattern))
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for key in keys {
            if self.data.remove(&key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
