use super::{NodeConnector, WindowRecord, WindowSnapshot, WindowStore};
use crate::sentinel::MasterEndpoint;
use crate::{RateLimitError, Result};
use redis::aio::MultiplexedConnection;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const SCAN_BATCH: usize = 500;

// KEYS[1] set; ARGV: cutoff, score, member, ttl, max_requests.
// Returns {count after insert, oldest score or nil, 1 if admitted}.
const RECORD_ATTEMPT: &str = r#"
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', '(' .. ARGV[1])
redis.call('ZADD', KEYS[1], ARGV[2], ARGV[3])
redis.call('EXPIRE', KEYS[1], ARGV[4])
local count = redis.call('ZCARD', KEYS[1])
local admitted = 1
if count > tonumber(ARGV[5]) then
    redis.call('ZREM', KEYS[1], ARGV[3])
    admitted = 0
end
local oldest = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
return {count, oldest[2] or false, admitted}
"#;

/// Redis-backed ordered sets on one concrete node
#[derive(Clone)]
pub struct RedisNode {
    endpoint: MasterEndpoint,
    connection: MultiplexedConnection,
    script: Arc<redis::Script>,
}

#[async_trait::async_trait]
impl WindowStore for RedisNode {
    async fn record_attempt(
        &self,
        key: &str,
        record: &WindowRecord,
        window_secs: u64,
        max_requests: u32,
    ) -> Result<WindowSnapshot> {
        let mut conn = self.connection.clone();
        let cutoff = record.score.saturating_sub(window_secs);

        // one script run, so no other check on the key interleaves and a
        // rejected attempt never outlives the call
        let (count, oldest, admitted): (u64, Option<u64>, u8) = self
            .script
            .key(key)
            .arg(cutoff)
            .arg(record.score)
            .arg(&record.member)
            // the cutoff second is still inside the window
            .arg(window_secs + 1)
            .arg(max_requests)
            .invoke_async(&mut conn)
            .await?;

        Ok(WindowSnapshot {
            count,
            oldest,
            admitted: admitted == 1,
        })
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let mut conn = self.connection.clone();
        let pattern = format!("{}:*", prefix);
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                removed += redis::cmd("DEL")
                    .arg(&keys)
                    .query_async::<u64>(&mut conn)
                    .await?;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(endpoint = %self.endpoint, pattern = %pattern, removed, "Deleted rate limit keys");
        Ok(removed)
    }
}

/// Opens `RedisNode`s against whatever endpoint the locator resolved
#[derive(Debug, Clone)]
pub struct RedisConnector {
    password: Option<String>,
    db: i64,
    connect_timeout: Duration,
}

impl RedisConnector {
    pub fn new(password: Option<String>, db: i64, connect_timeout: Duration) -> Self {
        Self {
            password,
            db,
            connect_timeout,
        }
    }

    fn url_for(&self, endpoint: &MasterEndpoint) -> String {
        match &self.password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, endpoint.host, endpoint.port, self.db
            ),
            None => format!("redis://{}:{}/{}", endpoint.host, endpoint.port, self.db),
        }
    }
}

#[async_trait::async_trait]
impl NodeConnector for RedisConnector {
    type Node = RedisNode;

    async fn connect(&self, endpoint: &MasterEndpoint) -> Result<RedisNode> {
        let client = redis::Client::open(self.url_for(endpoint))?;
        let connection = tokio::time::timeout(
            self.connect_timeout,
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| {
            RateLimitError::StoreUnavailable(format!(
                "connecting to {} timed out after {:?}",
                endpoint, self.connect_timeout
            ))
        })??;

        debug!(endpoint = %endpoint, "Connected to store node");
        Ok(RedisNode {
            endpoint: endpoint.clone(),
            connection,
            script: Arc::new(redis::Script::new(RECORD_ATTEMPT)),
        })
    }
}
