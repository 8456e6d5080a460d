use super::{MasterEndpoint, SentinelClient};
use crate::{RateLimitError, Result};
use redis::aio::MultiplexedConnection;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Talks to one sentinel process over a cached connection
pub struct RedisSentinelClient {
    address: String,
    client: redis::Client,
    connect_timeout: Duration,
    connection: Mutex<Option<MultiplexedConnection>>,
}

impl RedisSentinelClient {
    /// address: "10.0.0.1:26379"
    pub fn new(address: &str, password: Option<&str>, connect_timeout: Duration) -> Result<Self> {
        let url = match password {
            Some(password) => format!("redis://:{}@{}", password, address),
            None => format!("redis://{}", address),
        };
        let client = redis::Client::open(url)?;
        Ok(Self {
            address: address.to_string(),
            client,
            connect_timeout,
            connection: Mutex::new(None),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        let mut cached = self.connection.lock().await;
        if let Some(conn) = cached.as_ref() {
            return Ok(conn.clone());
        }

        let conn = tokio::time::timeout(
            self.connect_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| {
            RateLimitError::StoreUnavailable(format!(
                "sentinel {} did not accept a connection within {:?}",
                self.address, self.connect_timeout
            ))
        })??;

        *cached = Some(conn.clone());
        Ok(conn)
    }

    async fn reset(&self) {
        *self.connection.lock().await = None;
    }
}

#[async_trait::async_trait]
impl SentinelClient for RedisSentinelClient {
    fn address(&self) -> &str {
        &self.address
    }

    async fn ask_master(&self, master_name: &str) -> Result<MasterEndpoint> {
        let mut conn = self.connection().await?;

        let reply = redis::cmd("SENTINEL")
            .arg("get-master-addr-by-name")
            .arg(master_name)
            .query_async::<Option<(String, u16)>>(&mut conn)
            .await;

        match reply {
            Ok(Some((host, port))) => {
                let endpoint = MasterEndpoint::new(host, port);
                debug!(sentinel = %self.address, master = %endpoint, "Sentinel answered");
                Ok(endpoint)
            }
            Ok(None) => Err(RateLimitError::no_master(
                master_name,
                format!("sentinel {} does not know this master", self.address),
            )),
            Err(e) => {
                self.reset().await;
                Err(e.into())
            }
        }
    }
}
