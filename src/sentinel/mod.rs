//! Master discovery through a quorum of sentinels.
//!
//! Callers never hold on to a `MasterEndpoint` beyond one logical operation;
//! a failover is only ever observed as a different answer on a later call.

pub mod client;
pub mod locator;

pub use client::RedisSentinelClient;
pub use locator::MasterLocator;

use crate::{RateLimitError, Result};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Writable store address as reported by the quorum
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MasterEndpoint {
    pub host: String,
    pub port: u16,
}

impl MasterEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for MasterEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for MasterEndpoint {
    type Err = RateLimitError;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s.trim().rsplit_once(':').ok_or_else(|| {
            RateLimitError::Configuration(format!("address '{}' is not host:port", s))
        })?;
        if host.is_empty() {
            return Err(RateLimitError::Configuration(format!(
                "address '{}' has an empty host",
                s
            )));
        }
        let port = port.parse::<u16>().map_err(|e| {
            RateLimitError::Configuration(format!("address '{}' has a bad port: {}", s, e))
        })?;
        Ok(Self::new(host, port))
    }
}

/// How many quorum members must be consulted before a master is trusted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMode {
    /// Fan out to every member and require a majority to agree
    #[default]
    Safe,
    /// First member that answers wins
    Fast,
}

//One independently addressable quorum member
#[async_trait::async_trait]
pub trait SentinelClient: Send + Sync {
    fn address(&self) -> &str;

    /// ASK-MASTER: which node does this member currently consider master
    async fn ask_master(&self, master_name: &str) -> Result<MasterEndpoint>;
}
