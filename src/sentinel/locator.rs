use super::{DiscoveryMode, MasterEndpoint, SentinelClient};
use crate::{RateLimitError, Result};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Resolves the current writable endpoint for a named master
pub struct MasterLocator {
    master_name: String,
    members: Vec<Arc<dyn SentinelClient>>,
    member_timeout: Duration,
    mode: DiscoveryMode,
}

impl MasterLocator {
    pub fn new(
        master_name: impl Into<String>,
        members: Vec<Arc<dyn SentinelClient>>,
        member_timeout: Duration,
        mode: DiscoveryMode,
    ) -> Self {
        Self {
            master_name: master_name.into(),
            members,
            member_timeout,
            mode,
        }
    }

    pub fn master_name(&self) -> &str {
        &self.master_name
    }

    /// Votes needed in safe mode: a strict majority of configured members
    pub fn quorum(&self) -> usize {
        self.members.len() / 2 + 1
    }

    /// Discover using the configured mode
    pub async fn discover_master(&self) -> Result<MasterEndpoint> {
        match self.mode {
            DiscoveryMode::Safe => self.discover_master_safe().await,
            DiscoveryMode::Fast => self.discover_master_fast().await,
        }
    }

    /// Ask members one at a time and trust the first answer
    pub async fn discover_master_fast(&self) -> Result<MasterEndpoint> {
        let mut last_error = None;
        for member in &self.members {
            match self.ask(member.as_ref()).await {
                Ok(endpoint) => return Ok(endpoint),
                Err(e) => {
                    debug!(sentinel = %member.address(), error = %e, "Sentinel gave no answer");
                    last_error = Some(e);
                }
            }
        }

        Err(RateLimitError::no_master(
            &self.master_name,
            match last_error {
                Some(e) => format!("no sentinel answered, last error: {}", e),
                None => "no sentinels configured".to_string(),
            },
        ))
    }

    /// Ask every member concurrently and require `quorum()` identical answers.
    /// A partitioned minority can never move the result on its own.
    pub async fn discover_master_safe(&self) -> Result<MasterEndpoint> {
        let answers = join_all(self.members.iter().map(|m| self.ask(m.as_ref()))).await;

        let mut votes: HashMap<MasterEndpoint, usize> = HashMap::new();
        let mut failures = 0;
        for (member, answer) in self.members.iter().zip(answers) {
            match answer {
                Ok(endpoint) => *votes.entry(endpoint).or_insert(0) += 1,
                Err(e) => {
                    failures += 1;
                    debug!(sentinel = %member.address(), error = %e, "Sentinel gave no vote");
                }
            }
        }

        let quorum = self.quorum();
        let winner = votes
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(endpoint, count)| (endpoint.clone(), *count));

        match winner {
            Some((endpoint, count)) if count >= quorum => {
                if votes.len() > 1 {
                    warn!(
                        master_name = %self.master_name,
                        master = %endpoint,
                        disagreeing = votes.len() - 1,
                        "Sentinels disagree, going with the majority"
                    );
                }
                Ok(endpoint)
            }
            _ => Err(RateLimitError::no_master(
                &self.master_name,
                format!(
                    "no majority: {} of {} sentinels needed, {} answered in {} distinct ways, {} failed",
                    quorum,
                    self.members.len(),
                    self.members.len() - failures,
                    votes.len(),
                    failures
                ),
            )),
        }
    }

    async fn ask(&self, member: &dyn SentinelClient) -> Result<MasterEndpoint> {
        tokio::time::timeout(self.member_timeout, member.ask_master(&self.master_name))
            .await
            .map_err(|_| {
                RateLimitError::StoreUnavailable(format!(
                    "sentinel {} timed out after {:?}",
                    member.address(),
                    self.member_timeout
                ))
            })?
    }
}
