pub mod algorithms;
pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod policy;
pub mod sentinel;
pub mod service;
pub mod storage;

use std::fmt;

pub use error::{RateLimitError, Result};

/// Endpoint tag used for failed-login counters
pub const LOGIN_ENDPOINT: &str = "login";

//window configuration for a single check
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    //length of the trailing window in seconds
    pub window_seconds: u64,
    //max requests admitted inside the window
    pub max_requests: u32,
}

impl Window {
    pub fn new(window_seconds: u64, max_requests: u32) -> Result<Self> {
        if window_seconds == 0 {
            return Err(RateLimitError::Configuration(
                "window_seconds must be greater than 0".into(),
            ));
        }
        if max_requests == 0 {
            return Err(RateLimitError::Configuration(
                "max_requests must be greater than 0".into(),
            ));
        }
        Ok(Self {
            window_seconds,
            max_requests,
        })
    }
}

/// Identity plus optional endpoint tag. Each distinct key owns one ordered set in the store.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub identity: String,
    pub endpoint: Option<String>,
}

impl RateLimitKey {
    pub fn new(identity: impl Into<String>, endpoint: Option<&str>) -> Self {
        Self {
            identity: identity.into(),
            endpoint: endpoint.map(str::to_string),
        }
    }

    pub fn global(identity: impl Into<String>) -> Self {
        Self::new(identity, None)
    }

    pub fn login(identity: impl Into<String>) -> Self {
        Self::new(identity, Some(LOGIN_ENDPOINT))
    }

    /// `{prefix}:{identity}` or `{prefix}:{identity}:{endpoint}`
    pub fn storage_key(&self, prefix: &str) -> String {
        match &self.endpoint {
            Some(endpoint) => format!("{}:{}:{}", prefix, self.identity, endpoint),
            None => format!("{}:{}", prefix, self.identity),
        }
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.endpoint {
            Some(endpoint) => write!(f, "{}@{}", self.identity, endpoint),
            None => write!(f, "{}", self.identity),
        }
    }
}

/// Result of a rate limit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    // whether the request may proceed
    pub allowed: bool,
    // max requests in the window
    pub limit: u32,
    // remaining requests in the window, None when the limiter was degraded
    pub remaining: Option<u32>,
    // seconds until the oldest record leaves the window, None when degraded
    pub reset_seconds: Option<u64>,
    // seconds to wait before retrying, 0 when allowed
    pub retry_after_seconds: u64,
    // allowed only because the store could not be consulted
    pub degraded: bool,
}

impl Decision {
    pub fn admitted(limit: u32, remaining: u32, reset_seconds: u64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: Some(remaining),
            reset_seconds: Some(reset_seconds),
            retry_after_seconds: 0,
            degraded: false,
        }
    }

    pub fn rejected(limit: u32, reset_seconds: u64, retry_after_seconds: u64) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: Some(0),
            reset_seconds: Some(reset_seconds),
            retry_after_seconds,
            degraded: false,
        }
    }

    pub fn failed_open(limit: u32) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: None,
            reset_seconds: None,
            retry_after_seconds: 0,
            degraded: true,
        }
    }

    /// Label for logs and metrics
    pub fn outcome(&self) -> &'static str {
        match (self.allowed, self.degraded) {
            (_, true) => "failed_open",
            (true, false) => "allowed",
            (false, false) => "rejected",
        }
    }
}

//Core trait: an infallible check that always yields a decision
#[async_trait::async_trait]
pub trait RateLimiter: Send + Sync {
    async fn check(&self, key: &RateLimitKey, window: Window) -> Decision;
}

pub use algorithms::SlidingWindowLimiter;
pub use clock::{Clock, ManualClock, SystemClock};
pub use policy::{FailOpenLimiter, LimiterHealth};
pub use service::RateLimiterService;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key_layout() {
        assert_eq!(
            RateLimitKey::global("10.0.0.1").storage_key("rate_limit"),
            "rate_limit:10.0.0.1"
        );
        assert_eq!(
            RateLimitKey::new("10.0.0.1", Some("/api/data")).storage_key("rate_limit"),
            "rate_limit:10.0.0.1:/api/data"
        );
        assert_eq!(
            RateLimitKey::login("alice").storage_key("rate_limit"),
            "rate_limit:alice:login"
        );
    }

    #[test]
    fn test_window_rejects_zero_values() {
        assert!(Window::new(0, 10).is_err());
        assert!(Window::new(60, 0).is_err());
        assert_eq!(
            Window::new(60, 10).unwrap(),
            Window {
                window_seconds: 60,
                max_requests: 10
            }
        );
    }

    #[test]
    fn test_decision_outcomes() {
        assert_eq!(Decision::admitted(10, 9, 60).outcome(), "allowed");
        assert_eq!(Decision::rejected(10, 30, 30).outcome(), "rejected");
        let degraded = Decision::failed_open(10);
        assert_eq!(degraded.outcome(), "failed_open");
        assert!(degraded.allowed);
        assert_eq!(degraded.remaining, None);
    }
}
