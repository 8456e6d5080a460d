//! Settings loaded from `config/default`, `config/local` and `RATE_LIMIT__*` env vars.

use crate::sentinel::{DiscoveryMode, MasterEndpoint};
use crate::{LOGIN_ENDPOINT, RateLimitError, Result, Window};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Which store the limiter talks to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Redis behind a sentinel quorum (production)
    #[default]
    Sentinel,
    /// Process-local ordered sets (development, single instance)
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct WindowConfig {
    pub window_seconds: u64,
    pub max_requests: u32,
}

impl WindowConfig {
    pub fn to_window(self) -> Result<Window> {
        Window::new(self.window_seconds, self.max_requests)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub default_window_seconds: u64,
    pub default_max_requests: u32,
    /// Namespace every rate limit key lives under
    pub key_prefix: String,
    /// Per-endpoint overrides, keyed by endpoint tag
    pub endpoints: HashMap<String, WindowConfig>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let mut endpoints = HashMap::new();
        endpoints.insert(
            LOGIN_ENDPOINT.to_string(),
            WindowConfig {
                window_seconds: 300,
                max_requests: 5,
            },
        );
        Self {
            default_window_seconds: 60,
            default_max_requests: 100,
            key_prefix: "rate_limit".to_string(),
            endpoints,
        }
    }
}

impl LimitsConfig {
    /// Every configured window must be usable; zero windows or limits are fatal
    pub fn validate(&self) -> Result<()> {
        Window::new(self.default_window_seconds, self.default_max_requests)
            .map_err(|e| RateLimitError::Configuration(format!("default limits: {}", e)))?;

        for (endpoint, window) in &self.endpoints {
            window.to_window().map_err(|e| {
                RateLimitError::Configuration(format!("endpoint '{}': {}", endpoint, e))
            })?;
        }

        if self.key_prefix.is_empty() {
            return Err(RateLimitError::Configuration(
                "limits.key_prefix must not be empty".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub password: Option<String>,
    pub db: i64,
    /// Budget for one store round trip before it counts as a fault
    pub operation_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sentinel,
            password: None,
            db: 0,
            operation_timeout_ms: 200,
        }
    }
}

impl StoreConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    pub master_name: String,
    /// Quorum members as host:port
    pub addresses: Vec<String>,
    pub password: Option<String>,
    /// Per-member budget for a discovery query
    pub discovery_timeout_ms: u64,
    pub discovery: DiscoveryMode,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            master_name: "mymaster".to_string(),
            addresses: vec![
                "127.0.0.1:26379".to_string(),
                "127.0.0.1:26380".to_string(),
                "127.0.0.1:26381".to_string(),
            ],
            password: None,
            discovery_timeout_ms: 1000,
            discovery: DiscoveryMode::Safe,
        }
    }
}

impl SentinelConfig {
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn endpoints(&self) -> Result<Vec<MasterEndpoint>> {
        self.addresses.iter().map(|a| a.parse()).collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Consecutive faults before the store is skipped; 0 disables the breaker
    pub breaker_failure_threshold: u32,
    pub breaker_cooldown_ms: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            breaker_failure_threshold: 0,
            breaker_cooldown_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub limits: LimitsConfig,
    pub store: StoreConfig,
    pub sentinel: SentinelConfig,
    pub policy: PolicyConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

impl Settings {
    /// Load from files and environment, then validate
    pub fn load() -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("RATE_LIMIT")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("sentinel.addresses")
                    .try_parsing(true),
            );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.limits.validate()?;

        if self.store.operation_timeout_ms == 0 {
            return Err(RateLimitError::Configuration(
                "store.operation_timeout_ms must be greater than 0".into(),
            ));
        }

        if self.store.backend == StoreBackend::Sentinel {
            if self.sentinel.master_name.is_empty() {
                return Err(RateLimitError::Configuration(
                    "sentinel.master_name must not be empty".into(),
                ));
            }
            if self.sentinel.addresses.is_empty() {
                return Err(RateLimitError::Configuration(
                    "sentinel.addresses must list at least one quorum member".into(),
                ));
            }
            self.sentinel.endpoints()?;
            if self.sentinel.discovery_timeout_ms == 0 {
                return Err(RateLimitError::Configuration(
                    "sentinel.discovery_timeout_ms must be greater than 0".into(),
                ));
            }
        }

        Ok(())
    }
}
