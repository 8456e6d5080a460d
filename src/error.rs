#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    //store could not be reached (timeout, refused, auth, dropped connection)
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
    //no quorum agreement on the current master
    #[error("No master found for '{master_name}': {reason}")]
    NoMasterFound { master_name: String, reason: String },
    //write landed on a demoted replica because the cached master was stale
    #[error("Write rejected by read-only replica: {0}")]
    ReadOnly(String),
    //config error, fatal at startup
    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl RateLimitError {
    pub fn no_master(master_name: &str, reason: impl Into<String>) -> Self {
        Self::NoMasterFound {
            master_name: master_name.to_string(),
            reason: reason.into(),
        }
    }

    /// Faults the fail-open layer absorbs. Configuration errors are not among them.
    pub fn is_store_fault(&self) -> bool {
        !matches!(self, Self::Configuration(_))
    }

    /// Short label used for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::NoMasterFound { .. } => "no_master_found",
            Self::ReadOnly(_) => "read_only",
            Self::Configuration(_) => "configuration",
        }
    }
}

impl From<redis::RedisError> for RateLimitError {
    fn from(err: redis::RedisError) -> Self {
        match err.kind() {
            redis::ErrorKind::ReadOnly => Self::ReadOnly(err.to_string()),
            _ => Self::StoreUnavailable(err.to_string()),
        }
    }
}

impl From<config::ConfigError> for RateLimitError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

// result type alias for convenience
pub type Result<T> = std::result::Result<T, RateLimitError>;
