//! Engine configuration loaded from environment variables.

use std::env;
use std::time::Duration;

/// Tunables shared by every collection store of a [`SyncContext`](crate::SyncContext).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Maximum number of backend calls in flight across all stores
    pub max_concurrent_requests: usize,
    /// Age after which loaded data is refetched on a non-forced fetch
    pub stale_after: Duration,
    /// Extra attempts for a fetch that failed with a transient error
    pub fetch_retries: u32,
    /// Fixed delay between fetch attempts
    pub retry_backoff: Duration,
    /// How long `success` stays visible before reverting to `idle`
    pub success_display: Duration,
    /// Transport timeout for HTTP backends
    pub request_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 4,
            stale_after: Duration::from_secs(60),
            fetch_retries: 3,
            retry_backoff: Duration::from_secs(1),
            success_display: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_concurrent_requests = match env::var("TETHER_MAX_CONCURRENT_REQUESTS") {
            Ok(raw) => match raw.parse::<usize>() {
                Ok(0) | Err(_) => {
                    return Err(ConfigError::Invalid {
                        name: "TETHER_MAX_CONCURRENT_REQUESTS",
                        value: raw,
                    })
                }
                Ok(n) => n,
            },
            Err(_) => defaults.max_concurrent_requests,
        };

        let fetch_retries = match env::var("TETHER_FETCH_RETRIES") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                name: "TETHER_FETCH_RETRIES",
                value: raw,
            })?,
            Err(_) => defaults.fetch_retries,
        };

        Ok(Self {
            max_concurrent_requests,
            stale_after: millis_var("TETHER_STALE_AFTER_MS", defaults.stale_after)?,
            fetch_retries,
            retry_backoff: millis_var("TETHER_RETRY_BACKOFF_MS", defaults.retry_backoff)?,
            success_display: millis_var("TETHER_SUCCESS_DISPLAY_MS", defaults.success_display)?,
            request_timeout: millis_var("TETHER_REQUEST_TIMEOUT_MS", defaults.request_timeout)?,
        })
    }
}

fn millis_var(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}
