//! Node configuration.
//!
//! [`DhtConfig`] is a read-only parameter object handed to the node at
//! construction. It is never reloaded at runtime.

use std::time::Duration;

use crate::constants::{
    DEFAULT_K, DEFAULT_MAX_CONCURRENCY, DEFAULT_OPERATION_TIMEOUT, DEFAULT_REFRESH_INTERVAL,
    DEFAULT_REPLACEMENT_CACHE_SIZE, DEFAULT_RESPONSE_TIMEOUT, DEFAULT_STALE_THRESHOLD,
};
use crate::error::DhtError;

/// Tuning parameters for a DHT node.
///
/// # Examples
///
/// ```
/// use kadnode::DhtConfig;
/// use std::time::Duration;
///
/// let config = DhtConfig::default()
///     .with_k(8)
///     .with_response_timeout(Duration::from_millis(500));
///
/// assert_eq!(config.k, 8);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct DhtConfig {
    /// Maximum contacts per bucket, and the size of lookup results.
    pub k: usize,
    /// Maximum spare contacts held per bucket.
    pub replacement_cache_size: usize,
    /// Staleness count above which a contact may be evicted.
    pub stale_threshold: u32,
    /// Deadline for a single request.
    pub response_timeout: Duration,
    /// Deadline for a whole lookup.
    pub operation_timeout: Duration,
    /// Period of the background refresh.
    pub refresh_interval: Duration,
    /// Requests a lookup keeps in flight at once.
    pub max_concurrency: usize,
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            replacement_cache_size: DEFAULT_REPLACEMENT_CACHE_SIZE,
            stale_threshold: DEFAULT_STALE_THRESHOLD,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

impl DhtConfig {
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_replacement_cache_size(mut self, size: usize) -> Self {
        self.replacement_cache_size = size;
        self
    }

    pub fn with_stale_threshold(mut self, threshold: u32) -> Self {
        self.stale_threshold = threshold;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_max_concurrency(mut self, concurrency: usize) -> Self {
        self.max_concurrency = concurrency;
        self
    }

    /// Rejects parameter combinations the algorithms cannot run with.
    pub fn validate(&self) -> Result<(), DhtError> {
        if self.k == 0 {
            return Err(DhtError::InvalidConfig("k must be at least 1".into()));
        }
        if self.max_concurrency == 0 {
            return Err(DhtError::InvalidConfig(
                "max_concurrency must be at least 1".into(),
            ));
        }
        if self.response_timeout.is_zero() || self.operation_timeout.is_zero() {
            return Err(DhtError::InvalidConfig("timeouts must be non-zero".into()));
        }
        if self.refresh_interval.is_zero() {
            return Err(DhtError::InvalidConfig(
                "refresh_interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
