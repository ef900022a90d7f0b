//! Protocol constants and tuning defaults.
//!
//! Defaults are deliberately small: a bucket of five contacts and short
//! timeouts keep lookups fast on small overlays. Production deployments
//! usually raise `DEFAULT_K` and the timeouts through [`DhtConfig`].
//!
//! [`DhtConfig`]: crate::DhtConfig

use std::time::Duration;

// ============================================================================
// Identifiers
// ============================================================================

/// Length of a node identifier or content key in bytes.
pub const ID_LENGTH: usize = 20;

/// Length of a node identifier in bits; also the number of routing buckets.
pub const ID_BITS: usize = ID_LENGTH * 8;

// ============================================================================
// Wire format
// ============================================================================

/// Hard ceiling for a single encoded datagram.
pub const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// Correlation id (4 bytes) plus type code (1 byte).
pub const DATAGRAM_HEADER_LEN: usize = 5;

// ============================================================================
// Routing table
// ============================================================================

/// Contacts per bucket.
pub const DEFAULT_K: usize = 5;

/// Spare sightings kept per bucket.
pub const DEFAULT_REPLACEMENT_CACHE_SIZE: usize = 3;

/// A contact becomes eligible for eviction once its staleness counter
/// exceeds this value.
pub const DEFAULT_STALE_THRESHOLD: u32 = 1;

// ============================================================================
// Timeouts and intervals
// ============================================================================

/// How long a single request waits for its reply.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Upper bound for a whole lookup, however many requests time out inside it.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_millis(2000);

/// Period of the bucket and content refresh.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

// ============================================================================
// Concurrency and retries
// ============================================================================

/// Requests a single lookup keeps in flight.
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

/// Connect attempts made against a bootstrap peer before giving up.
pub const MAX_CONNECT_ATTEMPTS: usize = 5;

/// Lookups a bucket refresh runs side by side.
pub const REFRESH_LOOKUP_CONCURRENCY: usize = 8;
