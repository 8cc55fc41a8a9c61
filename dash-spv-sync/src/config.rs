//! Configuration for the sync engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Number of false positives a peer may produce before its filter is refreshed.
pub const DEFAULT_FALSE_POSITIVE_THRESHOLD: u32 = 7;

/// Age after which an unconfirmed transaction is given up on.
pub const DEFAULT_MAX_UNCONFIRMED_AGE: Duration = Duration::from_secs(60 * 60 * 24 * 7);

/// Maximum number of outstanding filtered block requests tracked for the download peer.
pub const DEFAULT_EXPECTATION_QUEUE_CAPACITY: usize = 500;

/// Configuration for the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// A peer's filter is refreshed once its false positive count exceeds this value.
    pub false_positive_threshold: u32,

    /// Unconfirmed transactions older than this are marked dead once caught up.
    pub max_unconfirmed_age: Duration,

    /// Capacity of the block expectation queue. Pushing into a full queue
    /// waits until the merkle block ingester consumes an entry.
    pub expectation_queue_capacity: usize,

    /// Lifetime of entries in the pending transaction height index.
    ///
    /// `None` keeps every entry for the lifetime of the engine, so a transaction
    /// relayed again long after its block still gets its recorded height.
    /// `Some(ttl)` evicts entries first observed more than `ttl` ago during
    /// each staleness sweep.
    pub pending_index_ttl: Option<Duration>,

    /// Re-announce pending transactions to every peer when sync completes.
    pub rebroadcast_on_sync_complete: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            false_positive_threshold: DEFAULT_FALSE_POSITIVE_THRESHOLD,
            max_unconfirmed_age: DEFAULT_MAX_UNCONFIRMED_AGE,
            expectation_queue_capacity: DEFAULT_EXPECTATION_QUEUE_CAPACITY,
            pending_index_ttl: None,
            rebroadcast_on_sync_complete: true,
        }
    }
}

impl SyncConfig {
    /// Set the false positive threshold.
    pub fn with_false_positive_threshold(mut self, threshold: u32) -> Self {
        self.false_positive_threshold = threshold;
        self
    }

    /// Set the staleness threshold for unconfirmed transactions.
    pub fn with_max_unconfirmed_age(mut self, age: Duration) -> Self {
        self.max_unconfirmed_age = age;
        self
    }

    /// Set the block expectation queue capacity.
    pub fn with_expectation_queue_capacity(mut self, capacity: usize) -> Self {
        self.expectation_queue_capacity = capacity;
        self
    }

    /// Evict pending height index entries older than `ttl`.
    pub fn with_pending_index_ttl(mut self, ttl: Duration) -> Self {
        self.pending_index_ttl = Some(ttl);
        self
    }

    /// Disable the rebroadcast that follows sync completion.
    pub fn without_rebroadcast_on_sync_complete(mut self) -> Self {
        self.rebroadcast_on_sync_complete = false;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.expectation_queue_capacity == 0 {
            return Err("expectation_queue_capacity must be > 0".to_string());
        }

        if self.max_unconfirmed_age.is_zero() {
            return Err("max_unconfirmed_age must be > 0".to_string());
        }

        if let Some(ttl) = self.pending_index_ttl {
            if ttl.is_zero() {
                return Err("pending_index_ttl must be > 0 when set".to_string());
            }
        }

        Ok(())
    }
}
