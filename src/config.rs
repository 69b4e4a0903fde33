//! Tunables for the index, its backoff controller, and its epoch manager.

use crate::error::{IndexError, IndexResult};

/// Configuration for an [`crate::index::Index`] instance.
///
/// Constructed programmatically (there is no on-disk or env-var config
/// surface here — this is a library, not a service); `Config::default()`
/// matches the defaults documented alongside each field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Number of logical page id slots in the page table.
    pub page_table_capacity: u64,
    /// Chain length beyond which a write requests consolidation.
    pub max_delta_chain_length: usize,
    /// Write retry cap before a CAS loop gives up.
    pub cas_max_retries: u32,
    /// Minimum backoff delay.
    pub backoff_min_ns: u64,
    /// Maximum backoff delay.
    pub backoff_max_ns: u64,
    /// Number of deferred frees queued before an EBR auto-collect attempt.
    pub garbage_batch_size: usize,
    /// Tight-CAS attempts before the spin-then-backoff composite falls
    /// back to exponential backoff.
    pub consolidation_spin_limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_table_capacity: 1024,
            max_delta_chain_length: 10,
            cas_max_retries: 100,
            backoff_min_ns: 1,
            backoff_max_ns: 1_000_000,
            garbage_batch_size: 64,
            consolidation_spin_limit: 10,
        }
    }
}

impl Config {
    /// Start from the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the page table capacity.
    #[must_use]
    pub fn with_page_table_capacity(mut self, capacity: u64) -> Self {
        self.page_table_capacity = capacity;
        self
    }

    /// Set the consolidation threshold.
    #[must_use]
    pub fn with_max_delta_chain_length(mut self, len: usize) -> Self {
        self.max_delta_chain_length = len;
        self
    }

    /// Set the CAS retry cap.
    #[must_use]
    pub fn with_cas_max_retries(mut self, retries: u32) -> Self {
        self.cas_max_retries = retries;
        self
    }

    /// Set the backoff bounds.
    #[must_use]
    pub fn with_backoff_bounds(mut self, min_ns: u64, max_ns: u64) -> Self {
        self.backoff_min_ns = min_ns;
        self.backoff_max_ns = max_ns;
        self
    }

    /// Set the EBR auto-collect batch threshold.
    #[must_use]
    pub fn with_garbage_batch_size(mut self, size: usize) -> Self {
        self.garbage_batch_size = size;
        self
    }

    /// Set the spin-then-backoff tight-retry limit.
    #[must_use]
    pub fn with_consolidation_spin_limit(mut self, limit: u32) -> Self {
        self.consolidation_spin_limit = limit;
        self
    }

    /// Reject configurations that can't be acted on.
    pub fn validate(&self) -> IndexResult<()> {
        if self.page_table_capacity == 0 {
            return Err(IndexError::InvalidConfig {
                reason: "page_table_capacity must be nonzero",
            });
        }
        if self.backoff_min_ns > self.backoff_max_ns {
            return Err(IndexError::InvalidConfig {
                reason: "backoff_min_ns must not exceed backoff_max_ns",
            });
        }
        if self.max_delta_chain_length == 0 {
            return Err(IndexError::InvalidConfig {
                reason: "max_delta_chain_length must be nonzero",
            });
        }
        if self.garbage_batch_size == 0 {
            return Err(IndexError::InvalidConfig {
                reason: "garbage_batch_size must be nonzero",
            });
        }
        Ok(())
    }
}
