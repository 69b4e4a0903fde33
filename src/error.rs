//! Error types for the index and its configuration.

use thiserror::Error;

/// Errors returned by index operations and configuration validation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexError {
    /// A write exhausted its CAS retry budget under sustained contention.
    #[error("CAS retry cap ({retries}) exhausted for page {page_id}")]
    CapacityExceeded {
        /// Logical page id the write targeted.
        page_id: u64,
        /// Configured retry cap that was hit.
        retries: u32,
    },

    /// The targeted page id's slot is unmapped (stores 0).
    #[error("page {page_id} is unmapped")]
    SlotUnmapped {
        /// Logical page id with no live chain.
        page_id: u64,
    },

    /// The chain walk reached a Split or Merge delta, which this single-node
    /// core cannot apply as a data delta (see design notes on tree-structural
    /// deltas).
    #[error("page {page_id} needs tree-structural handling (split/merge delta encountered)")]
    NeedsTreeStructuralHandling {
        /// Logical page id whose chain contains a structural delta.
        page_id: u64,
    },

    /// A page id fell outside `[0, page_table_capacity)`.
    #[error("page id {page_id} out of range for table of capacity {capacity}")]
    PageIdOutOfRange {
        /// The offending page id.
        page_id: u64,
        /// The table's fixed capacity.
        capacity: u64,
    },

    /// `Config::validate` rejected the configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Human-readable reason the configuration was rejected.
        reason: &'static str,
    },
}

/// Convenience result alias for fallible index operations.
pub type IndexResult<T> = Result<T, IndexError>;
