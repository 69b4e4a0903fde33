//! # bwtree-core
//!
//! A latch-free, in-memory ordered key-value index modeled on the Bw-Tree
//! family: updates to a logical node are immutable *delta records*
//! compare-and-swapped onto an atomic head pointer held in a *page table*.
//! A *consolidation* step periodically collapses a chain into a compact
//! *base node*; *epoch-based reclamation* provides memory safety for
//! readers walking a chain without locks; *exponential backoff with
//! jitter* moderates CAS retry under contention; lookups within a
//! consolidated node use a SIMD-accelerated ordered search.
//!
//! ## Module organization
//!
//! ### Core engine
//! - [`page_table`] — fixed-capacity array of atomic chain-head pointers
//! - [`delta`] — the tagged delta-chain data model and traversal
//! - [`node`] — sorted base nodes terminating a chain
//! - [`consolidate`] — collapsing a chain into a fresh base node
//! - [`search`] — scalar and SIMD-accelerated ordered search
//! - [`index`] — the public façade binding the above together
//!
//! ### Concurrency & reclamation
//! - [`pr`] — atomic primitives and memory barriers
//! - [`backoff`] — exponential backoff with jitter for contention management
//! - [`epoch`] — epoch-based safe memory reclamation
//! - [`hazard`] — an alternate, non-epoch reclamation scheme (standalone)
//!
//! ### Ambient
//! - [`config`] — tunables for an [`index::Index`] instance
//! - [`error`] — the crate's error type

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Atomic primitives and memory barriers.
pub mod pr;

/// Exponential backoff with jitter for contention management.
pub mod backoff;

/// Epoch-based safe memory reclamation.
pub mod epoch;

/// Hazard pointer memory reclamation (alternate reclamation scheme).
pub mod hazard;

/// Tunables for the index, its backoff controller, and its epoch manager.
pub mod config;

/// The crate's error type.
pub mod error;

/// Sorted base nodes terminating a delta chain.
pub mod node;

/// The tagged delta-chain data model and traversal.
pub mod delta;

/// The page table: atomic chain-head pointers indexed by logical page id.
pub mod page_table;

/// Scalar and SIMD-accelerated ordered search.
pub mod search;

/// Consolidation: collapsing a delta chain into a fresh base node.
pub mod consolidate;

/// The index façade binding the engine together.
pub mod index;

pub use config::Config;
pub use error::{IndexError, IndexResult};
pub use index::Index;
