//! # Strata
//!
//! An embedded, single-process storage engine built from three layers:
//! - A memory-mapped block store with a persistent free list
//! - A byte-granular "varchar" allocator for variable-length values
//! - A disk-resident B+Tree multi-map with fixed-size keys and duplicates
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          BpTree                              │
//! │     add / find / range / iter / backward / remove / verify   │
//! └──────────────┬──────────────────────────────┬───────────────┘
//!                │ nodes, big-value chains      │ mid-sized values
//!                │                              ▼
//!                │                     ┌─────────────────┐
//!                │                     │  VarcharStore   │
//!                │                     │ (runs + free    │
//!                │                     │  list, coalesce)│
//!                │                     └────────┬────────┘
//!                ▼                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        BlockStore                            │
//! │   control block 0 │ block free list │ scoped borrows │ mmap  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything runs on one thread. Access to mapped bytes goes through
//! scoped borrows that must end before the file can grow; growth with a
//! borrow outstanding fails with `ResourceBusy`.

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod block;
pub mod varchar;
pub mod btree;

mod codec;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, StrataError};
pub use config::Config;
pub use block::BlockStore;
pub use varchar::VarcharStore;
pub use btree::BpTree;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of Strata
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
