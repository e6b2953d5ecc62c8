//! Varchar Module
//!
//! A byte-granular allocator for variable-length runs, carved out of blocks
//! obtained from the block store.
//!
//! ## Responsibilities
//! - First-fit allocation over an address-ordered free list
//! - Splitting oversized free records and coalescing neighbours on free
//! - Growing the backing store when nothing fits
//! - Scoped access to a run's payload, including runs that straddle blocks
//!
//! ## Record Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Control (start of its own block, 16 bytes)              │
//! │   Tag: 0x10 | Pad (3) | FreeLen: u32 | FreeHead: u64    │
//! ├─────────────────────────────────────────────────────────┤
//! │ Run (16-byte header)                                    │
//! │   Tag: 0x40 | Pad (3) | Length: u32 | Extra: u32        │
//! │   Refs: u32 | [Length payload bytes][Extra slack]       │
//! ├─────────────────────────────────────────────────────────┤
//! │ Free (24 bytes, Length counts the whole record)         │
//! │   Tag: 0x20 | Pad (3) | Length: u32                     │
//! │   PrevFree: u64 | NextFree: u64                         │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Offsets are byte offsets into the store. Every record is at least
//! `MIN_RECORD_SIZE` bytes so any run can turn back into a free record.

mod record;
mod store;

pub use record::RunHeader;
pub use store::VarcharStore;

// =============================================================================
// Shared Constants
// =============================================================================

/// Control record size: Tag (1) + Pad (3) + FreeLen (4) + FreeHead (8)
pub(crate) const CTRL_SIZE: usize = 16;

/// Run header size: Tag (1) + Pad (3) + Length (4) + Extra (4) + Refs (4)
pub(crate) const RUN_HEADER_SIZE: usize = 16;

/// Free record size: Tag (1) + Pad (3) + Length (4) + Prev (8) + Next (8)
pub(crate) const FREE_RECORD_SIZE: usize = 24;

/// Smallest record ever laid down
pub(crate) const MIN_RECORD_SIZE: usize = FREE_RECORD_SIZE;

/// Longest payload a single run can carry
pub const MAX_RUN_LEN: usize = 0x7fff_ffff - RUN_HEADER_SIZE;

/// Bytes a run of `len` payload bytes occupies
pub(crate) fn record_size(len: usize) -> usize {
    (len + RUN_HEADER_SIZE).max(MIN_RECORD_SIZE)
}
