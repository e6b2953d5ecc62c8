//! Block Store Module
//!
//! A memory-mapped file (or anonymous mapping) carved into fixed-size blocks.
//!
//! ## Responsibilities
//! - Hand out zeroed blocks, reusing freed ones before growing the file
//! - Keep a small control block with free-list state and user control data
//! - Give scoped byte access to runs of blocks, refusing to remap while any
//!   access is outstanding
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Block 0: Control Block (24-byte header)                 │
//! │   Checksum: u32 | BlockSize: u32 | FreeLen: u32         │
//! │   Magic: "STRB" (4) | FreeHead: u64                     │
//! │   User control data (BlockSize - 24 bytes)              │
//! ├─────────────────────────────────────────────────────────┤
//! │ Block 1..N                                              │
//! │   In use: owned by a caller, any content                │
//! │   Free:   [NextFree: u64][Stamp: u64][...]  (LIFO)      │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! The checksum is a CRC32 over bytes `4..BlockSize` of block 0. Offsets are
//! byte offsets from the start of the file and always block aligned.

mod control;
mod guard;
mod store;

pub use control::ControlHeader;
pub use guard::{BlockMut, BlockRef};
pub use store::BlockStore;

// =============================================================================
// Block Tags
// =============================================================================

/// Leading tag byte of every typed block or record built on the store.
///
/// Tags from different layers never share a value, so a stray pointer into
/// the wrong kind of record is recognisable.
pub(crate) mod tag {
    pub const INTERNAL: u8 = 0x01;
    pub const LEAF: u8 = 0x02;
    pub const BIG_LEAF: u8 = 0x04;
    pub const BIG_CHAIN: u8 = 0x08;
    pub const VARCHAR_CTRL: u8 = 0x10;
    pub const VARCHAR_FREE: u8 = 0x20;
    pub const VARCHAR_RUN: u8 = 0x40;
}
