//! B+Tree Module
//!
//! A disk-resident B+Tree over fixed-size keys and variable-size values,
//! storing one node per block of the block store.
//!
//! ## Responsibilities
//! - Ordered, duplicate-aware insertion with node splitting
//! - Pure-run chains for duplicated keys that outgrow a leaf
//! - Predicate-driven removal with empty-node cleanup and leaf merging
//! - Lazy forward, backward and range iteration over the leaf list
//! - Big values spilled to the varchar store or to block chains
//!
//! ## Node Formats
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Common header (8 bytes)                                 │
//! │   Tag: u8 | Reserved: u8 | KeySize: u16                 │
//! │   KeyCount: u16 | KeyCap: u16                           │
//! ├─────────────────────────────────────────────────────────┤
//! │ Internal (tag 0x01)                                     │
//! │   [Key; KeyCap] then [ChildOffset: u64; KeyCap]         │
//! ├─────────────────────────────────────────────────────────┤
//! │ Leaf (tag 0x02)                                         │
//! │   Next: u64 | Prev: u64                                 │
//! │   [Key][TagLen: u16][Payload] ... packed, KeyCount long │
//! │   TagLen: top 2 bits kind (0 inline, 1 varchar,         │
//! │           2 big chain), low 14 bits payload length      │
//! ├─────────────────────────────────────────────────────────┤
//! │ BigLeaf (tag 0x04)                                      │
//! │   ValueSize: u64 | NextPart: u64 | Key | first chunk    │
//! ├─────────────────────────────────────────────────────────┤
//! │ BigChain (tag 0x08)                                     │
//! │   NextPart: u64 | chunk                                 │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Internal key `i` is the smallest key reachable through child `i`, and
//! internal nodes never repeat a key. A key duplicated past one leaf forms a
//! pure run: leaves holding only that key, linked by `Next`, of which only
//! the first is referenced from its parent.

mod balance;
mod big;
mod cache;
mod chain;
mod insert;
mod internal;
mod iter;
mod leaf;
mod meta;
mod node;
mod remove;
mod search;
mod tree;
mod verify;

pub use iter::{Entries, Keys, Values};
pub use meta::TreeMeta;
pub use node::NodeKind;
pub use tree::BpTree;

// =============================================================================
// Shared Constants
// =============================================================================

/// Common header: Tag (1) + Reserved (1) + KeySize (2) + KeyCount (2) + KeyCap (2)
pub(crate) const NODE_HEADER_SIZE: usize = 8;

/// Leaf header: common header + Next (8) + Prev (8)
pub(crate) const LEAF_HEADER_SIZE: usize = NODE_HEADER_SIZE + 16;

/// Big leaf header before the key: common header + ValueSize (8) + NextPart (8)
pub(crate) const BIG_LEAF_HEADER_SIZE: usize = NODE_HEADER_SIZE + 16;

/// Big chain header: Tag (1) + Pad (7) + NextPart (8)
pub(crate) const BIG_CHAIN_HEADER_SIZE: usize = 16;

/// Size of the tagged length that follows every leaf key
pub(crate) const ENTRY_LEN_SIZE: usize = 2;

/// Size of a varchar or big-chain reference payload
pub(crate) const REF_SIZE: usize = 8;

/// Largest inline payload the 14-bit length field can describe
pub(crate) const MAX_INLINE_LEN: usize = 0x3fff;

/// Internal nodes must hold at least this many keys
pub(crate) const MIN_INTERNAL_KEYS: usize = 3;
