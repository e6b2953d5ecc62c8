//! Leaf nodes
//!
//! A leaf is edited in place through `Leaf<B>`, a view over the block bytes.
//! Entries are packed back to back after the header; the view keeps the
//! start of each entry so keys can be binary searched.

use crate::codec;
use crate::error::{Result, StrataError};

use super::node::{set_key_count, NodeHeader, NodeKind};
use super::search::{self, Keyed};
use super::{ENTRY_LEN_SIZE, LEAF_HEADER_SIZE, MAX_INLINE_LEN, REF_SIZE};

const NEXT_AT: usize = 8;
const PREV_AT: usize = 16;

const KIND_SHIFT: u16 = 14;
const LEN_MASK: u16 = 0x3fff;

const KIND_INLINE: u16 = 0;
const KIND_VARCHAR: u16 = 1;
const KIND_BIG: u16 = 2;

// =============================================================================
// Values
// =============================================================================

/// Where an entry's value lives, borrowed from the leaf bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ValueRef<'a> {
    Inline(&'a [u8]),
    Varchar(u64),
    Big(u64),
}

/// Owned form of `ValueRef`, usable once the leaf borrow has ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Slot {
    Inline(Vec<u8>),
    Varchar(u64),
    Big(u64),
}

impl ValueRef<'_> {
    pub(crate) fn to_slot(self) -> Slot {
        match self {
            ValueRef::Inline(bytes) => Slot::Inline(bytes.to_vec()),
            ValueRef::Varchar(offset) => Slot::Varchar(offset),
            ValueRef::Big(offset) => Slot::Big(offset),
        }
    }
}

impl Slot {
    pub(crate) fn as_value_ref(&self) -> ValueRef<'_> {
        match self {
            Slot::Inline(bytes) => ValueRef::Inline(bytes),
            Slot::Varchar(offset) => ValueRef::Varchar(*offset),
            Slot::Big(offset) => ValueRef::Big(*offset),
        }
    }
}

/// Encode `key | tagLen | payload` for insertion into a leaf.
pub(crate) fn encode_entry(key: &[u8], value: ValueRef<'_>) -> Vec<u8> {
    let (kind, payload): (u16, Vec<u8>) = match value {
        ValueRef::Inline(bytes) => {
            debug_assert!(bytes.len() <= MAX_INLINE_LEN);
            (KIND_INLINE, bytes.to_vec())
        }
        ValueRef::Varchar(offset) => (KIND_VARCHAR, offset.to_le_bytes().to_vec()),
        ValueRef::Big(offset) => (KIND_BIG, offset.to_le_bytes().to_vec()),
    };
    let mut entry = Vec::with_capacity(key.len() + ENTRY_LEN_SIZE + payload.len());
    entry.extend_from_slice(key);
    entry.extend_from_slice(&((kind << KIND_SHIFT) | payload.len() as u16).to_le_bytes());
    entry.extend_from_slice(&payload);
    entry
}

/// Bytes an entry with a `payload`-byte payload takes in a leaf
pub(crate) fn entry_size(key_size: usize, payload: usize) -> usize {
    key_size + ENTRY_LEN_SIZE + payload
}

/// Bytes an entry pointing elsewhere takes
pub(crate) fn ref_entry_size(key_size: usize) -> usize {
    entry_size(key_size, REF_SIZE)
}

/// `Next` pointer of a leaf block without decoding its entries
pub(crate) fn next_of(buf: &[u8]) -> u64 {
    codec::read_u64(buf, NEXT_AT)
}

pub(crate) fn prev_of(buf: &[u8]) -> u64 {
    codec::read_u64(buf, PREV_AT)
}

/// Check that `buf` is a leaf for `key_size`-byte keys whose entries can be
/// walked without leaving the block.
pub(crate) fn check_block(buf: &[u8], offset: u64, key_size: usize) -> Result<()> {
    let bad = |what: String| {
        Err(StrataError::StructuralViolation(format!(
            "leaf {} {}",
            offset, what
        )))
    };
    if NodeKind::from_tag(buf[0]) != Some(NodeKind::Leaf) {
        return bad(format!("carries tag {:#04x}", buf[0]));
    }
    let header = NodeHeader::read(buf, offset);
    if header.key_size as usize != key_size {
        return bad(format!("has {}-byte keys in a {}-byte tree", header.key_size, key_size));
    }
    if header.key_count > header.key_cap {
        return bad(format!(
            "holds {} entries but has room for {}",
            header.key_count, header.key_cap
        ));
    }

    let mut pos = LEAF_HEADER_SIZE;
    for i in 0..header.key_count as usize {
        if pos + key_size + ENTRY_LEN_SIZE > buf.len() {
            return bad(format!("entry {} starts past the block", i));
        }
        let field = codec::read_u16(buf, pos + key_size);
        let len = (field & LEN_MASK) as usize;
        match field >> KIND_SHIFT {
            KIND_INLINE => {}
            KIND_VARCHAR | KIND_BIG if len == REF_SIZE => {}
            KIND_VARCHAR | KIND_BIG => {
                return bad(format!("entry {} has a {}-byte reference", i, len))
            }
            other => return bad(format!("entry {} has unknown value kind {}", i, other)),
        }
        pos += entry_size(key_size, len);
        if pos > buf.len() {
            return bad(format!("entry {} runs past the block", i));
        }
    }
    Ok(())
}

// =============================================================================
// Leaf View
// =============================================================================

pub(crate) struct Leaf<B> {
    buf: B,
    key_size: usize,
    offsets: Vec<usize>,
    end: usize,
}

impl<B: AsRef<[u8]>> Leaf<B> {
    /// View an existing leaf block.
    pub(crate) fn load(buf: B, offset: u64) -> Self {
        let header = NodeHeader::read(buf.as_ref(), offset);
        assert_eq!(header.kind, NodeKind::Leaf, "block {} is not a leaf", offset);
        let mut leaf = Self {
            buf,
            key_size: header.key_size as usize,
            offsets: Vec::with_capacity(header.key_count as usize),
            end: LEAF_HEADER_SIZE,
        };
        leaf.scan(header.key_count as usize, offset);
        leaf
    }

    fn scan(&mut self, count: usize, offset: u64) {
        let bytes = self.buf.as_ref();
        let mut pos = LEAF_HEADER_SIZE;
        self.offsets.clear();
        for _ in 0..count {
            let field = codec::read_u16(bytes, pos + self.key_size);
            let len = entry_size(self.key_size, (field & LEN_MASK) as usize);
            assert!(
                pos + len <= bytes.len(),
                "leaf {} packs entries past its block",
                offset
            );
            self.offsets.push(pos);
            pos += len;
        }
        self.end = pos;
    }

    fn bytes(&self) -> &[u8] {
        self.buf.as_ref()
    }

    pub(crate) fn next(&self) -> u64 {
        codec::read_u64(self.bytes(), NEXT_AT)
    }

    pub(crate) fn prev(&self) -> u64 {
        codec::read_u64(self.bytes(), PREV_AT)
    }

    pub(crate) fn key_cap(&self) -> usize {
        codec::read_u16(self.bytes(), 6) as usize
    }

    /// Bytes used by entries
    pub(crate) fn used(&self) -> usize {
        self.end - LEAF_HEADER_SIZE
    }

    /// Bytes available to entries in an empty leaf
    pub(crate) fn capacity(&self) -> usize {
        self.bytes().len() - LEAF_HEADER_SIZE
    }

    pub(crate) fn fits(&self, entry_len: usize) -> bool {
        self.end + entry_len <= self.bytes().len() && self.offsets.len() < self.key_cap()
    }

    /// Whether the leaf holds a single key, however many times
    pub(crate) fn is_pure(&self) -> bool {
        match (self.first_key(), self.last_key()) {
            (Some(first), Some(last)) => first == last,
            _ => false,
        }
    }

    /// The whole packed entry `i`
    pub(crate) fn raw(&self, i: usize) -> &[u8] {
        let start = self.offsets[i];
        let end = self.offsets.get(i + 1).copied().unwrap_or(self.end);
        &self.bytes()[start..end]
    }

    /// Packed bytes of entries `from..`
    pub(crate) fn raw_tail(&self, from: usize) -> &[u8] {
        let start = self.offsets.get(from).copied().unwrap_or(self.end);
        &self.bytes()[start..self.end]
    }

    /// Byte position of entry `i` relative to the first entry
    pub(crate) fn entry_pos(&self, i: usize) -> usize {
        self.offsets[i] - LEAF_HEADER_SIZE
    }

    pub(crate) fn value(&self, i: usize) -> ValueRef<'_> {
        let at = self.offsets[i] + self.key_size;
        let bytes = self.bytes();
        let field = codec::read_u16(bytes, at);
        let payload = &bytes[at + ENTRY_LEN_SIZE..at + ENTRY_LEN_SIZE + (field & LEN_MASK) as usize];
        match field >> KIND_SHIFT {
            KIND_INLINE => ValueRef::Inline(payload),
            KIND_VARCHAR => ValueRef::Varchar(codec::read_u64(payload, 0)),
            KIND_BIG => ValueRef::Big(codec::read_u64(payload, 0)),
            other => panic!("leaf entry {} has unknown value kind {}", i, other),
        }
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Leaf<B> {
    /// Format `buf` as an empty, unlinked leaf.
    pub(crate) fn init(mut buf: B, key_size: usize) -> Self {
        let bytes = buf.as_mut();
        bytes.fill(0);
        let key_cap = ((bytes.len() - LEAF_HEADER_SIZE) / (key_size + ENTRY_LEN_SIZE))
            .min(u16::MAX as usize);
        NodeHeader {
            kind: NodeKind::Leaf,
            key_size: key_size as u16,
            key_count: 0,
            key_cap: key_cap as u16,
        }
        .write(bytes);
        Self {
            buf,
            key_size,
            offsets: Vec::new(),
            end: LEAF_HEADER_SIZE,
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        self.buf.as_mut()
    }

    pub(crate) fn set_next(&mut self, next: u64) {
        codec::write_u64(self.bytes_mut(), NEXT_AT, next);
    }

    pub(crate) fn set_prev(&mut self, prev: u64) {
        codec::write_u64(self.bytes_mut(), PREV_AT, prev);
    }

    /// Insert a packed entry at index `i`, shifting later entries right.
    pub(crate) fn insert_raw(&mut self, i: usize, entry: &[u8]) {
        debug_assert!(self.fits(entry.len()));
        let at = self.offsets.get(i).copied().unwrap_or(self.end);
        let end = self.end;
        let bytes = self.bytes_mut();
        bytes.copy_within(at..end, at + entry.len());
        bytes[at..at + entry.len()].copy_from_slice(entry);
        self.reindex(self.offsets.len() + 1);
    }

    /// Insert after any existing duplicates of `key`.
    pub(crate) fn insert_sorted(&mut self, key: &[u8], entry: &[u8]) -> usize {
        let i = search::upper_bound(self, key);
        self.insert_raw(i, entry);
        i
    }

    /// Remove entry `i`, closing the gap.
    pub(crate) fn remove(&mut self, i: usize) {
        let start = self.offsets[i];
        let len = self.raw(i).len();
        let end = self.end;
        let bytes = self.bytes_mut();
        bytes.copy_within(start + len..end, start);
        bytes[end - len..end].fill(0);
        self.reindex(self.offsets.len() - 1);
    }

    /// Cut entries `from..` out of the leaf and return their packed bytes.
    pub(crate) fn truncate(&mut self, from: usize) -> (Vec<u8>, usize) {
        let moved = self.offsets.len() - from;
        let tail = self.raw_tail(from).to_vec();
        let start = self.end - tail.len();
        let end = self.end;
        self.bytes_mut()[start..end].fill(0);
        self.reindex(from);
        (tail, moved)
    }

    /// Append `count` packed entries that sort after everything present.
    pub(crate) fn extend_raw(&mut self, packed: &[u8], count: usize) {
        let at = self.end;
        self.bytes_mut()[at..at + packed.len()].copy_from_slice(packed);
        self.reindex(self.offsets.len() + count);
    }

    fn reindex(&mut self, count: usize) {
        set_key_count(self.bytes_mut(), count);
        self.scan(count, 0);
    }
}

impl<B: AsRef<[u8]>> Keyed for Leaf<B> {
    fn key_count(&self) -> usize {
        self.offsets.len()
    }

    fn key(&self, i: usize) -> &[u8] {
        let at = self.offsets[i];
        &self.bytes()[at..at + self.key_size]
    }
}
