//! Varchar record headers

use crate::block::tag;
use crate::codec;

use super::{CTRL_SIZE, FREE_RECORD_SIZE, RUN_HEADER_SIZE};

/// Header of an allocated run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunHeader {
    /// Payload bytes requested by the caller
    pub length: u32,
    /// Slack bytes after the payload that belong to the run
    pub extra: u32,
    /// Reference count; a fresh run starts at one
    pub refs: u32,
}

impl RunHeader {
    /// Bytes the whole record covers, header included
    pub fn span(&self) -> u64 {
        RUN_HEADER_SIZE as u64 + self.length as u64 + self.extra as u64
    }

    pub(crate) fn encode(&self, buf: &mut [u8]) {
        buf[..RUN_HEADER_SIZE].fill(0);
        buf[0] = tag::VARCHAR_RUN;
        codec::write_u32(buf, 4, self.length);
        codec::write_u32(buf, 8, self.extra);
        codec::write_u32(buf, 12, self.refs);
    }
}

/// A free record on the address-ordered list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FreeRecord {
    /// Whole record size, header included
    pub length: u32,
    pub prev: u64,
    pub next: u64,
}

impl FreeRecord {
    pub(crate) fn encode(&self, buf: &mut [u8]) {
        buf[..FREE_RECORD_SIZE].fill(0);
        buf[0] = tag::VARCHAR_FREE;
        codec::write_u32(buf, 4, self.length);
        codec::write_u64(buf, 8, self.prev);
        codec::write_u64(buf, 16, self.next);
    }
}

/// What a record header turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Record {
    Run(RunHeader),
    Free(FreeRecord),
}

impl Record {
    /// Decode the record starting at `buf[0]`. `None` if the tag is neither.
    pub(crate) fn decode(buf: &[u8]) -> Option<Self> {
        match buf[0] {
            tag::VARCHAR_RUN => Some(Record::Run(RunHeader {
                length: codec::read_u32(buf, 4),
                extra: codec::read_u32(buf, 8),
                refs: codec::read_u32(buf, 12),
            })),
            tag::VARCHAR_FREE => Some(Record::Free(FreeRecord {
                length: codec::read_u32(buf, 4),
                prev: codec::read_u64(buf, 8),
                next: codec::read_u64(buf, 16),
            })),
            _ => None,
        }
    }
}

/// The allocator's anchor record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CtrlRecord {
    pub free_len: u32,
    pub free_head: u64,
}

impl CtrlRecord {
    pub(crate) fn decode(buf: &[u8]) -> Option<Self> {
        if buf[0] != tag::VARCHAR_CTRL {
            return None;
        }
        Some(Self {
            free_len: codec::read_u32(buf, 4),
            free_head: codec::read_u64(buf, 8),
        })
    }

    pub(crate) fn encode(&self, buf: &mut [u8]) {
        buf[..CTRL_SIZE].fill(0);
        buf[0] = tag::VARCHAR_CTRL;
        codec::write_u32(buf, 4, self.free_len);
        codec::write_u64(buf, 8, self.free_head);
    }
}
