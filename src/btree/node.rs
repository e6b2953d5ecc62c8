//! Node tags and the common header

use crate::block::tag;
use crate::codec;

/// The kind of block a tree pointer leads to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Internal,
    Leaf,
    BigLeaf,
    BigChain,
}

impl NodeKind {
    pub(crate) fn from_tag(byte: u8) -> Option<Self> {
        match byte {
            tag::INTERNAL => Some(NodeKind::Internal),
            tag::LEAF => Some(NodeKind::Leaf),
            tag::BIG_LEAF => Some(NodeKind::BigLeaf),
            tag::BIG_CHAIN => Some(NodeKind::BigChain),
            _ => None,
        }
    }

    pub(crate) fn tag(self) -> u8 {
        match self {
            NodeKind::Internal => tag::INTERNAL,
            NodeKind::Leaf => tag::LEAF,
            NodeKind::BigLeaf => tag::BIG_LEAF,
            NodeKind::BigChain => tag::BIG_CHAIN,
        }
    }

    /// Decode the tag of a block reached through a tree pointer.
    ///
    /// An unknown tag here means the file no longer describes a tree.
    pub(crate) fn of_block(buf: &[u8], offset: u64) -> Self {
        match Self::from_tag(buf[0]) {
            Some(kind) => kind,
            None => panic!(
                "block {} carries unknown node tag {:#04x}; the tree is corrupt",
                offset, buf[0]
            ),
        }
    }
}

/// The eight bytes every node starts with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NodeHeader {
    pub kind: NodeKind,
    pub key_size: u16,
    pub key_count: u16,
    pub key_cap: u16,
}

impl NodeHeader {
    pub(crate) fn read(buf: &[u8], offset: u64) -> Self {
        Self {
            kind: NodeKind::of_block(buf, offset),
            key_size: codec::read_u16(buf, 2),
            key_count: codec::read_u16(buf, 4),
            key_cap: codec::read_u16(buf, 6),
        }
    }

    pub(crate) fn write(&self, buf: &mut [u8]) {
        buf[0] = self.kind.tag();
        buf[1] = 0;
        codec::write_u16(buf, 2, self.key_size);
        codec::write_u16(buf, 4, self.key_count);
        codec::write_u16(buf, 6, self.key_cap);
    }
}

pub(crate) fn set_key_count(buf: &mut [u8], count: usize) {
    codec::write_u16(buf, 4, count as u16);
}
