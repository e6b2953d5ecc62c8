//! Big values
//!
//! A value above the big threshold is written to a chain of blocks: one big
//! leaf carrying the key, the total size and the first chunk, then as many
//! big chain blocks as the rest needs.

use tracing::debug;

use crate::codec;
use crate::error::{Result, StrataError};

use super::node::{NodeHeader, NodeKind};
use super::tree::BpTree;
use super::{BIG_CHAIN_HEADER_SIZE, BIG_LEAF_HEADER_SIZE};

const VALUE_SIZE_AT: usize = 8;
const LEAF_NEXT_AT: usize = 16;
const CHAIN_NEXT_AT: usize = 8;

/// Next block of a big value chain, whichever part `buf` is.
pub(crate) fn next_part(buf: &[u8]) -> u64 {
    match NodeKind::from_tag(buf[0]) {
        Some(NodeKind::BigLeaf) => codec::read_u64(buf, LEAF_NEXT_AT),
        Some(NodeKind::BigChain) => codec::read_u64(buf, CHAIN_NEXT_AT),
        _ => 0,
    }
}

fn is_chain_block(buf: &[u8]) -> bool {
    NodeKind::from_tag(buf[0]) == Some(NodeKind::BigChain)
}

impl BpTree {
    fn big_first_cap(&self) -> usize {
        self.layout.block_size - BIG_LEAF_HEADER_SIZE - self.layout.key_size
    }

    fn big_chain_cap(&self) -> usize {
        self.layout.block_size - BIG_CHAIN_HEADER_SIZE
    }

    /// Blocks a big value of `len` bytes occupies
    pub(crate) fn big_block_count(&self, len: usize) -> usize {
        let rest = len.saturating_sub(self.big_first_cap());
        1 + (rest + self.big_chain_cap() - 1) / self.big_chain_cap()
    }

    /// Write `value` as a big-value chain and return its big leaf.
    pub(crate) fn write_big(&self, key: &[u8], value: &[u8]) -> Result<u64> {
        let count = self.big_block_count(value.len());
        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            match self.store.allocate() {
                Ok(offset) => blocks.push(offset),
                Err(err) => {
                    for offset in blocks {
                        self.store.free(offset)?;
                    }
                    return Err(err);
                }
            }
        }

        let first_cap = self.big_first_cap();
        let chain_cap = self.big_chain_cap();
        let key_size = self.layout.key_size;

        let (head, mut rest) = value.split_at(value.len().min(first_cap));
        self.store.with_blocks_mut(blocks[0], 1, |buf| {
            NodeHeader {
                kind: NodeKind::BigLeaf,
                key_size: key_size as u16,
                key_count: 1,
                key_cap: 1,
            }
            .write(buf);
            codec::write_u64(buf, VALUE_SIZE_AT, value.len() as u64);
            codec::write_u64(buf, LEAF_NEXT_AT, blocks.get(1).copied().unwrap_or(0));
            let data_at = BIG_LEAF_HEADER_SIZE + key_size;
            buf[BIG_LEAF_HEADER_SIZE..data_at].copy_from_slice(key);
            buf[data_at..data_at + head.len()].copy_from_slice(head);
            Ok(())
        })?;

        for (i, &offset) in blocks.iter().enumerate().skip(1) {
            let (chunk, tail) = rest.split_at(rest.len().min(chain_cap));
            rest = tail;
            let next = blocks.get(i + 1).copied().unwrap_or(0);
            self.store.with_blocks_mut(offset, 1, |buf| {
                buf[0] = NodeKind::BigChain.tag();
                codec::write_u64(buf, CHAIN_NEXT_AT, next);
                buf[BIG_CHAIN_HEADER_SIZE..BIG_CHAIN_HEADER_SIZE + chunk.len()]
                    .copy_from_slice(chunk);
                Ok(())
            })?;
        }

        debug!(head = blocks[0], len = value.len(), blocks = count, "big value written");
        Ok(blocks[0])
    }

    /// Key and declared length recorded in a big leaf.
    pub(crate) fn big_header(&self, offset: u64) -> Result<(Vec<u8>, usize)> {
        let key_size = self.layout.key_size;
        self.store.with_blocks(offset, 1, |buf| {
            if NodeKind::from_tag(buf[0]) != Some(NodeKind::BigLeaf) {
                return Err(StrataError::StructuralViolation(format!(
                    "value reference {} is not a big leaf",
                    offset
                )));
            }
            let key = buf[BIG_LEAF_HEADER_SIZE..BIG_LEAF_HEADER_SIZE + key_size].to_vec();
            Ok((key, codec::read_u64(buf, VALUE_SIZE_AT) as usize))
        })
    }

    /// Every block of the big value at `offset`, big leaf first.
    pub(crate) fn big_blocks(&self, offset: u64) -> Result<Vec<u64>> {
        self.big_header(offset)?;
        self.walk_chain(offset, next_part, is_chain_block)
    }

    pub(crate) fn read_big(&self, offset: u64) -> Result<Vec<u8>> {
        let (_, len) = self.big_header(offset)?;
        let blocks = self.big_blocks(offset)?;
        if blocks.len() != self.big_block_count(len) {
            return Err(StrataError::StructuralViolation(format!(
                "big value {} of {} bytes spans {} blocks",
                offset,
                len,
                blocks.len()
            )));
        }

        let mut value = Vec::with_capacity(len);
        let data_at = BIG_LEAF_HEADER_SIZE + self.layout.key_size;
        let head = len.min(self.big_first_cap());
        self.store.with_blocks(offset, 1, |buf| {
            value.extend_from_slice(&buf[data_at..data_at + head]);
            Ok(())
        })?;
        for &block in &blocks[1..] {
            let take = (len - value.len()).min(self.big_chain_cap());
            self.store.with_blocks(block, 1, |buf| {
                value.extend_from_slice(&buf[BIG_CHAIN_HEADER_SIZE..BIG_CHAIN_HEADER_SIZE + take]);
                Ok(())
            })?;
        }
        Ok(value)
    }

    pub(crate) fn free_big(&self, offset: u64) -> Result<()> {
        let blocks = self.big_blocks(offset)?;
        for block in &blocks {
            self.store.free(*block)?;
        }
        debug!(head = offset, blocks = blocks.len(), "big value freed");
        Ok(())
    }
}
