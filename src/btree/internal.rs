//! Internal nodes
//!
//! Internal nodes are decoded into an owned form, edited, and encoded back
//! whole. Their keys are unique and sorted; key `i` routes to child `i`.

use crate::codec;
use crate::error::{Result, StrataError};

use super::node::{NodeHeader, NodeKind};
use super::search::{self, Keyed};
use super::NODE_HEADER_SIZE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Internal {
    key_size: usize,
    key_cap: usize,
    keys: Vec<u8>,
    ptrs: Vec<u64>,
}

impl Internal {
    /// Keys an internal node of `block_size` bytes holds for `key_size`
    pub(crate) fn capacity(block_size: usize, key_size: usize) -> usize {
        ((block_size - NODE_HEADER_SIZE) / (key_size + 8)).min(u16::MAX as usize)
    }

    pub(crate) fn new(key_size: usize, key_cap: usize) -> Self {
        Self {
            key_size,
            key_cap,
            keys: Vec::with_capacity(key_size * key_cap),
            ptrs: Vec::with_capacity(key_cap),
        }
    }

    /// Check that `buf` is an internal node for `key_size`-byte keys whose
    /// keys and pointers lie inside the block.
    pub(crate) fn check_block(buf: &[u8], offset: u64, key_size: usize) -> Result<()> {
        let bad = |what: String| {
            Err(StrataError::StructuralViolation(format!(
                "internal node {} {}",
                offset, what
            )))
        };
        if NodeKind::from_tag(buf[0]) != Some(NodeKind::Internal) {
            return bad(format!("carries tag {:#04x}", buf[0]));
        }
        let header = NodeHeader::read(buf, offset);
        if header.key_size as usize != key_size {
            return bad(format!("has {}-byte keys in a {}-byte tree", header.key_size, key_size));
        }
        if header.key_count > header.key_cap {
            return bad(format!(
                "holds {} keys but has room for {}",
                header.key_count, header.key_cap
            ));
        }
        if NODE_HEADER_SIZE + header.key_cap as usize * (key_size + 8) > buf.len() {
            return bad(format!("claims room for {} keys", header.key_cap));
        }
        Ok(())
    }

    pub(crate) fn decode(buf: &[u8], offset: u64) -> Self {
        let header = NodeHeader::read(buf, offset);
        assert_eq!(
            header.kind,
            NodeKind::Internal,
            "block {} is not an internal node",
            offset
        );
        let key_size = header.key_size as usize;
        let key_cap = header.key_cap as usize;
        let count = header.key_count as usize;

        let keys_at = NODE_HEADER_SIZE;
        let ptrs_at = keys_at + key_cap * key_size;
        let keys = buf[keys_at..keys_at + count * key_size].to_vec();
        let ptrs = (0..count)
            .map(|i| codec::read_u64(buf, ptrs_at + i * 8))
            .collect();

        Self {
            key_size,
            key_cap,
            keys,
            ptrs,
        }
    }

    pub(crate) fn encode(&self, buf: &mut [u8]) {
        buf.fill(0);
        NodeHeader {
            kind: NodeKind::Internal,
            key_size: self.key_size as u16,
            key_count: self.ptrs.len() as u16,
            key_cap: self.key_cap as u16,
        }
        .write(buf);

        let keys_at = NODE_HEADER_SIZE;
        let ptrs_at = keys_at + self.key_cap * self.key_size;
        buf[keys_at..keys_at + self.keys.len()].copy_from_slice(&self.keys);
        for (i, ptr) in self.ptrs.iter().enumerate() {
            codec::write_u64(buf, ptrs_at + i * 8, *ptr);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.ptrs.len()
    }

    pub(crate) fn is_full(&self) -> bool {
        self.ptrs.len() >= self.key_cap
    }

    pub(crate) fn ptr(&self, i: usize) -> u64 {
        self.ptrs[i]
    }

    pub(crate) fn ptrs(&self) -> &[u64] {
        &self.ptrs
    }

    pub(crate) fn set_ptr(&mut self, i: usize, ptr: u64) {
        self.ptrs[i] = ptr;
    }

    pub(crate) fn set_key(&mut self, i: usize, key: &[u8]) {
        let at = i * self.key_size;
        self.keys[at..at + self.key_size].copy_from_slice(key);
    }

    /// Add a routing entry in key order.
    pub(crate) fn insert(&mut self, key: &[u8], ptr: u64) -> Result<usize> {
        if self.is_full() {
            return Err(StrataError::StructuralViolation(
                "insert into a full internal node".to_string(),
            ));
        }
        let (i, exists) = search::find(self, key);
        if exists {
            return Err(StrataError::StructuralViolation(format!(
                "duplicate routing key {:?}",
                key
            )));
        }
        let at = i * self.key_size;
        self.keys.splice(at..at, key.iter().copied());
        self.ptrs.insert(i, ptr);
        Ok(i)
    }

    pub(crate) fn remove(&mut self, i: usize) {
        let at = i * self.key_size;
        self.keys.drain(at..at + self.key_size);
        self.ptrs.remove(i);
    }

    /// Move entries `at..` into a new node.
    pub(crate) fn split_off(&mut self, at: usize) -> Internal {
        Internal {
            key_size: self.key_size,
            key_cap: self.key_cap,
            keys: self.keys.split_off(at * self.key_size),
            ptrs: self.ptrs.split_off(at),
        }
    }
}

impl Keyed for Internal {
    fn key_count(&self) -> usize {
        self.ptrs.len()
    }

    fn key(&self, i: usize) -> &[u8] {
        &self.keys[i * self.key_size..(i + 1) * self.key_size]
    }
}
