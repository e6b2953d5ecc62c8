//! Leaf list maintenance
//!
//! Leaves form one doubly linked list in key order. Pure runs are stretches
//! of that list, so linking a leaf into a run and linking it next to an
//! ordinary neighbour are the same operation.

use crate::error::{Result, StrataError};

use super::leaf::{self, Leaf};
use super::search::Keyed;
use super::tree::BpTree;

impl BpTree {
    /// Link the empty leaf `fresh` directly after `anchor`.
    pub(crate) fn link_after(&self, fresh: u64, anchor: u64) -> Result<()> {
        let next = self.read_leaf(anchor, |l| l.next())?;
        self.write_leaf(fresh, |l| {
            l.set_prev(anchor);
            l.set_next(next);
            Ok(())
        })?;
        self.write_leaf(anchor, |l| {
            l.set_next(fresh);
            Ok(())
        })?;
        if next != 0 {
            self.write_leaf(next, |l| {
                l.set_prev(fresh);
                Ok(())
            })?;
        }
        Ok(())
    }

    /// Link the empty leaf `fresh` directly before `anchor`.
    pub(crate) fn link_before(&self, fresh: u64, anchor: u64) -> Result<()> {
        let prev = self.read_leaf(anchor, |l| l.prev())?;
        self.write_leaf(fresh, |l| {
            l.set_prev(prev);
            l.set_next(anchor);
            Ok(())
        })?;
        self.write_leaf(anchor, |l| {
            l.set_prev(fresh);
            Ok(())
        })?;
        if prev != 0 {
            self.write_leaf(prev, |l| {
                l.set_next(fresh);
                Ok(())
            })?;
        }
        Ok(())
    }

    /// Take `node` out of the leaf list, joining its neighbours.
    pub(crate) fn unlink(&self, node: u64) -> Result<()> {
        let (prev, next) = self.read_leaf(node, |l| (l.prev(), l.next()))?;
        if prev != 0 {
            self.write_leaf(prev, |l| {
                l.set_next(next);
                Ok(())
            })?;
        }
        if next != 0 {
            self.write_leaf(next, |l| {
                l.set_prev(prev);
                Ok(())
            })?;
        }
        Ok(())
    }

    /// Follow `next_of` from `start` while `member` accepts the block.
    ///
    /// `start` is always part of the result. A chain longer than the store
    /// has blocks is a cycle and reported as a structural violation.
    pub(crate) fn walk_chain(
        &self,
        start: u64,
        next_of: impl Fn(&[u8]) -> u64,
        mut member: impl FnMut(&[u8]) -> bool,
    ) -> Result<Vec<u64>> {
        let limit = self.store.block_count() as usize;
        let mut chain = vec![start];
        let mut next = self.store.with_blocks(start, 1, |buf| Ok(next_of(buf)))?;

        while next != 0 {
            let (accepted, after) = self
                .store
                .with_blocks(next, 1, |buf| Ok((member(buf), next_of(buf))))?;
            if !accepted {
                break;
            }
            chain.push(next);
            if chain.len() > limit {
                return Err(StrataError::StructuralViolation(format!(
                    "chain from block {} loops",
                    start
                )));
            }
            next = after;
        }
        Ok(chain)
    }

    /// Leaves of the pure run of `run_key` starting at `start`.
    pub(crate) fn run_leaves(&self, start: u64, run_key: &[u8]) -> Result<Vec<u64>> {
        let key_size = self.layout.key_size;
        self.walk_chain(start, leaf::next_of, |buf| {
            leaf::check_block(buf, 0, key_size).is_ok()
                && Leaf::load(buf, 0).first_key() == Some(run_key)
        })
    }

    /// Last leaf of the pure run of `run_key` starting at `start`.
    pub(crate) fn run_end(&self, start: u64, run_key: &[u8]) -> Result<u64> {
        let leaves = self.run_leaves(start, run_key)?;
        Ok(leaves.last().copied().unwrap_or(start))
    }
}
