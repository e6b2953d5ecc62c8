//! Removal
//!
//! `delete` mirrors `insert`: it reports whether the node it was called on
//! survived, and if so which block now stands in for it. A pure run whose
//! head leaf empties is re-indexed by its next leaf.

use tracing::debug;

use crate::error::{Result, StrataError};

use super::balance::merge_leaves;
use super::internal::Internal;
use super::iter::Loc;
use super::leaf::{Leaf, Slot};
use super::node::NodeKind;
use super::search::{self, Keyed};
use super::tree::BpTree;

type Predicate<'p> = &'p mut dyn FnMut(&[u8]) -> bool;

impl BpTree {
    /// Remove the values under `key` for which `pred` returns true.
    ///
    /// Returns how many entries were removed. A key with no entries at all
    /// is `NotFound`; a key whose values all fail `pred` removes nothing.
    pub fn remove(&mut self, key: &[u8], mut pred: impl FnMut(&[u8]) -> bool) -> Result<usize> {
        self.check_key(key)?;
        let mut removed = 0;
        let survivor = self.delete(self.meta.root, 0, key, &mut pred, &mut removed)?;

        let root = match survivor {
            Some(node) => self.collapse_root(node)?,
            None => {
                let leaf = self.alloc_leaf()?;
                debug!(root = leaf, "tree emptied");
                leaf
            }
        };
        self.meta.root = root;
        self.meta.item_count = self.meta.item_count.saturating_sub(removed as u64);
        self.save_meta()?;
        Ok(removed)
    }

    /// Replace internal roots that have a single child by that child.
    fn collapse_root(&self, mut root: u64) -> Result<u64> {
        while self.kind(root)? == NodeKind::Internal {
            let node = self.load_internal(root)?;
            if node.len() != 1 {
                break;
            }
            let child = node.ptr(0);
            self.free_node(root)?;
            debug!(old = root, new = child, "root collapsed");
            root = child;
        }
        Ok(root)
    }

    /// `sibling` is the node after `node` on the same level, or 0.
    fn delete(
        &self,
        node: u64,
        sibling: u64,
        key: &[u8],
        pred: Predicate<'_>,
        removed: &mut usize,
    ) -> Result<Option<u64>> {
        match self.kind(node)? {
            NodeKind::Internal => self.internal_delete(node, sibling, key, pred, removed),
            NodeKind::Leaf => self.leaf_delete(node, sibling, key, pred, removed),
            other => panic!("tree pointer {} reaches a {:?} block", node, other),
        }
    }

    // =========================================================================
    // Internal Nodes
    // =========================================================================

    fn internal_delete(
        &self,
        offset: u64,
        sibling: u64,
        key: &[u8],
        pred: Predicate<'_>,
        removed: &mut usize,
    ) -> Result<Option<u64>> {
        let mut node = Internal::clone(&*self.load_internal(offset)?);
        let i = search::route(&node, key);
        let child_sibling = if i + 1 < node.len() {
            node.ptr(i + 1)
        } else if sibling != 0 {
            self.load_internal(sibling)?.ptr(0)
        } else {
            0
        };

        match self.delete(node.ptr(i), child_sibling, key, pred, removed)? {
            None => {
                node.remove(i);
                if node.len() == 0 {
                    self.free_node(offset)?;
                    return Ok(None);
                }
            }
            Some(child) => {
                node.set_ptr(i, child);
                node.set_key(i, &self.first_key(child)?);
                self.merge_children(&mut node, i)?;
            }
        }

        self.save_internal(offset, node)?;
        Ok(Some(offset))
    }

    /// Fold child `i` and a neighbour into one leaf when both are small.
    fn merge_children(&self, node: &mut Internal, i: usize) -> Result<()> {
        if node.len() < 2 {
            return Ok(());
        }
        let (l, r) = if i + 1 < node.len() { (i, i + 1) } else { (i - 1, i) };
        let (left, right) = (node.ptr(l), node.ptr(r));
        if self.kind(left)? != NodeKind::Leaf || self.kind(right)? != NodeKind::Leaf {
            return Ok(());
        }

        let (left_next, left_used, left_count, capacity, key_cap) = self.read_leaf(left, |lf| {
            (lf.next(), lf.used(), lf.key_count(), lf.capacity(), lf.key_cap())
        })?;
        // A left leaf heading a run is not directly followed by `right`.
        if left_next != right {
            return Ok(());
        }
        let (right_next, right_used, right_count, right_last) = self.read_leaf(right, |lf| {
            (
                lf.next(),
                lf.used(),
                lf.key_count(),
                lf.last_key().map(<[u8]>::to_vec),
            )
        })?;
        if right_next != 0 {
            let continues = self.read_leaf(right_next, |lf| {
                lf.first_key().map(<[u8]>::to_vec) == right_last
            })?;
            if continues {
                return Ok(());
            }
        }
        if left_used + right_used > capacity * 3 / 4 || left_count + right_count > key_cap {
            return Ok(());
        }

        {
            let mut left_block = self.store.block_mut(left, 1)?;
            let mut right_block = self.store.block_mut(right, 1)?;
            let mut left_leaf = Leaf::load(&mut left_block[..], left);
            let mut right_leaf = Leaf::load(&mut right_block[..], right);
            merge_leaves(&mut left_leaf, &mut right_leaf);
        }
        self.unlink(right)?;
        self.free_node(right)?;
        node.remove(r);
        debug!(left, right, entries = left_count + right_count, "leaves merged");
        Ok(())
    }

    // =========================================================================
    // Leaves
    // =========================================================================

    fn leaf_delete(
        &self,
        node: u64,
        sibling: u64,
        key: &[u8],
        pred: Predicate<'_>,
        removed: &mut usize,
    ) -> Result<Option<u64>> {
        let (idx, found) = self.read_leaf(node, |l| search::find(l, key))?;
        if !found {
            return Err(StrataError::NotFound);
        }

        // Every entry under `key`, gathered one leaf at a time
        let mut matches: Vec<(Loc, Slot)> = Vec::new();
        let mut at = Some((node, idx));
        while let Some((leaf, start)) = at {
            let (ran_off, next) = self.read_leaf(leaf, |l| {
                let mut i = start;
                while i < l.key_count() && l.key(i) == key {
                    matches.push(((leaf, i), l.value(i).to_slot()));
                    i += 1;
                }
                (i == l.key_count(), l.next())
            })?;
            at = if ran_off { self.forward_from(next)? } else { None };
        }

        // Back to front, so earlier indices stay valid.
        for &((leaf, i), ref slot) in matches.iter().rev() {
            let value = self.load_value(slot)?;
            if pred(&value) {
                self.write_leaf(leaf, |l| {
                    l.remove(i);
                    Ok(())
                })?;
                self.release_slot(slot)?;
                *removed += 1;
            }
        }

        let mut visited: Vec<u64> = matches.iter().map(|((leaf, _), _)| *leaf).collect();
        visited.dedup();
        for &leaf in visited.iter().filter(|&&leaf| leaf != node) {
            if self.read_leaf(leaf, |l| l.key_count())? == 0 {
                self.unlink(leaf)?;
                self.free_node(leaf)?;
            }
        }

        let (count, next) = self.read_leaf(node, |l| (l.key_count(), l.next()))?;
        if count > 0 {
            return Ok(Some(node));
        }
        self.unlink(node)?;
        self.free_node(node)?;
        if next != 0 && next != sibling {
            Ok(Some(next))
        } else {
            Ok(None)
        }
    }
}
