//! Insertion
//!
//! `insert` descends to the leaf for the key and reports back how the node it
//! was called on ended up: unchanged, split in two, or split in two with an
//! overflow third. A child split adds at most two routing entries to its
//! parent, and absorbing them splits the parent at most twice, so three
//! siblings is the most any level ever hands upward.

use tracing::trace;

use crate::error::{Result, StrataError};

use super::balance::{balance_leaves, internal_balance_point};
use super::internal::Internal;
use super::leaf::{encode_entry, Leaf};
use super::node::NodeKind;
use super::search::{self, Keyed};
use super::tree::BpTree;

/// Outcome of inserting below a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Split {
    Unsplit(u64),
    Split(u64, u64),
    SplitWithOverflow {
        left: u64,
        right: u64,
        overflow_key: Vec<u8>,
        overflow: u64,
    },
}

impl Split {
    fn nodes(&self) -> Vec<u64> {
        match self {
            Split::Unsplit(node) => vec![*node],
            Split::Split(left, right) => vec![*left, *right],
            Split::SplitWithOverflow {
                left,
                right,
                overflow,
                ..
            } => vec![*left, *right, *overflow],
        }
    }
}

/// What a leaf looks like before deciding where an entry goes
struct LeafShape {
    pure: bool,
    fits: bool,
    first: Option<Vec<u8>>,
}

impl BpTree {
    /// Add `value` under `key`, after any values already stored for it.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_key(key)?;
        let slot = self.store_value(key, value)?;
        let entry = encode_entry(key, slot.as_value_ref());

        let outcome = match self.insert(self.meta.root, key, &entry) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.release_slot(&slot)?;
                return Err(err);
            }
        };

        if let Split::Unsplit(root) = outcome {
            self.meta.root = root;
        } else {
            self.meta.root = self.grow_root(&outcome)?;
        }
        self.meta.item_count += 1;
        self.save_meta()
    }

    /// New root above the siblings a root split produced.
    fn grow_root(&self, outcome: &Split) -> Result<u64> {
        let mut root = self.new_internal();
        for child in outcome.nodes() {
            root.insert(&self.first_key(child)?, child)?;
        }
        let offset = self.alloc_internal(root)?;
        trace!(root = offset, children = outcome.nodes().len(), "tree grew a level");
        Ok(offset)
    }

    /// Package 1..=3 sibling nodes as a `Split`.
    fn into_split(&self, nodes: &[u64]) -> Result<Split> {
        match *nodes {
            [node] => Ok(Split::Unsplit(node)),
            [left, right] => Ok(Split::Split(left, right)),
            [left, right, overflow] => Ok(Split::SplitWithOverflow {
                left,
                right,
                overflow_key: self.first_key(overflow)?,
                overflow,
            }),
            _ => Err(StrataError::StructuralViolation(format!(
                "insert produced {} siblings",
                nodes.len()
            ))),
        }
    }

    pub(crate) fn insert(&self, node: u64, key: &[u8], entry: &[u8]) -> Result<Split> {
        match self.kind(node)? {
            NodeKind::Internal => self.internal_insert(node, key, entry),
            NodeKind::Leaf => self.leaf_insert(node, key, entry),
            other => panic!("tree pointer {} reaches a {:?} block", node, other),
        }
    }

    // =========================================================================
    // Internal Nodes
    // =========================================================================

    fn internal_insert(&self, offset: u64, key: &[u8], entry: &[u8]) -> Result<Split> {
        let mut node = Internal::clone(&*self.load_internal(offset)?);
        let i = search::route(&node, key);
        let outcome = self.insert(node.ptr(i), key, entry)?;

        let (first, pending) = match outcome {
            Split::Unsplit(child) => (child, Vec::new()),
            Split::Split(left, right) => (left, vec![(self.first_key(right)?, right)]),
            Split::SplitWithOverflow {
                left,
                right,
                overflow_key,
                overflow,
            } => (
                left,
                vec![(self.first_key(right)?, right), (overflow_key, overflow)],
            ),
        };

        let first_key = self.first_key(first)?;
        if pending.is_empty() && node.ptr(i) == first && node.key(i) == first_key.as_slice() {
            return Ok(Split::Unsplit(offset));
        }
        node.set_ptr(i, first);
        node.set_key(i, &first_key);

        let mut nodes = vec![(offset, node)];
        for (key, ptr) in pending {
            self.absorb(&mut nodes, &key, ptr)?;
        }

        let offsets: Vec<u64> = nodes.iter().map(|(offset, _)| *offset).collect();
        for (offset, node) in nodes {
            self.save_internal(offset, node)?;
        }
        self.into_split(&offsets)
    }

    /// Add a routing entry to whichever sibling covers `key`, splitting that
    /// sibling first if it is full.
    fn absorb(&self, nodes: &mut Vec<(u64, Internal)>, key: &[u8], ptr: u64) -> Result<()> {
        let mut t = nodes
            .iter()
            .rposition(|(_, n)| n.first_key().map_or(true, |k| k <= key))
            .unwrap_or(0);

        if nodes[t].1.is_full() {
            let at = internal_balance_point(&nodes[t].1);
            let tail = nodes[t].1.split_off(at);
            let offset = self.store.allocate()?;
            let goes_right = tail.first_key().map_or(false, |k| key >= k);
            trace!(node = nodes[t].0, sibling = offset, "internal node split");
            nodes.insert(t + 1, (offset, tail));
            if goes_right {
                t += 1;
            }
        }

        nodes[t].1.insert(key, ptr)?;
        Ok(())
    }

    // =========================================================================
    // Leaves
    // =========================================================================

    fn leaf_shape(&self, node: u64, entry_len: usize) -> Result<LeafShape> {
        self.read_leaf(node, |l| LeafShape {
            pure: l.is_pure(),
            fits: l.fits(entry_len),
            first: l.first_key().map(<[u8]>::to_vec),
        })
    }

    fn fits(&self, node: u64, entry_len: usize) -> Result<bool> {
        self.read_leaf(node, |l| l.fits(entry_len))
    }

    fn put_entry(&self, node: u64, key: &[u8], entry: &[u8]) -> Result<()> {
        self.write_leaf(node, |l| {
            l.insert_sorted(key, entry);
            Ok(())
        })
    }

    fn leaf_insert(&self, node: u64, key: &[u8], entry: &[u8]) -> Result<Split> {
        let shape = self.leaf_shape(node, entry.len())?;

        if shape.pure {
            if let Some(run_key) = shape.first {
                return self.pure_insert(node, &run_key, shape.fits, key, entry);
            }
        }
        if shape.fits {
            self.put_entry(node, key, entry)?;
            return Ok(Split::Unsplit(node));
        }
        self.split_leaf(node, key, entry)
    }

    /// Insert into a leaf holding only `run_key`, which may head a run.
    fn pure_insert(
        &self,
        node: u64,
        run_key: &[u8],
        fits: bool,
        key: &[u8],
        entry: &[u8],
    ) -> Result<Split> {
        if key < run_key {
            if fits && self.run_end(node, run_key)? == node {
                self.put_entry(node, key, entry)?;
                return Ok(Split::Unsplit(node));
            }
            let fresh = self.alloc_leaf()?;
            self.link_before(fresh, node)?;
            self.put_entry(fresh, key, entry)?;
            return Ok(Split::Split(fresh, node));
        }

        let end = self.run_end(node, run_key)?;
        if key == run_key {
            if self.fits(end, entry.len())? {
                self.put_entry(end, key, entry)?;
            } else {
                let fresh = self.alloc_leaf()?;
                self.link_after(fresh, end)?;
                self.put_entry(fresh, key, entry)?;
                trace!(run = node, leaf = fresh, "pure run extended");
            }
            return Ok(Split::Unsplit(node));
        }

        if end == node && fits {
            self.put_entry(node, key, entry)?;
            return Ok(Split::Unsplit(node));
        }
        let fresh = self.alloc_leaf()?;
        self.link_after(fresh, end)?;
        self.put_entry(fresh, key, entry)?;
        Ok(Split::Split(node, fresh))
    }

    /// Split a full leaf that is not pure and insert into the right half.
    fn split_leaf(&self, node: u64, key: &[u8], entry: &[u8]) -> Result<Split> {
        let right = self.alloc_leaf()?;
        {
            let mut left_block = self.store.block_mut(node, 1)?;
            let mut right_block = self.store.block_mut(right, 1)?;
            let mut left_leaf = Leaf::load(&mut left_block[..], node);
            let mut right_leaf = Leaf::load(&mut right_block[..], right);
            balance_leaves(&mut left_leaf, &mut right_leaf);
        }
        self.link_after(right, node)?;
        trace!(node, sibling = right, "leaf split");

        let right_first = self.first_key(right)?;
        let mut target = if key < right_first.as_slice() { node } else { right };
        if target == node
            && !self.fits(node, entry.len())?
            && self.read_leaf(node, |l| l.last_key().map_or(true, |k| key > k))?
            && self.fits(right, entry.len())?
        {
            target = right;
        }

        if self.fits(target, entry.len())? {
            self.put_entry(target, key, entry)?;
            return Ok(Split::Split(node, right));
        }

        let sub = self.leaf_insert(target, key, entry)?.nodes();
        let nodes = if target == node {
            [sub, vec![right]].concat()
        } else {
            [vec![node], sub].concat()
        };
        self.into_split(&nodes)
    }
}
