//! Structural verification
//!
//! A full walk of the tree checking the invariants the other modules rely on.
//! The first violation found is returned as `StructuralViolation`.

use tracing::debug;

use crate::error::{Result, StrataError};

use super::internal::Internal;
use super::leaf::{self, Slot, ValueRef};
use super::node::NodeKind;
use super::search::Keyed;
use super::tree::BpTree;

fn violation(msg: String) -> StrataError {
    StrataError::StructuralViolation(msg)
}

/// Facts about one leaf gathered under a single borrow
struct LeafFacts {
    count: usize,
    sorted: bool,
    first: Option<Vec<u8>>,
    last: Option<Vec<u8>>,
    next: u64,
    entries: Vec<(Vec<u8>, Slot)>,
}

impl BpTree {
    /// Kind of the block at `offset`, reading nothing the tag does not vouch
    /// for. Leaves and internal nodes are also checked for sane packing, so
    /// later reads of them cannot run off the block.
    fn checked_kind(&self, offset: u64) -> Result<NodeKind> {
        let key_size = self.layout.key_size;
        self.store
            .with_blocks(offset, 1, |buf| {
                let kind = NodeKind::from_tag(buf[0]).ok_or_else(|| {
                    violation(format!(
                        "block {} carries unknown node tag {:#04x}",
                        offset, buf[0]
                    ))
                })?;
                match kind {
                    NodeKind::Leaf => leaf::check_block(buf, offset, key_size)?,
                    NodeKind::Internal => Internal::check_block(buf, offset, key_size)?,
                    NodeKind::BigLeaf | NodeKind::BigChain => {}
                }
                Ok(kind)
            })
            .map_err(|err| match err {
                StrataError::InvalidHandle { .. } | StrataError::OutOfRange(_) => {
                    violation(format!("tree pointer {} is not a block: {}", offset, err))
                }
                other => other,
            })
    }

    /// What a parent must route on to reach `offset`.
    fn routing_key(&self, offset: u64) -> Result<Vec<u8>> {
        match self.checked_kind(offset)? {
            NodeKind::Internal | NodeKind::Leaf => self.first_key(offset),
            other => Err(violation(format!(
                "tree pointer {} reaches a {:?} block",
                offset, other
            ))),
        }
    }

    /// Check every node reachable from the root.
    pub fn verify(&self) -> Result<()> {
        let mut leaf_depth = None;
        let entries = self.verify_node(self.meta.root, 0, 0, &mut leaf_depth)?;
        if entries != self.meta.item_count {
            return Err(violation(format!(
                "tree holds {} entries but metadata records {}",
                entries, self.meta.item_count
            )));
        }
        debug!(entries, depth = leaf_depth.unwrap_or(0), "tree verified");
        Ok(())
    }

    fn verify_node(
        &self,
        node: u64,
        sibling: u64,
        depth: usize,
        leaf_depth: &mut Option<usize>,
    ) -> Result<u64> {
        match self.checked_kind(node)? {
            NodeKind::Internal => self.verify_internal(node, sibling, depth, leaf_depth),
            NodeKind::Leaf => {
                match *leaf_depth {
                    Some(expected) if expected != depth => {
                        return Err(violation(format!(
                            "leaf {} sits at depth {}, others at {}",
                            node, depth, expected
                        )))
                    }
                    _ => *leaf_depth = Some(depth),
                }
                self.verify_leaf(node, sibling, depth == 0)
            }
            other => Err(violation(format!(
                "tree pointer {} reaches a {:?} block",
                node, other
            ))),
        }
    }

    fn verify_internal(
        &self,
        offset: u64,
        sibling: u64,
        depth: usize,
        leaf_depth: &mut Option<usize>,
    ) -> Result<u64> {
        let node = self.load_internal(offset)?;
        if node.len() == 0 {
            return Err(violation(format!("internal node {} is empty", offset)));
        }
        for i in 1..node.len() {
            if node.key(i - 1) >= node.key(i) {
                return Err(violation(format!(
                    "internal node {} keys out of order at {}",
                    offset, i
                )));
            }
        }

        let next_first = if sibling == 0 {
            0
        } else {
            if self.checked_kind(sibling)? != NodeKind::Internal {
                return Err(violation(format!(
                    "sibling {} of internal node {} is not internal",
                    sibling, offset
                )));
            }
            let first = self.load_internal(sibling)?.ptrs().first().copied();
            first.ok_or_else(|| violation(format!("internal node {} is empty", sibling)))?
        };

        let mut entries = 0;
        for (i, &child) in node.ptrs().iter().enumerate() {
            if self.routing_key(child)?.as_slice() != node.key(i) {
                return Err(violation(format!(
                    "internal node {} key {} does not match child {}",
                    offset, i, child
                )));
            }
            let child_sibling = node.ptrs().get(i + 1).copied().unwrap_or(next_first);
            entries += self.verify_node(child, child_sibling, depth + 1, leaf_depth)?;
        }
        Ok(entries)
    }

    fn leaf_facts(&self, leaf: u64) -> Result<LeafFacts> {
        self.read_leaf(leaf, |l| LeafFacts {
            count: l.key_count(),
            sorted: (1..l.key_count()).all(|i| l.key(i - 1) <= l.key(i)),
            first: l.first_key().map(<[u8]>::to_vec),
            last: l.last_key().map(<[u8]>::to_vec),
            next: l.next(),
            entries: (0..l.key_count())
                .map(|i| (l.key(i).to_vec(), l.value(i).to_slot()))
                .collect(),
        })
    }

    fn verify_links(&self, leaf: u64, next: u64) -> Result<()> {
        if next == 0 {
            return Ok(());
        }
        if self.checked_kind(next)? != NodeKind::Leaf {
            return Err(violation(format!("leaf {} links to non-leaf {}", leaf, next)));
        }
        let prev = self.read_leaf(next, |l| l.prev())?;
        if prev != leaf {
            return Err(violation(format!(
                "leaf {} points at {} whose prev is {}",
                leaf, next, prev
            )));
        }
        Ok(())
    }

    /// Check an indexed leaf and any pure-run leaves hanging off it.
    fn verify_leaf(&self, node: u64, sibling: u64, is_root: bool) -> Result<u64> {
        let head = self.leaf_facts(node)?;
        if head.count == 0 {
            if is_root && head.next == 0 {
                return Ok(0);
            }
            return Err(violation(format!("leaf {} is empty", node)));
        }

        let members = match (&head.first, &head.last) {
            (Some(first), Some(last)) if first == last => self.run_leaves(node, first)?,
            _ => vec![node],
        };

        let mut entries = 0;
        let mut last_key = None;
        let mut head = Some(head);
        for &leaf in &members {
            let facts = match head.take() {
                Some(facts) => facts,
                None => {
                    self.checked_kind(leaf)?;
                    self.leaf_facts(leaf)?
                }
            };
            if !facts.sorted {
                return Err(violation(format!("leaf {} keys out of order", leaf)));
            }
            if leaf != node && facts.first != facts.last {
                return Err(violation(format!(
                    "run leaf {} holds more than one key",
                    leaf
                )));
            }
            self.verify_links(leaf, facts.next)?;
            for (key, slot) in &facts.entries {
                self.verify_value(leaf, key, slot)?;
            }
            entries += facts.count as u64;
            last_key = facts.last;
        }

        let end = members[members.len() - 1];
        let after = self.read_leaf(end, |l| l.next())?;
        if after != sibling {
            return Err(violation(format!(
                "leaf {} is followed by {} but its parent's next child is {}",
                end, after, sibling
            )));
        }
        if sibling != 0 {
            if self.checked_kind(sibling)? != NodeKind::Leaf {
                return Err(violation(format!(
                    "leaf {} has non-leaf sibling {}",
                    end, sibling
                )));
            }
            let next_first = self.read_leaf(sibling, |l| l.first_key().map(<[u8]>::to_vec))?;
            if let (Some(last), Some(first)) = (&last_key, &next_first) {
                if last > first {
                    return Err(violation(format!(
                        "leaf {} ends after its successor {} begins",
                        end, sibling
                    )));
                }
            }
        }
        Ok(entries)
    }

    fn verify_value(&self, leaf: u64, key: &[u8], slot: &Slot) -> Result<()> {
        match slot.as_value_ref() {
            ValueRef::Inline(_) => {}
            ValueRef::Varchar(offset) => {
                if self.varchar.run(&self.store, offset).is_err() {
                    return Err(violation(format!(
                        "leaf {} references {} which is not a varchar run",
                        leaf, offset
                    )));
                }
            }
            ValueRef::Big(offset) => {
                let (big_key, len) = self.big_header(offset)?;
                if big_key != key {
                    return Err(violation(format!(
                        "big value {} is keyed differently from its entry in leaf {}",
                        offset, leaf
                    )));
                }
                let blocks = self.big_blocks(offset)?;
                if blocks.len() != self.big_block_count(len) {
                    return Err(violation(format!(
                        "big value {} of {} bytes spans {} blocks",
                        offset,
                        len,
                        blocks.len()
                    )));
                }
            }
        }
        Ok(())
    }
}
