//! Lookup and iteration
//!
//! Positions are `(leaf offset, entry index)` pairs. Stepping moves along the
//! index and follows `Next`/`Prev` when it runs off a leaf, skipping empty
//! leaves, so pure runs are walked the same way as any other neighbours.
//! A cursor copies out and decodes the leaf it stands on once, then steps
//! within it until it moves on.
//!
//! Iterators hold a shared borrow of the tree: nothing can be added or
//! removed while one is alive. Items are `Result`s; after an error the
//! iterator is finished.

use crate::error::Result;

use super::leaf::{self, Leaf, Slot};
use super::node::{NodeHeader, NodeKind};
use super::search::{self, Keyed};
use super::tree::BpTree;

/// An entry's position: leaf block and index within it
pub(crate) type Loc = (u64, usize);

#[derive(Debug, Clone)]
enum Bound {
    Unbounded,
    /// Stop at the first key `>=` this one
    Before(Vec<u8>),
    /// Stop at the first key that differs
    Exact(Vec<u8>),
}

impl Bound {
    fn admits(&self, key: &[u8]) -> bool {
        match self {
            Bound::Unbounded => true,
            Bound::Before(end) => key < end.as_slice(),
            Bound::Exact(wanted) => key == wanted.as_slice(),
        }
    }
}

// =============================================================================
// Positioning
// =============================================================================

impl BpTree {
    /// Leaf that `key` routes to.
    fn descend(&self, key: &[u8]) -> Result<u64> {
        let mut node = self.meta.root;
        loop {
            match self.kind(node)? {
                NodeKind::Internal => {
                    let internal = self.load_internal(node)?;
                    node = internal.ptr(search::route(&*internal, key));
                }
                NodeKind::Leaf => return Ok(node),
                other => panic!("tree pointer {} reaches a {:?} block", node, other),
            }
        }
    }

    /// Leaf reached by always taking the first (or last) child.
    fn descend_edge(&self, last: bool) -> Result<u64> {
        let mut node = self.meta.root;
        loop {
            match self.kind(node)? {
                NodeKind::Internal => {
                    let internal = self.load_internal(node)?;
                    let ptrs = internal.ptrs();
                    node = if last { ptrs[ptrs.len() - 1] } else { ptrs[0] };
                }
                NodeKind::Leaf => return Ok(node),
                other => panic!("tree pointer {} reaches a {:?} block", node, other),
            }
        }
    }

    /// Entry count and links, read from the header alone.
    fn leaf_links(&self, offset: u64) -> Result<(usize, u64, u64)> {
        self.store.with_blocks(offset, 1, |buf| {
            let header = NodeHeader::read(buf, offset);
            Ok((header.key_count as usize, leaf::prev_of(buf), leaf::next_of(buf)))
        })
    }

    /// First non-empty leaf at or after `leaf`, as a position at its start.
    pub(crate) fn forward_from(&self, mut leaf: u64) -> Result<Option<Loc>> {
        while leaf != 0 {
            let (count, _, next) = self.leaf_links(leaf)?;
            if count > 0 {
                return Ok(Some((leaf, 0)));
            }
            leaf = next;
        }
        Ok(None)
    }

    /// Last non-empty leaf at or before `leaf`, as a position at its end.
    fn backward_from(&self, mut leaf: u64) -> Result<Option<Loc>> {
        while leaf != 0 {
            let (count, prev, _) = self.leaf_links(leaf)?;
            if count > 0 {
                return Ok(Some((leaf, count - 1)));
            }
            leaf = prev;
        }
        Ok(None)
    }

    /// Position of the first entry whose key is `>= key`.
    pub(crate) fn locate(&self, key: &[u8]) -> Result<Option<Loc>> {
        let mut leaf = self.descend(key)?;
        // Hidden leaves of a run headed here still hold keys below `key`.
        while leaf != 0 {
            let (idx, count, next) =
                self.read_leaf(leaf, |l| (search::find(l, key).0, l.key_count(), l.next()))?;
            if idx < count {
                return Ok(Some((leaf, idx)));
            }
            leaf = next;
        }
        Ok(None)
    }

    pub(crate) fn first_loc(&self) -> Result<Option<Loc>> {
        let leaf = self.descend_edge(false)?;
        self.forward_from(leaf)
    }

    pub(crate) fn last_loc(&self) -> Result<Option<Loc>> {
        let mut leaf = self.descend_edge(true)?;
        // The last indexed leaf may head a run that continues past it.
        loop {
            let (_, _, next) = self.leaf_links(leaf)?;
            if next == 0 {
                break;
            }
            leaf = next;
        }
        self.backward_from(leaf)
    }

    fn key_at(&self, (leaf, i): Loc) -> Result<Vec<u8>> {
        self.read_leaf(leaf, |l| l.key(i).to_vec())
    }

    // =========================================================================
    // Public Queries
    // =========================================================================

    /// Whether at least one value is stored under `key`.
    pub fn has(&self, key: &[u8]) -> Result<bool> {
        self.check_key(key)?;
        match self.locate(key)? {
            Some(loc) => Ok(self.key_at(loc)? == key),
            None => Ok(false),
        }
    }

    /// Every value stored under `key`.
    pub fn find(&self, key: &[u8]) -> Result<Values<'_>> {
        self.check_key(key)?;
        let start = self.locate(key)?;
        Ok(Values(Cursor::new(self, start, true, Bound::Exact(key.to_vec()))))
    }

    /// Entries with keys in `[from, to)`, in key order.
    pub fn range(&self, from: &[u8], to: &[u8]) -> Result<Entries<'_>> {
        self.check_key(from)?;
        self.check_key(to)?;
        let start = if from < to { self.locate(from)? } else { None };
        Ok(Entries(Cursor::new(self, start, true, Bound::Before(to.to_vec()))))
    }

    /// All entries in key order.
    pub fn iter(&self) -> Result<Entries<'_>> {
        let start = self.first_loc()?;
        Ok(Entries(Cursor::new(self, start, true, Bound::Unbounded)))
    }

    /// All entries in reverse key order.
    pub fn backward(&self) -> Result<Entries<'_>> {
        let start = self.last_loc()?;
        Ok(Entries(Cursor::new(self, start, false, Bound::Unbounded)))
    }

    /// Distinct keys in order.
    pub fn keys(&self) -> Result<Keys<'_>> {
        let start = self.first_loc()?;
        Ok(Keys {
            cursor: Cursor::new(self, start, true, Bound::Unbounded),
            last: None,
        })
    }

    /// All values in key order.
    pub fn values(&self) -> Result<Values<'_>> {
        let start = self.first_loc()?;
        Ok(Values(Cursor::new(self, start, true, Bound::Unbounded)))
    }
}

// =============================================================================
// Cursor
// =============================================================================

/// A leaf copied out of the store, valid for one mapping epoch
struct LoadedLeaf {
    offset: u64,
    epoch: u64,
    view: Leaf<Vec<u8>>,
}

struct Cursor<'t> {
    tree: &'t BpTree,
    next: Option<Loc>,
    forward: bool,
    bound: Bound,
    leaf: Option<LoadedLeaf>,
}

impl<'t> Cursor<'t> {
    fn new(tree: &'t BpTree, start: Option<Loc>, forward: bool, bound: Bound) -> Self {
        Self {
            tree,
            next: start,
            forward,
            bound,
            leaf: None,
        }
    }

    /// Decoded view of `offset`, reusing the one already held when it matches.
    fn load(&mut self, offset: u64) -> Result<&Leaf<Vec<u8>>> {
        let epoch = self.tree.store.epoch();
        let loaded = match self.leaf.take() {
            Some(held) if held.offset == offset && held.epoch == epoch => held,
            _ => {
                let view = self
                    .tree
                    .store
                    .with_blocks(offset, 1, |buf| Ok(Leaf::load(buf.to_vec(), offset)))?;
                LoadedLeaf {
                    offset,
                    epoch,
                    view,
                }
            }
        };
        Ok(&self.leaf.insert(loaded).view)
    }

    fn advance(&mut self) -> Result<Option<(Vec<u8>, Slot)>> {
        let Some((offset, i)) = self.next else {
            return Ok(None);
        };
        let (key, slot, count, prev, next) = {
            let leaf = self.load(offset)?;
            (
                leaf.key(i).to_vec(),
                leaf.value(i).to_slot(),
                leaf.key_count(),
                leaf.prev(),
                leaf.next(),
            )
        };
        if !self.bound.admits(&key) {
            self.next = None;
            return Ok(None);
        }
        self.next = match (self.forward, i) {
            (true, i) if i + 1 < count => Some((offset, i + 1)),
            (true, _) => self.tree.forward_from(next)?,
            (false, 0) => self.tree.backward_from(prev)?,
            (false, i) => Some((offset, i - 1)),
        };
        Ok(Some((key, slot)))
    }

    /// Advance and map the entry, finishing the cursor on error.
    fn step<T>(
        &mut self,
        f: impl FnOnce(&'t BpTree, Vec<u8>, Slot) -> Result<T>,
    ) -> Option<Result<T>> {
        let tree = self.tree;
        let item = self
            .advance()
            .and_then(|entry| entry.map(|(key, slot)| f(tree, key, slot)).transpose());
        match item {
            Ok(Some(value)) => Some(Ok(value)),
            Ok(None) => None,
            Err(err) => {
                self.next = None;
                self.leaf = None;
                Some(Err(err))
            }
        }
    }
}

/// Iterator over `(key, value)` pairs
pub struct Entries<'t>(Cursor<'t>);

impl Iterator for Entries<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0
            .step(|tree, key, slot| Ok((key, tree.load_value(&slot)?)))
    }
}

/// Iterator over values
pub struct Values<'t>(Cursor<'t>);

impl Iterator for Values<'_> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.step(|tree, _, slot| tree.load_value(&slot))
    }
}

/// Iterator over distinct keys
pub struct Keys<'t> {
    cursor: Cursor<'t>,
    last: Option<Vec<u8>>,
}

impl Iterator for Keys<'_> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let key = match self.cursor.step(|_, key, _| Ok(key))? {
                Ok(key) => key,
                Err(err) => return Some(Err(err)),
            };
            if self.last.as_deref() != Some(key.as_slice()) {
                self.last = Some(key.clone());
                return Some(Ok(key));
            }
        }
    }
}
