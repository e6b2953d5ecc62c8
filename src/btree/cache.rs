//! Decoded internal nodes, keyed by block offset
//!
//! Least recently used nodes are dropped first, so the upper levels of the
//! tree stay resident. Entries belong to one mapping epoch; the first lookup
//! after the store remaps drops everything.

use std::num::NonZeroUsize;
use std::rc::Rc;

use lru::LruCache;

use super::internal::Internal;

pub(crate) struct NodeCache {
    epoch: u64,
    /// `None` when the configured capacity is zero
    nodes: Option<LruCache<u64, Rc<Internal>>>,
}

impl NodeCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            epoch: 0,
            nodes: NonZeroUsize::new(capacity).map(LruCache::new),
        }
    }

    fn sync_epoch(&mut self, epoch: u64) -> Option<&mut LruCache<u64, Rc<Internal>>> {
        let nodes = self.nodes.as_mut()?;
        if self.epoch != epoch {
            nodes.clear();
            self.epoch = epoch;
        }
        Some(nodes)
    }

    pub(crate) fn get(&mut self, epoch: u64, offset: u64) -> Option<Rc<Internal>> {
        self.sync_epoch(epoch)?.get(&offset).cloned()
    }

    pub(crate) fn put(&mut self, epoch: u64, offset: u64, node: Rc<Internal>) {
        if let Some(nodes) = self.sync_epoch(epoch) {
            nodes.put(offset, node);
        }
    }

    pub(crate) fn evict(&mut self, offset: u64) {
        if let Some(nodes) = self.nodes.as_mut() {
            nodes.pop(&offset);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.nodes.as_ref().map_or(0, LruCache::len)
    }
}
