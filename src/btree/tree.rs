//! B+Tree handle
//!
//! Opening and creating trees, node load/store helpers and value placement.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

use crate::block::BlockStore;
use crate::config::Config;
use crate::error::{Result, StrataError};
use crate::varchar::VarcharStore;

use super::cache::NodeCache;
use super::internal::Internal;
use super::leaf::{entry_size, ref_entry_size, Leaf, Slot};
use super::meta::TreeMeta;
use super::node::NodeKind;
use super::search::Keyed;
use super::{LEAF_HEADER_SIZE, MAX_INLINE_LEN, MIN_INTERNAL_KEYS};

// =============================================================================
// Layout
// =============================================================================

/// Sizes derived from the block size, the key size and the config
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Layout {
    pub block_size: usize,
    pub key_size: usize,
    pub internal_cap: usize,
    pub inline_limit: usize,
    pub big_threshold: usize,
}

impl Layout {
    pub(crate) fn new(block_size: usize, key_size: usize, config: &Config) -> Result<Self> {
        config.validate()?;
        if key_size == 0 || key_size > u16::MAX as usize {
            return Err(StrataError::Config(format!(
                "key size {} is outside 1..=65535",
                key_size
            )));
        }

        let internal_cap = Internal::capacity(block_size, key_size);
        if internal_cap < MIN_INTERNAL_KEYS {
            return Err(StrataError::Config(format!(
                "key size {} leaves room for only {} keys per internal node",
                key_size, internal_cap
            )));
        }

        // Every entry must fit in a quarter of a leaf so splits always land.
        let quarter = (block_size - LEAF_HEADER_SIZE) / 4;
        if ref_entry_size(key_size) > quarter {
            return Err(StrataError::Config(format!(
                "key size {} is too large for {}-byte leaves",
                key_size, block_size
            )));
        }
        let max_inline = (quarter - entry_size(key_size, 0)).min(MAX_INLINE_LEN);

        let inline_limit = match config.inline_value_limit {
            Some(limit) if limit > max_inline => {
                return Err(StrataError::Config(format!(
                    "inline value limit {} exceeds {} for this key size",
                    limit, max_inline
                )))
            }
            Some(limit) => limit,
            None => max_inline,
        };

        Ok(Self {
            block_size,
            key_size,
            internal_cap,
            inline_limit,
            big_threshold: config.big_value_threshold.unwrap_or(block_size),
        })
    }
}

// =============================================================================
// Tree
// =============================================================================

/// A B+Tree stored in, and owning, a block store.
pub struct BpTree {
    pub(crate) store: BlockStore,
    pub(crate) varchar: VarcharStore,
    pub(crate) meta: TreeMeta,
    pub(crate) layout: Layout,
    cache: RefCell<NodeCache>,
}

impl BpTree {
    /// Lay out an empty tree in `store` with default settings.
    pub fn create(store: BlockStore, key_size: usize) -> Result<Self> {
        Self::create_with(store, key_size, &Config::default())
    }

    /// Lay out an empty tree in `store`.
    ///
    /// The store's control data is taken over for the tree's metadata.
    pub fn create_with(store: BlockStore, key_size: usize, config: &Config) -> Result<Self> {
        let layout = Layout::new(store.block_size(), key_size, config)?;
        let varchar = VarcharStore::create(&store)?;
        let meta = TreeMeta::new(0, varchar.ctrl_offset(), key_size as u16);

        let mut tree = Self {
            store,
            varchar,
            meta,
            layout,
            cache: RefCell::new(NodeCache::new(config.node_cache_capacity)),
        };
        tree.meta.root = tree.alloc_leaf()?;
        tree.save_meta()?;

        debug!(key_size, root = tree.meta.root, "tree created");
        Ok(tree)
    }

    /// Attach to the tree recorded in `store` with default settings.
    pub fn open(store: BlockStore) -> Result<Self> {
        Self::open_with(store, &Config::default())
    }

    /// Attach to the tree recorded in `store`.
    pub fn open_with(store: BlockStore, config: &Config) -> Result<Self> {
        let meta = TreeMeta::load(&store)?;
        let layout = Layout::new(store.block_size(), meta.key_size as usize, config)?;
        let varchar = VarcharStore::open(&store, meta.varchar_ctrl)?;

        let tree = Self {
            store,
            varchar,
            meta,
            layout,
            cache: RefCell::new(NodeCache::new(config.node_cache_capacity)),
        };
        let root_tag = tree
            .store
            .with_blocks(tree.meta.root, 1, |buf| Ok(NodeKind::from_tag(buf[0])))?;
        match root_tag {
            Some(NodeKind::Internal | NodeKind::Leaf) => {}
            other => {
                return Err(StrataError::CorruptMeta(format!(
                    "root {} is a {:?} block",
                    tree.meta.root, other
                )))
            }
        }

        debug!(
            key_size = meta.key_size,
            root = meta.root,
            items = meta.item_count,
            "tree opened"
        );
        Ok(tree)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn key_size(&self) -> usize {
        self.layout.key_size
    }

    /// Number of key/value entries, duplicates included
    pub fn len(&self) -> u64 {
        self.meta.item_count
    }

    pub fn is_empty(&self) -> bool {
        self.meta.item_count == 0
    }

    pub fn meta(&self) -> &TreeMeta {
        &self.meta
    }

    pub fn store(&self) -> &BlockStore {
        &self.store
    }

    /// The varchar allocator holding mid-sized values
    pub fn varchar(&self) -> &VarcharStore {
        &self.varchar
    }

    /// Largest value kept inside a leaf
    pub fn inline_value_limit(&self) -> usize {
        self.layout.inline_limit
    }

    /// Values longer than this are written as big-value chains
    pub fn big_value_threshold(&self) -> usize {
        self.layout.big_threshold
    }

    // =========================================================================
    // Durability
    // =========================================================================

    pub fn sync(&self) -> Result<()> {
        self.save_meta()?;
        self.store.sync()
    }

    pub fn close(self) -> Result<()> {
        self.save_meta()?;
        self.store.close()
    }

    /// Release the store, e.g. to reopen the tree later.
    pub fn into_store(self) -> Result<BlockStore> {
        self.save_meta()?;
        Ok(self.store)
    }

    pub(crate) fn save_meta(&self) -> Result<()> {
        self.meta.save(&self.store)
    }

    pub(crate) fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() != self.layout.key_size {
            return Err(StrataError::KeySizeMismatch {
                expected: self.layout.key_size,
                actual: key.len(),
            });
        }
        Ok(())
    }

    // =========================================================================
    // Node Access
    // =========================================================================

    pub(crate) fn kind(&self, offset: u64) -> Result<NodeKind> {
        self.store
            .with_blocks(offset, 1, |buf| Ok(NodeKind::of_block(buf, offset)))
    }

    pub(crate) fn read_leaf<T>(&self, offset: u64, f: impl FnOnce(&Leaf<&[u8]>) -> T) -> Result<T> {
        self.store
            .with_blocks(offset, 1, |buf| Ok(f(&Leaf::load(buf, offset))))
    }

    pub(crate) fn write_leaf<T>(
        &self,
        offset: u64,
        f: impl FnOnce(&mut Leaf<&mut [u8]>) -> Result<T>,
    ) -> Result<T> {
        self.store
            .with_blocks_mut(offset, 1, |buf| f(&mut Leaf::load(buf, offset)))
    }

    pub(crate) fn load_internal(&self, offset: u64) -> Result<Rc<Internal>> {
        let epoch = self.store.epoch();
        if let Some(node) = self.cache.borrow_mut().get(epoch, offset) {
            return Ok(node);
        }
        let node = Rc::new(
            self.store
                .with_blocks(offset, 1, |buf| Ok(Internal::decode(buf, offset)))?,
        );
        self.cache
            .borrow_mut()
            .put(epoch, offset, Rc::clone(&node));
        Ok(node)
    }

    pub(crate) fn save_internal(&self, offset: u64, node: Internal) -> Result<()> {
        self.store.with_blocks_mut(offset, 1, |buf| {
            node.encode(buf);
            Ok(())
        })?;
        self.cache
            .borrow_mut()
            .put(self.store.epoch(), offset, Rc::new(node));
        Ok(())
    }

    pub(crate) fn new_internal(&self) -> Internal {
        Internal::new(self.layout.key_size, self.layout.internal_cap)
    }

    pub(crate) fn alloc_internal(&self, node: Internal) -> Result<u64> {
        let offset = self.store.allocate()?;
        self.save_internal(offset, node)?;
        Ok(offset)
    }

    pub(crate) fn alloc_leaf(&self) -> Result<u64> {
        let offset = self.store.allocate()?;
        let key_size = self.layout.key_size;
        self.store.with_blocks_mut(offset, 1, |buf| {
            Leaf::init(buf, key_size);
            Ok(())
        })?;
        Ok(offset)
    }

    pub(crate) fn free_node(&self, offset: u64) -> Result<()> {
        self.cache.borrow_mut().evict(offset);
        self.store.free(offset)
    }

    /// Smallest key under `offset`, i.e. what its parent routes on.
    pub(crate) fn first_key(&self, offset: u64) -> Result<Vec<u8>> {
        let first = match self.kind(offset)? {
            NodeKind::Internal => self
                .load_internal(offset)?
                .first_key()
                .map(<[u8]>::to_vec),
            NodeKind::Leaf => self.read_leaf(offset, |leaf| leaf.first_key().map(<[u8]>::to_vec))?,
            other => panic!("tree pointer {} reaches a {:?} block", offset, other),
        };
        first.ok_or_else(|| {
            StrataError::StructuralViolation(format!("node {} has no keys to route on", offset))
        })
    }

    // =========================================================================
    // Value Placement
    // =========================================================================

    pub(crate) fn store_value(&self, key: &[u8], value: &[u8]) -> Result<Slot> {
        if value.len() <= self.layout.inline_limit {
            return Ok(Slot::Inline(value.to_vec()));
        }
        if value.len() <= self.layout.big_threshold {
            let offset = self.varchar.alloc(&self.store, value.len())?;
            self.varchar.write(&self.store, offset, value)?;
            return Ok(Slot::Varchar(offset));
        }
        Ok(Slot::Big(self.write_big(key, value)?))
    }

    pub(crate) fn load_value(&self, slot: &Slot) -> Result<Vec<u8>> {
        match slot {
            Slot::Inline(bytes) => Ok(bytes.clone()),
            Slot::Varchar(offset) => self.varchar.read(&self.store, *offset),
            Slot::Big(offset) => self.read_big(*offset),
        }
    }

    pub(crate) fn release_slot(&self, slot: &Slot) -> Result<()> {
        match slot {
            Slot::Inline(_) => Ok(()),
            Slot::Varchar(offset) => self.varchar.free(&self.store, *offset),
            Slot::Big(offset) => self.free_big(*offset),
        }
    }
}

impl std::fmt::Debug for BpTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BpTree")
            .field("store", &self.store)
            .field("meta", &self.meta)
            .field("layout", &self.layout)
            .finish()
    }
}
