//! Tree metadata kept in the block store's control data

use serde::{Deserialize, Serialize};

use crate::block::BlockStore;
use crate::error::{Result, StrataError};

/// Magic identifying a tree's metadata record: "STRT"
const META_MAGIC: u32 = u32::from_le_bytes(*b"STRT");

/// Persistent description of a tree.
///
/// Serialized with bincode's fixed-width little-endian encoding at the start
/// of the store's control data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeMeta {
    magic: u32,
    /// Block offset of the root node
    pub root: u64,
    /// Number of key/value entries
    pub item_count: u64,
    /// Control block of the varchar store holding mid-sized values
    pub varchar_ctrl: u64,
    /// Length every key must have
    pub key_size: u16,
}

impl TreeMeta {
    pub(crate) fn new(root: u64, varchar_ctrl: u64, key_size: u16) -> Self {
        Self {
            magic: META_MAGIC,
            root,
            item_count: 0,
            varchar_ctrl,
            key_size,
        }
    }

    /// Decode and sanity check the record in `store`.
    pub fn load(store: &BlockStore) -> Result<Self> {
        let data = store.control_data()?;
        let meta: TreeMeta = bincode::deserialize(&data)?;

        if meta.magic != META_MAGIC {
            return Err(StrataError::CorruptMeta(
                "control data does not describe a tree".to_string(),
            ));
        }
        if meta.key_size == 0 {
            return Err(StrataError::CorruptMeta("key size is zero".to_string()));
        }
        let block_size = store.block_size() as u64;
        for (name, offset) in [("root", meta.root), ("varchar control", meta.varchar_ctrl)] {
            if offset == 0 || offset % block_size != 0 || offset >= store.len() {
                return Err(StrataError::CorruptMeta(format!(
                    "{} offset {} is not a block in the store",
                    name, offset
                )));
            }
        }
        Ok(meta)
    }

    pub(crate) fn save(&self, store: &BlockStore) -> Result<()> {
        let bytes = bincode::serialize(self)?;
        store.set_control_data(&bytes)
    }
}
