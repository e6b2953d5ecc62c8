//! Block Store
//!
//! Owns the mapping, the control block and the free list.

use std::cell::{Cell, RefCell};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use tracing::{debug, trace};

use crate::codec;
use crate::config::{validate_block_size, Config};
use crate::error::{Result, StrataError};

use super::control::{seal, ControlHeader, CONTROL_HEADER_SIZE};
use super::guard::{BlockMut, BlockRef, BorrowTable};

/// Free blocks carry `offset ^ FREE_STAMP` after their next pointer;
/// `allocate` zeroes it away.
const FREE_STAMP: u64 = 0x4b4c_4245_4552_4653;
const FREE_STAMP_AT: usize = 8;

fn free_stamp(offset: u64) -> u64 {
    offset ^ FREE_STAMP
}

/// Where the mapped bytes come from
enum Backing {
    File { file: File, path: PathBuf },
    Anonymous,
}

/// A memory-mapped store of fixed-size blocks.
///
/// All methods take `&self`: byte access is handed out through guards that
/// are tracked per block, so nested access to different blocks is fine while
/// conflicting access and remapping are refused with `ResourceBusy`.
pub struct BlockStore {
    backing: Backing,
    map: RefCell<MmapMut>,
    len: Cell<u64>,
    block_size: usize,
    growth_blocks: usize,
    borrows: RefCell<BorrowTable>,
    /// Bumped every time the mapping is replaced
    epoch: Cell<u64>,
}

impl BlockStore {
    // =========================================================================
    // Opening
    // =========================================================================

    /// Create (or truncate) a block file at `path`.
    pub fn create(path: impl AsRef<Path>, block_size: usize) -> Result<Self> {
        validate_block_size(block_size)?;
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(block_size as u64)?;

        // SAFETY: the file is opened read/write by this process and only ever
        // accessed through this mapping while the store is alive.
        let map = unsafe { MmapMut::map_mut(&file)? };
        let store = Self::from_parts(Backing::File { file, path }, map, block_size);
        store.format()?;
        store.map.borrow().flush()?;

        debug!(path = ?store.path(), block_size, "block store created");
        Ok(store)
    }

    /// Open an existing block file. The block size is read from the file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(StrataError::Config(format!(
                "no block file at {}",
                path.display()
            )));
        }

        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let file_len = file.metadata()?.len();
        if file_len < CONTROL_HEADER_SIZE as u64 {
            return Err(StrataError::CorruptMeta(format!(
                "file {} is too short to hold a control block",
                path.display()
            )));
        }

        // SAFETY: see `create`.
        let map = unsafe { MmapMut::map_mut(&file)? };
        let block_size = ControlHeader::peek_block_size(&map)? as usize;
        validate_block_size(block_size)
            .map_err(|e| StrataError::CorruptMeta(e.to_string()))?;
        if file_len % block_size as u64 != 0 {
            return Err(StrataError::CorruptMeta(format!(
                "file length {} is not a multiple of block size {}",
                file_len, block_size
            )));
        }
        ControlHeader::decode(&map[..block_size])?;

        let store = Self::from_parts(Backing::File { file, path }, map, block_size);
        debug!(
            path = ?store.path(),
            block_size,
            blocks = store.block_count(),
            "block store opened"
        );
        Ok(store)
    }

    /// Map anonymous memory. Nothing survives the store being dropped.
    pub fn anonymous(block_size: usize) -> Result<Self> {
        validate_block_size(block_size)?;
        let map = MmapMut::map_anon(block_size)?;
        let store = Self::from_parts(Backing::Anonymous, map, block_size);
        store.format()?;
        Ok(store)
    }

    /// Open or create according to `config`.
    ///
    /// An existing non-empty file is opened and must match the configured
    /// block size; otherwise the file is created.
    pub fn with_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let mut store = match &config.path {
            None => Self::anonymous(config.block_size)?,
            Some(path) => {
                let existing = path.metadata().map(|m| m.len() > 0).unwrap_or(false);
                if existing {
                    let store = Self::open(path)?;
                    if store.block_size() != config.block_size {
                        return Err(StrataError::Config(format!(
                            "{} uses block size {}, configured {}",
                            path.display(),
                            store.block_size(),
                            config.block_size
                        )));
                    }
                    store
                } else {
                    Self::create(path, config.block_size)?
                }
            }
        };
        store.growth_blocks = config.growth_blocks;
        Ok(store)
    }

    fn from_parts(backing: Backing, map: MmapMut, block_size: usize) -> Self {
        let len = map.len() as u64;
        let blocks = (len / block_size as u64) as usize;
        Self {
            backing,
            map: RefCell::new(map),
            len: Cell::new(len),
            block_size,
            growth_blocks: 1,
            borrows: RefCell::new(BorrowTable::new(blocks)),
            epoch: Cell::new(0),
        }
    }

    fn format(&self) -> Result<()> {
        let mut block = self.block_mut(0, 1)?;
        block.fill(0);
        ControlHeader::new(self.block_size as u32).encode(&mut block);
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Mapped length in bytes
    pub fn len(&self) -> u64 {
        self.len.get()
    }

    /// Always false: block 0 exists from creation on
    pub fn is_empty(&self) -> bool {
        self.len.get() == 0
    }

    pub fn block_count(&self) -> u64 {
        self.len.get() / self.block_size as u64
    }

    /// Identity of the current mapping; changes whenever the file grows.
    pub fn epoch(&self) -> u64 {
        self.epoch.get()
    }

    /// Number of live `BlockRef`/`BlockMut` guards
    pub fn outstanding_borrows(&self) -> usize {
        self.borrows.borrow().outstanding()
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::File { path, .. } => Some(path),
            Backing::Anonymous => None,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self.backing, Backing::Anonymous)
    }

    /// Bytes available to `set_control_data`
    pub fn control_data_capacity(&self) -> usize {
        self.block_size - CONTROL_HEADER_SIZE
    }

    /// Decoded control block header
    pub fn control_header(&self) -> Result<ControlHeader> {
        let block = self.block(0, 1)?;
        ControlHeader::decode_unchecked(&block)
    }

    pub fn free_list_len(&self) -> Result<u32> {
        Ok(self.control_header()?.free_len)
    }

    // =========================================================================
    // Scoped Access
    // =========================================================================

    /// Shared view over `count` blocks starting at `offset`.
    pub fn block(&self, offset: u64, count: usize) -> Result<BlockRef<'_>> {
        let (first, len) = self.check_range(offset, count)?;
        self.borrows.borrow_mut().acquire_shared(first, count)?;
        let base = self.map.borrow().as_ptr();
        // SAFETY: the range was bounds checked against the current mapping,
        // which cannot be replaced until this borrow is released.
        unsafe {
            Ok(BlockRef::new(
                &self.borrows,
                offset,
                first,
                count,
                base.add(offset as usize),
                len,
            ))
        }
    }

    /// Exclusive view over `count` blocks starting at `offset`.
    pub fn block_mut(&self, offset: u64, count: usize) -> Result<BlockMut<'_>> {
        let (first, len) = self.check_range(offset, count)?;
        self.borrows.borrow_mut().acquire_exclusive(first, count)?;
        let base = self.map.borrow_mut().as_mut_ptr();
        // SAFETY: as for `block`, and the exclusive borrow keeps every other
        // view of these blocks out.
        unsafe {
            Ok(BlockMut::new(
                &self.borrows,
                offset,
                first,
                count,
                base.add(offset as usize),
                len,
            ))
        }
    }

    /// Run `f` over a shared view; the borrow ends when `f` returns.
    pub fn with_blocks<T>(
        &self,
        offset: u64,
        count: usize,
        f: impl FnOnce(&[u8]) -> Result<T>,
    ) -> Result<T> {
        let block = self.block(offset, count)?;
        f(&block)
    }

    /// Run `f` over an exclusive view; the borrow ends when `f` returns.
    pub fn with_blocks_mut<T>(
        &self,
        offset: u64,
        count: usize,
        f: impl FnOnce(&mut [u8]) -> Result<T>,
    ) -> Result<T> {
        let mut block = self.block_mut(offset, count)?;
        f(&mut block)
    }

    fn check_range(&self, offset: u64, count: usize) -> Result<(usize, usize)> {
        if count == 0 {
            return Err(StrataError::OutOfRange(
                "block range must cover at least one block".to_string(),
            ));
        }
        if offset % self.block_size as u64 != 0 {
            return Err(StrataError::invalid_handle(offset, "not block aligned"));
        }
        let len = count * self.block_size;
        if offset + len as u64 > self.len.get() {
            return Err(StrataError::OutOfRange(format!(
                "{} blocks at offset {} pass the end of the store ({} bytes)",
                count,
                offset,
                self.len.get()
            )));
        }
        Ok(((offset / self.block_size as u64) as usize, len))
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Hand out one zeroed block, reusing the free list before growing.
    pub fn allocate(&self) -> Result<u64> {
        let header = self.control_header()?;
        if header.free_len > 0 {
            let offset = header.free_head;
            if offset == 0 || offset >= self.len.get() {
                return Err(StrataError::CorruptMeta(format!(
                    "free list head {} is outside the store",
                    offset
                )));
            }
            let next = {
                let mut block = self.block_mut(offset, 1)?;
                let next = codec::read_u64(&block, 0);
                block.fill(0);
                next
            };
            self.update_control(|h| {
                h.free_head = next;
                h.free_len -= 1;
            })?;
            trace!(offset, "block reused from free list");
            return Ok(offset);
        }

        let first = self.grow(self.growth_blocks)?;
        for extra in (1..self.growth_blocks).rev() {
            self.push_free(first + (extra * self.block_size) as u64)?;
        }
        trace!(offset = first, "block allocated by growth");
        Ok(first)
    }

    /// Hand out `count` contiguous zeroed blocks. Always grows the file.
    pub fn allocate_blocks(&self, count: usize) -> Result<u64> {
        if count == 0 {
            return Err(StrataError::OutOfRange(
                "cannot allocate zero blocks".to_string(),
            ));
        }
        let first = self.grow(count)?;
        trace!(offset = first, count, "contiguous blocks allocated");
        Ok(first)
    }

    /// Return a block to the free list.
    pub fn free(&self, offset: u64) -> Result<()> {
        if offset == 0 {
            return Err(StrataError::invalid_handle(0, "the control block cannot be freed"));
        }
        if offset % self.block_size as u64 != 0 || offset >= self.len.get() {
            return Err(StrataError::invalid_handle(offset, "not an allocated block"));
        }
        let stamped = {
            let block = self.block(offset, 1)?;
            codec::read_u64(&block, FREE_STAMP_AT) == free_stamp(offset)
        };
        if stamped {
            return Err(StrataError::invalid_handle(offset, "block is already free"));
        }
        self.push_free(offset)?;
        trace!(offset, "block freed");
        Ok(())
    }

    fn push_free(&self, offset: u64) -> Result<()> {
        let head = self.control_header()?.free_head;
        {
            let mut block = self.block_mut(offset, 1)?;
            codec::write_u64(&mut block, 0, head);
            codec::write_u64(&mut block, FREE_STAMP_AT, free_stamp(offset));
        }
        self.update_control(|h| {
            h.free_head = offset;
            h.free_len += 1;
        })
    }

    fn grow(&self, blocks: usize) -> Result<u64> {
        let outstanding = self.outstanding_borrows();
        if outstanding > 0 {
            return Err(StrataError::ResourceBusy(format!(
                "cannot resize with {} outstanding borrows",
                outstanding
            )));
        }

        let old_len = self.len.get();
        let new_len = old_len + (blocks * self.block_size) as u64;
        {
            let mut map = self.map.borrow_mut();
            match &self.backing {
                Backing::File { file, .. } => {
                    file.set_len(new_len)?;
                    // SAFETY: see `create`; no views into the old mapping exist.
                    *map = unsafe { MmapMut::map_mut(file)? };
                }
                Backing::Anonymous => {
                    let mut grown = MmapMut::map_anon(new_len as usize)?;
                    grown[..old_len as usize].copy_from_slice(&map[..]);
                    *map = grown;
                }
            }
        }

        self.len.set(new_len);
        self.epoch.set(self.epoch.get() + 1);
        self.borrows
            .borrow_mut()
            .resize((new_len / self.block_size as u64) as usize);

        debug!(old_len, new_len, epoch = self.epoch.get(), "block store grown");
        Ok(old_len)
    }

    // =========================================================================
    // Control Data
    // =========================================================================

    fn update_control(&self, f: impl FnOnce(&mut ControlHeader)) -> Result<()> {
        let mut block = self.block_mut(0, 1)?;
        let mut header = ControlHeader::decode_unchecked(&block)?;
        f(&mut header);
        header.encode(&mut block);
        Ok(())
    }

    /// Copy of the user control data region of block 0.
    pub fn control_data(&self) -> Result<Vec<u8>> {
        let block = self.block(0, 1)?;
        Ok(block[CONTROL_HEADER_SIZE..].to_vec())
    }

    /// Overwrite the start of the user control data region with `data`.
    pub fn set_control_data(&self, data: &[u8]) -> Result<()> {
        let limit = self.control_data_capacity();
        if data.len() > limit {
            return Err(StrataError::TooLarge {
                size: data.len(),
                limit,
            });
        }
        let mut block = self.block_mut(0, 1)?;
        block[CONTROL_HEADER_SIZE..CONTROL_HEADER_SIZE + data.len()].copy_from_slice(data);
        seal(&mut block);
        Ok(())
    }

    // =========================================================================
    // Durability
    // =========================================================================

    /// Ask the OS to write dirty pages back, without waiting.
    pub fn sync(&self) -> Result<()> {
        if let Backing::File { .. } = self.backing {
            self.map.borrow().flush_async()?;
        }
        Ok(())
    }

    /// Flush synchronously and unmap.
    ///
    /// Taking `self` by value means no guard can outlive the store.
    pub fn close(self) -> Result<()> {
        if let Backing::File { .. } = self.backing {
            self.map.borrow().flush()?;
        }
        debug!(path = ?self.path(), "block store closed");
        Ok(())
    }
}

impl std::fmt::Debug for BlockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockStore")
            .field("path", &self.path())
            .field("block_size", &self.block_size)
            .field("len", &self.len.get())
            .field("epoch", &self.epoch.get())
            .finish()
    }
}
