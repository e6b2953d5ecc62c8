//! Varchar Store
//!
//! Allocation, freeing and payload access for variable-length runs.

use tracing::{debug, trace};

use crate::block::BlockStore;
use crate::error::{Result, StrataError};

use super::record::{CtrlRecord, FreeRecord, Record, RunHeader};
use super::{record_size, CTRL_SIZE, FREE_RECORD_SIZE, MAX_RUN_LEN, MIN_RECORD_SIZE, RUN_HEADER_SIZE};

/// Handle to a varchar allocator living inside a block store.
///
/// The handle only remembers where its control record is; every call takes
/// the store it was created in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarcharStore {
    ctrl: u64,
}

impl VarcharStore {
    /// Allocate a control block and start with an empty free list.
    pub fn create(store: &BlockStore) -> Result<Self> {
        let ctrl = store.allocate()?;
        store.with_blocks_mut(ctrl, 1, |buf| {
            CtrlRecord {
                free_len: 0,
                free_head: 0,
            }
            .encode(buf);
            Ok(())
        })?;
        debug!(ctrl, "varchar store created");
        Ok(Self { ctrl })
    }

    /// Attach to an existing control record.
    pub fn open(store: &BlockStore, ctrl: u64) -> Result<Self> {
        let found = store
            .with_blocks(ctrl, 1, |buf| Ok(CtrlRecord::decode(buf)))
            .map_err(|e| StrataError::CorruptMeta(format!("varchar control at {}: {}", ctrl, e)))?;
        match found {
            Some(_) => Ok(Self { ctrl }),
            None => Err(StrataError::CorruptMeta(format!(
                "no varchar control record at offset {}",
                ctrl
            ))),
        }
    }

    /// Offset of the control block, to be recorded by the owner
    pub fn ctrl_offset(&self) -> u64 {
        self.ctrl
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Allocate a run with room for `len` payload bytes, zero filled.
    pub fn alloc(&self, store: &BlockStore, len: usize) -> Result<u64> {
        if len > MAX_RUN_LEN {
            return Err(StrataError::TooLarge {
                size: len,
                limit: MAX_RUN_LEN,
            });
        }
        let full = record_size(len) as u64;

        let (offset, free) = match self.first_fit(store, full)? {
            Some(found) => found,
            None => {
                self.grow(store, full)?;
                self.first_fit(store, full)?.ok_or_else(|| {
                    StrataError::StructuralViolation(format!(
                        "no free record of {} bytes after growing",
                        full
                    ))
                })?
            }
        };

        let remainder = free.length as u64 - full;
        let extra = if remainder >= MIN_RECORD_SIZE as u64 {
            self.relink(
                store,
                offset + full,
                FreeRecord {
                    length: remainder as u32,
                    ..free
                },
            )?;
            full - len as u64 - RUN_HEADER_SIZE as u64
        } else {
            self.unlink(store, &free)?;
            free.length as u64 - len as u64 - RUN_HEADER_SIZE as u64
        };

        let header = RunHeader {
            length: len as u32,
            extra: extra as u32,
            refs: 1,
        };
        self.write_record(store, offset, RUN_HEADER_SIZE, |buf| header.encode(buf))?;
        self.with_bytes_mut(store, offset, |bytes| {
            bytes.fill(0);
            Ok(())
        })?;

        trace!(offset, len, extra, "varchar run allocated");
        Ok(offset)
    }

    /// Release a run. Fails with `InvalidHandle` if `offset` is not a live run.
    pub fn free(&self, store: &BlockStore, offset: u64) -> Result<()> {
        let run = self.read_run(store, offset)?;
        self.insert_free(store, offset, run.span())?;
        trace!(offset, span = run.span(), "varchar run freed");
        Ok(())
    }

    /// Add a reference to a run, returning the new count.
    pub fn ref_run(&self, store: &BlockStore, offset: u64) -> Result<u32> {
        let mut run = self.read_run(store, offset)?;
        run.refs = run.refs.checked_add(1).ok_or_else(|| {
            StrataError::OutOfRange(format!("reference count overflow at {}", offset))
        })?;
        self.write_record(store, offset, RUN_HEADER_SIZE, |buf| run.encode(buf))?;
        Ok(run.refs)
    }

    /// Drop a reference, freeing the run when none remain. Returns whether
    /// the run was freed.
    pub fn deref(&self, store: &BlockStore, offset: u64) -> Result<bool> {
        let mut run = self.read_run(store, offset)?;
        if run.refs <= 1 {
            self.insert_free(store, offset, run.span())?;
            return Ok(true);
        }
        run.refs -= 1;
        self.write_record(store, offset, RUN_HEADER_SIZE, |buf| run.encode(buf))?;
        Ok(false)
    }

    // =========================================================================
    // Payload Access
    // =========================================================================

    /// Header of the run at `offset`
    pub fn run(&self, store: &BlockStore, offset: u64) -> Result<RunHeader> {
        self.read_run(store, offset)
    }

    /// Payload length of the run at `offset`
    pub fn len(&self, store: &BlockStore, offset: u64) -> Result<usize> {
        Ok(self.read_run(store, offset)?.length as usize)
    }

    /// Run `f` over the payload of the run at `offset`.
    pub fn with_bytes<T>(
        &self,
        store: &BlockStore,
        offset: u64,
        f: impl FnOnce(&[u8]) -> Result<T>,
    ) -> Result<T> {
        let run = self.read_run(store, offset)?;
        let (start, count, rel) = self.window(store, offset, RUN_HEADER_SIZE + run.length as usize)?;
        let from = rel + RUN_HEADER_SIZE;
        store.with_blocks(start, count, |buf| f(&buf[from..from + run.length as usize]))
    }

    /// Run `f` over the payload of the run at `offset`, mutably.
    pub fn with_bytes_mut<T>(
        &self,
        store: &BlockStore,
        offset: u64,
        f: impl FnOnce(&mut [u8]) -> Result<T>,
    ) -> Result<T> {
        let run = self.read_run(store, offset)?;
        let (start, count, rel) = self.window(store, offset, RUN_HEADER_SIZE + run.length as usize)?;
        let from = rel + RUN_HEADER_SIZE;
        store.with_blocks_mut(start, count, |buf| {
            f(&mut buf[from..from + run.length as usize])
        })
    }

    /// Copy of the payload of the run at `offset`
    pub fn read(&self, store: &BlockStore, offset: u64) -> Result<Vec<u8>> {
        self.with_bytes(store, offset, |bytes| Ok(bytes.to_vec()))
    }

    /// Overwrite the payload; `data` must be exactly the run's length.
    pub fn write(&self, store: &BlockStore, offset: u64, data: &[u8]) -> Result<()> {
        self.with_bytes_mut(store, offset, |bytes| {
            if bytes.len() != data.len() {
                return Err(StrataError::OutOfRange(format!(
                    "run holds {} bytes, got {}",
                    bytes.len(),
                    data.len()
                )));
            }
            bytes.copy_from_slice(data);
            Ok(())
        })
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Number of records on the free list
    pub fn free_list_len(&self, store: &BlockStore) -> Result<u32> {
        Ok(self.ctrl_record(store)?.free_len)
    }

    /// Free records as `(offset, length)` in list order
    pub fn free_extents(&self, store: &BlockStore) -> Result<Vec<(u64, u32)>> {
        let mut extents = Vec::new();
        let mut cur = self.ctrl_record(store)?.free_head;
        while cur != 0 {
            let free = self.read_free(store, cur)?;
            extents.push((cur, free.length));
            cur = free.next;
        }
        Ok(extents)
    }

    /// Total bytes sitting on the free list
    pub fn free_bytes(&self, store: &BlockStore) -> Result<u64> {
        Ok(self
            .free_extents(store)?
            .iter()
            .map(|&(_, len)| len as u64)
            .sum())
    }

    // =========================================================================
    // Free List
    // =========================================================================

    fn first_fit(&self, store: &BlockStore, full: u64) -> Result<Option<(u64, FreeRecord)>> {
        let mut cur = self.ctrl_record(store)?.free_head;
        while cur != 0 {
            let free = self.read_free(store, cur)?;
            if free.length as u64 >= full {
                return Ok(Some((cur, free)));
            }
            cur = free.next;
        }
        Ok(None)
    }

    fn grow(&self, store: &BlockStore, full: u64) -> Result<()> {
        let block_size = store.block_size() as u64;
        let blocks = full.div_ceil(block_size) as usize;
        let offset = if blocks == 1 {
            store.allocate()?
        } else {
            store.allocate_blocks(blocks)?
        };
        debug!(offset, blocks, "varchar store grown");
        self.insert_free(store, offset, blocks as u64 * block_size)
    }

    /// Put `[offset, offset + length)` on the list in address order and merge
    /// it with adjacent free records.
    fn insert_free(&self, store: &BlockStore, offset: u64, length: u64) -> Result<()> {
        let length = u32::try_from(length).map_err(|_| StrataError::TooLarge {
            size: length as usize,
            limit: u32::MAX as usize,
        })?;

        let mut prev = 0;
        let mut next = self.ctrl_record(store)?.free_head;
        while next != 0 && next < offset {
            prev = next;
            next = self.read_free(store, next)?.next;
        }

        self.write_free(store, offset, &FreeRecord { length, prev, next })?;
        if prev == 0 {
            self.update_ctrl(store, |c| c.free_head = offset)?;
        } else {
            self.set_next(store, prev, offset)?;
        }
        if next != 0 {
            self.set_prev(store, next, offset)?;
        }
        self.update_ctrl(store, |c| c.free_len += 1)?;

        self.coalesce(store, offset)
    }

    fn coalesce(&self, store: &BlockStore, offset: u64) -> Result<()> {
        let mut cur = self.read_free(store, offset)?;

        if cur.next != 0 && offset + cur.length as u64 == cur.next {
            let right = self.read_free(store, cur.next)?;
            if let Some(length) = cur.length.checked_add(right.length) {
                self.unlink(store, &right)?;
                self.clear_tag(store, cur.next)?;
                cur = self.read_free(store, offset)?;
                cur.length = length;
                self.write_free(store, offset, &cur)?;
            }
        }

        if cur.prev != 0 {
            let left_offset = cur.prev;
            let mut left = self.read_free(store, left_offset)?;
            if left_offset + left.length as u64 == offset {
                if let Some(length) = left.length.checked_add(cur.length) {
                    self.unlink(store, &cur)?;
                    self.clear_tag(store, offset)?;
                    left = self.read_free(store, left_offset)?;
                    left.length = length;
                    self.write_free(store, left_offset, &left)?;
                }
            }
        }
        Ok(())
    }

    fn unlink(&self, store: &BlockStore, free: &FreeRecord) -> Result<()> {
        if free.prev == 0 {
            self.update_ctrl(store, |c| c.free_head = free.next)?;
        } else {
            self.set_next(store, free.prev, free.next)?;
        }
        if free.next != 0 {
            self.set_prev(store, free.next, free.prev)?;
        }
        self.update_ctrl(store, |c| c.free_len -= 1)
    }

    /// Re-home a shrunk free record at `new`, keeping its list position.
    fn relink(&self, store: &BlockStore, new: u64, free: FreeRecord) -> Result<()> {
        self.write_free(store, new, &free)?;
        if free.prev == 0 {
            self.update_ctrl(store, |c| c.free_head = new)?;
        } else {
            self.set_next(store, free.prev, new)?;
        }
        if free.next != 0 {
            self.set_prev(store, free.next, new)?;
        }
        Ok(())
    }

    fn set_next(&self, store: &BlockStore, offset: u64, next: u64) -> Result<()> {
        let mut free = self.read_free(store, offset)?;
        free.next = next;
        self.write_free(store, offset, &free)
    }

    fn set_prev(&self, store: &BlockStore, offset: u64, prev: u64) -> Result<()> {
        let mut free = self.read_free(store, offset)?;
        free.prev = prev;
        self.write_free(store, offset, &free)
    }

    // =========================================================================
    // Record Access
    // =========================================================================

    /// Blocks covering `len` bytes from `offset`, plus where `offset` falls
    /// inside the first of them.
    fn window(&self, store: &BlockStore, offset: u64, len: usize) -> Result<(u64, usize, usize)> {
        let block_size = store.block_size() as u64;
        if offset < block_size || offset + len as u64 > store.len() {
            return Err(StrataError::invalid_handle(offset, "outside the varchar region"));
        }
        let rel = (offset % block_size) as usize;
        let count = (rel + len).div_ceil(block_size as usize);
        Ok((offset - rel as u64, count, rel))
    }

    fn read_record(&self, store: &BlockStore, offset: u64) -> Result<Record> {
        let (start, count, rel) = self.window(store, offset, FREE_RECORD_SIZE)?;
        store
            .with_blocks(start, count, |buf| Ok(Record::decode(&buf[rel..])))?
            .ok_or_else(|| StrataError::invalid_handle(offset, "no varchar record here"))
    }

    fn read_run(&self, store: &BlockStore, offset: u64) -> Result<RunHeader> {
        match self.read_record(store, offset)? {
            Record::Run(run) => Ok(run),
            Record::Free(_) => Err(StrataError::invalid_handle(offset, "run is not allocated")),
        }
    }

    fn read_free(&self, store: &BlockStore, offset: u64) -> Result<FreeRecord> {
        match self.read_record(store, offset)? {
            Record::Free(free) => Ok(free),
            Record::Run(_) => Err(StrataError::StructuralViolation(format!(
                "free list points at allocated run {}",
                offset
            ))),
        }
    }

    fn write_record(
        &self,
        store: &BlockStore,
        offset: u64,
        len: usize,
        encode: impl FnOnce(&mut [u8]),
    ) -> Result<()> {
        let (start, count, rel) = self.window(store, offset, len)?;
        store.with_blocks_mut(start, count, |buf| {
            encode(&mut buf[rel..]);
            Ok(())
        })
    }

    fn write_free(&self, store: &BlockStore, offset: u64, free: &FreeRecord) -> Result<()> {
        self.write_record(store, offset, FREE_RECORD_SIZE, |buf| free.encode(buf))
    }

    fn clear_tag(&self, store: &BlockStore, offset: u64) -> Result<()> {
        self.write_record(store, offset, 1, |buf| buf[0] = 0)
    }

    fn ctrl_record(&self, store: &BlockStore) -> Result<CtrlRecord> {
        store
            .with_blocks(self.ctrl, 1, |buf| Ok(CtrlRecord::decode(buf)))?
            .ok_or_else(|| {
                StrataError::CorruptMeta(format!("varchar control at {} was overwritten", self.ctrl))
            })
    }

    fn update_ctrl(&self, store: &BlockStore, f: impl FnOnce(&mut CtrlRecord)) -> Result<()> {
        let mut ctrl = self.ctrl_record(store)?;
        f(&mut ctrl);
        store.with_blocks_mut(self.ctrl, 1, |buf| {
            ctrl.encode(&mut buf[..CTRL_SIZE]);
            Ok(())
        })
    }
}
