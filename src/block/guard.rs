//! Scoped Block Access
//!
//! Guards that hand out a byte view over a run of blocks and track it in a
//! per-block borrow table until they are dropped.

use std::cell::RefCell;
use std::ops::{Deref, DerefMut};

use crate::error::{Result, StrataError};

// =============================================================================
// Borrow Table
// =============================================================================

/// Exclusive borrows are marked with this sentinel; shared ones count up.
const EXCLUSIVE: i32 = -1;

/// Live borrows per block plus a total used to refuse remapping.
#[derive(Debug, Default)]
pub(crate) struct BorrowTable {
    states: Vec<i32>,
    outstanding: usize,
}

impl BorrowTable {
    pub(crate) fn new(blocks: usize) -> Self {
        Self {
            states: vec![0; blocks],
            outstanding: 0,
        }
    }

    pub(crate) fn resize(&mut self, blocks: usize) {
        self.states.resize(blocks, 0);
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub(crate) fn acquire_shared(&mut self, first: usize, count: usize) -> Result<()> {
        let range = first..first + count;
        if let Some(block) = range.clone().find(|&b| self.states[b] == EXCLUSIVE) {
            return Err(StrataError::ResourceBusy(format!(
                "block {} is exclusively borrowed",
                block
            )));
        }
        for b in range {
            self.states[b] += 1;
        }
        self.outstanding += 1;
        Ok(())
    }

    pub(crate) fn acquire_exclusive(&mut self, first: usize, count: usize) -> Result<()> {
        let range = first..first + count;
        if let Some(block) = range.clone().find(|&b| self.states[b] != 0) {
            return Err(StrataError::ResourceBusy(format!(
                "block {} is already borrowed",
                block
            )));
        }
        for b in range {
            self.states[b] = EXCLUSIVE;
        }
        self.outstanding += 1;
        Ok(())
    }

    fn release_shared(&mut self, first: usize, count: usize) {
        for b in first..first + count {
            self.states[b] -= 1;
        }
        self.outstanding -= 1;
    }

    fn release_exclusive(&mut self, first: usize, count: usize) {
        for b in first..first + count {
            self.states[b] = 0;
        }
        self.outstanding -= 1;
    }
}

// =============================================================================
// Guards
// =============================================================================

/// Shared view over `count` blocks starting at `offset`.
pub struct BlockRef<'a> {
    borrows: &'a RefCell<BorrowTable>,
    offset: u64,
    first: usize,
    count: usize,
    ptr: *const u8,
    len: usize,
}

impl<'a> BlockRef<'a> {
    /// # Safety
    /// `ptr..ptr + len` must stay mapped and free of exclusive views for as
    /// long as the borrow recorded in `borrows` is held.
    pub(crate) unsafe fn new(
        borrows: &'a RefCell<BorrowTable>,
        offset: u64,
        first: usize,
        count: usize,
        ptr: *const u8,
        len: usize,
    ) -> Self {
        Self {
            borrows,
            offset,
            first,
            count,
            ptr,
            len,
        }
    }

    /// Byte offset of the first block
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl Deref for BlockRef<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: the store refuses to remap while this borrow is recorded,
        // and the table keeps exclusive views of these blocks out.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl Drop for BlockRef<'_> {
    fn drop(&mut self) {
        self.borrows
            .borrow_mut()
            .release_shared(self.first, self.count);
    }
}

/// Exclusive view over `count` blocks starting at `offset`.
pub struct BlockMut<'a> {
    borrows: &'a RefCell<BorrowTable>,
    offset: u64,
    first: usize,
    count: usize,
    ptr: *mut u8,
    len: usize,
}

impl<'a> BlockMut<'a> {
    /// # Safety
    /// `ptr..ptr + len` must stay mapped and free of any other view for as
    /// long as the borrow recorded in `borrows` is held.
    pub(crate) unsafe fn new(
        borrows: &'a RefCell<BorrowTable>,
        offset: u64,
        first: usize,
        count: usize,
        ptr: *mut u8,
        len: usize,
    ) -> Self {
        Self {
            borrows,
            offset,
            first,
            count,
            ptr,
            len,
        }
    }

    /// Byte offset of the first block
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl Deref for BlockMut<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: see `BlockRef::deref`; this view is the only one.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl DerefMut for BlockMut<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: the exclusive borrow rules out every other view.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl Drop for BlockMut<'_> {
    fn drop(&mut self) {
        self.borrows
            .borrow_mut()
            .release_exclusive(self.first, self.count);
    }
}
