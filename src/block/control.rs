//! Control Block
//!
//! Encodes the header that lives at the start of block 0.

use bytes::{Buf, BufMut};

use crate::error::{Result, StrataError};

/// Magic bytes identifying a strata block file
pub(crate) const MAGIC: &[u8; 4] = b"STRB";

/// Header size: Checksum (4) + BlockSize (4) + FreeLen (4) + Magic (4) + FreeHead (8)
pub(crate) const CONTROL_HEADER_SIZE: usize = 24;

/// Decoded control block header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlHeader {
    /// Block size the file was created with
    pub block_size: u32,
    /// Number of blocks on the free list
    pub free_len: u32,
    /// Offset of the most recently freed block, 0 when the list is empty
    pub free_head: u64,
}

impl ControlHeader {
    pub(crate) fn new(block_size: u32) -> Self {
        Self {
            block_size,
            free_len: 0,
            free_head: 0,
        }
    }

    /// Read the block size from a header prefix without checking anything else.
    pub(crate) fn peek_block_size(prefix: &[u8]) -> Result<u32> {
        if prefix.len() < CONTROL_HEADER_SIZE {
            return Err(StrataError::CorruptMeta(format!(
                "file too short for a control block: {} bytes",
                prefix.len()
            )));
        }
        let mut buf = &prefix[4..8];
        Ok(buf.get_u32_le())
    }

    /// Decode and validate a whole control block.
    pub(crate) fn decode(block: &[u8]) -> Result<Self> {
        let header = Self::decode_unchecked(block)?;

        if header.block_size as usize != block.len() {
            return Err(StrataError::CorruptMeta(format!(
                "control block records block size {} but spans {} bytes",
                header.block_size,
                block.len()
            )));
        }

        let stored = {
            let mut buf = &block[0..4];
            buf.get_u32_le()
        };
        let computed = checksum(block);
        if stored != computed {
            return Err(StrataError::Corruption { stored, computed });
        }

        Ok(header)
    }

    /// Decode the header fields, checking only the magic.
    pub(crate) fn decode_unchecked(block: &[u8]) -> Result<Self> {
        if block.len() < CONTROL_HEADER_SIZE {
            return Err(StrataError::CorruptMeta(
                "control block shorter than its header".to_string(),
            ));
        }

        let mut buf = &block[4..CONTROL_HEADER_SIZE];
        let block_size = buf.get_u32_le();
        let free_len = buf.get_u32_le();
        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        let free_head = buf.get_u64_le();

        if &magic != MAGIC {
            return Err(StrataError::CorruptMeta(format!(
                "invalid magic: expected STRB, got {:?}",
                magic
            )));
        }

        Ok(Self {
            block_size,
            free_len,
            free_head,
        })
    }

    /// Write the header into block 0 and refresh the checksum.
    pub(crate) fn encode(&self, block: &mut [u8]) {
        {
            let mut buf = &mut block[4..CONTROL_HEADER_SIZE];
            buf.put_u32_le(self.block_size);
            buf.put_u32_le(self.free_len);
            buf.put_slice(MAGIC);
            buf.put_u64_le(self.free_head);
        }
        seal(block);
    }
}

/// Recompute and store the checksum of a control block.
pub(crate) fn seal(block: &mut [u8]) {
    let sum = checksum(block);
    let mut buf = &mut block[0..4];
    buf.put_u32_le(sum);
}

fn checksum(block: &[u8]) -> u32 {
    crc32fast::hash(&block[4..])
}
