//! Little-endian field access over block bytes
//!
//! Every on-disk header in the crate is read and written through these
//! helpers, so no structure is ever reinterpreted in place. Offsets are
//! trusted: callers only pass positions inside a header they already sized.

use bytes::{Buf, BufMut};

pub(crate) fn read_u16(buf: &[u8], at: usize) -> u16 {
    let mut src = &buf[at..at + 2];
    src.get_u16_le()
}

pub(crate) fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut src = &buf[at..at + 4];
    src.get_u32_le()
}

pub(crate) fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut src = &buf[at..at + 8];
    src.get_u64_le()
}

pub(crate) fn write_u16(buf: &mut [u8], at: usize, value: u16) {
    let mut dst = &mut buf[at..at + 2];
    dst.put_u16_le(value);
}

pub(crate) fn write_u32(buf: &mut [u8], at: usize, value: u32) {
    let mut dst = &mut buf[at..at + 4];
    dst.put_u32_le(value);
}

pub(crate) fn write_u64(buf: &mut [u8], at: usize, value: u64) {
    let mut dst = &mut buf[at..at + 8];
    dst.put_u64_le(value);
}
