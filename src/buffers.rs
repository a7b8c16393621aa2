// Copyright 2021 TiKV Project Authors. TSC reliability/calibration algorithms
// adapted from Andrey Nevolin's wtmlib. Licensed under MIT.

//! Cache-aligned per-CPU sample buffers.
//!
//! Every array that a worker writes to concurrently with other workers must
//! occupy cache lines that no other worker's array touches, or writes to
//! neighboring arrays will ping-pong a shared line between cores. The
//! pointer table that indexes the per-CPU arrays is read-only once sampling
//! starts, so it doesn't need this treatment — only the arrays themselves
//! do.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

use crate::error::WtmError;

/// A `Vec<u64>`-like buffer whose backing allocation starts on a cache-line
/// boundary and is padded up to a whole number of cache lines, so it never
/// shares a line with a neighboring buffer allocated the same way.
pub struct CacheAlignedBuffer {
    ptr: NonNull<u64>,
    len: usize,
    layout: Layout,
}

unsafe impl Send for CacheAlignedBuffer {}

impl CacheAlignedBuffer {
    /// Allocates room for `len` `u64` samples, aligned and padded to
    /// `cache_line_size` bytes. Allocation failure is a generic error, not a
    /// panic, matching how the original treats `calloc` failure as a
    /// recoverable condition rather than an abort.
    pub fn new(len: usize, cache_line_size: usize) -> Result<Self, WtmError> {
        let elem_size = std::mem::size_of::<u64>();
        let min_bytes = len * elem_size;
        let padded_bytes = round_up(min_bytes.max(1), cache_line_size);
        let layout = Layout::from_size_align(padded_bytes, cache_line_size)
            .map_err(|e| WtmError::generic(format!("invalid sample buffer layout: {}", e)))?;
        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr as *mut u64)
            .ok_or_else(|| WtmError::generic("couldn't allocate a sample buffer"))?;
        Ok(CacheAlignedBuffer { ptr, len, layout })
    }

    #[inline]
    pub fn as_slice(&self) -> &[u64] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u64] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for CacheAlignedBuffer {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr() as *mut u8, self.layout) }
    }
}

fn round_up(n: usize, multiple: usize) -> usize {
    ((n + multiple - 1) / multiple) * multiple
}

/// `num_buffers` independent [`CacheAlignedBuffer`]s of `len` samples each,
/// none of them sharing a cache line.
pub fn allocate_sample_buffers(
    num_buffers: usize,
    len: usize,
    cache_line_size: usize,
) -> Result<Vec<CacheAlignedBuffer>, WtmError> {
    (0..num_buffers)
        .map(|_| CacheAlignedBuffer::new(len, cache_line_size))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_are_cache_line_aligned_and_sized() {
        let bufs = allocate_sample_buffers(4, 7, 64).unwrap();
        for buf in &bufs {
            let addr = buf.as_slice().as_ptr() as usize;
            assert_eq!(addr % 64, 0);
            assert_eq!(buf.len(), 7);
        }
    }

    #[test]
    fn buffers_are_readable_and_writable() {
        let mut bufs = allocate_sample_buffers(2, 3, 64).unwrap();
        bufs[0].as_mut_slice()[1] = 42;
        assert_eq!(bufs[0].as_slice(), &[0, 42, 0]);
        assert_eq!(bufs[1].as_slice(), &[0, 0, 0]);
    }
}
