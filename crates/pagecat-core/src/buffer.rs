//! Page-aligned transfer buffers.
//!
//! [`AlignedBuffer`] owns one `posix_memalign` block and frees it exactly once,
//! either through [`AlignedBuffer::release`] or on drop. The block is
//! zero-filled on acquisition so it can be handed out as `&mut [u8]`.
//!
//! Invariants:
//! - `ptr` is non-null and `ptr as usize % alignment == 0`.
//! - `len >= 1`; the region `[ptr, ptr + len)` is initialized.

use std::io;
use std::ptr::NonNull;

use crate::math::is_power_of_two;
use crate::sys;

/// Smallest alignment `posix_memalign` accepts.
pub const MIN_ALIGNMENT: usize = std::mem::size_of::<*mut libc::c_void>();

/// An owned, fixed-capacity, aligned byte region.
#[derive(Debug)]
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    len: usize,
    alignment: usize,
}

impl AlignedBuffer {
    /// Allocate `len` zeroed bytes aligned to `alignment`.
    ///
    /// `alignment` must be a power of two and a multiple of the pointer size;
    /// `len` must be non-zero. Violations and allocator failures come back as
    /// the errno `posix_memalign` would report (`EINVAL` / `ENOMEM`).
    pub fn with_alignment(len: usize, alignment: usize) -> io::Result<Self> {
        if len == 0 || !is_power_of_two(alignment) || alignment % MIN_ALIGNMENT != 0 {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        let mut raw: *mut libc::c_void = std::ptr::null_mut();
        // SAFETY: `raw` is a valid out-pointer; alignment was checked above.
        let rc = unsafe { libc::posix_memalign(&mut raw, alignment, len) };
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
        let Some(ptr) = NonNull::new(raw.cast::<u8>()) else {
            return Err(io::Error::from_raw_os_error(libc::ENOMEM));
        };
        // SAFETY: posix_memalign returned `len` writable bytes at `ptr`.
        unsafe { std::ptr::write_bytes(ptr.as_ptr(), 0, len) };
        Ok(Self {
            ptr,
            len,
            alignment,
        })
    }

    /// Allocate `len` zeroed bytes on a page boundary.
    pub fn page_aligned(len: usize) -> io::Result<Self> {
        Self::with_alignment(len, sys::page_size())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; zero-length buffers are rejected at acquisition.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: invariants above; shared borrow of self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: invariants above; unique borrow of self.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Return the memory to the system now.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        // SAFETY: `ptr` came from posix_memalign and ownership is unique, so
        // this is the only free.
        unsafe { libc::free(self.ptr.as_ptr().cast()) };
    }
}

/// Source of transfer buffers.
///
/// The engine asks for exactly one buffer per invocation.
pub trait BufferAllocator {
    /// Alignment this allocator guarantees.
    fn alignment(&self) -> usize;

    /// Allocate a buffer of `len` bytes.
    fn acquire(&self, len: usize) -> io::Result<AlignedBuffer>;
}

/// Allocator backed by `posix_memalign`.
///
/// The page size is queried on every acquisition rather than taken from the
/// advisor, so a wrong plan cannot produce a misaligned buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageAllocator {
    page_aligned: bool,
}

impl PageAllocator {
    #[must_use]
    pub const fn new(page_aligned: bool) -> Self {
        Self { page_aligned }
    }
}

impl Default for PageAllocator {
    fn default() -> Self {
        Self::new(true)
    }
}

impl BufferAllocator for PageAllocator {
    fn alignment(&self) -> usize {
        if self.page_aligned {
            sys::page_size()
        } else {
            MIN_ALIGNMENT
        }
    }

    fn acquire(&self, len: usize) -> io::Result<AlignedBuffer> {
        AlignedBuffer::with_alignment(len, self.alignment())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_aligned_buffer_is_aligned_and_zeroed() {
        let buf = AlignedBuffer::page_aligned(3 * 4096 + 17).unwrap();
        let page = sys::page_size();
        assert_eq!(buf.as_ptr() as usize % page, 0);
        assert_eq!(buf.alignment(), page);
        assert_eq!(buf.len(), 3 * 4096 + 17);
        assert!(!buf.is_empty());
        assert!(buf.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn buffer_is_writable_end_to_end() {
        let mut buf = AlignedBuffer::page_aligned(8192).unwrap();
        let slice = buf.as_mut_slice();
        slice[0] = 0xAA;
        slice[8191] = 0x55;
        assert_eq!(buf.as_slice()[0], 0xAA);
        assert_eq!(buf.as_slice()[8191], 0x55);
        buf.release();
    }

    #[test]
    fn zero_length_is_einval() {
        let err = AlignedBuffer::page_aligned(0).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EINVAL));
    }

    #[test]
    fn bad_alignment_is_einval() {
        for align in [0, 3, 24, 1] {
            let err = AlignedBuffer::with_alignment(64, align).unwrap_err();
            assert_eq!(err.raw_os_error(), Some(libc::EINVAL), "align {align}");
        }
    }

    #[test]
    fn impossible_size_is_enomem() {
        let err = AlignedBuffer::with_alignment(usize::MAX - 4096, 4096).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOMEM));
    }

    #[test]
    fn unaligned_allocator_uses_pointer_alignment() {
        let alloc = PageAllocator::new(false);
        assert_eq!(alloc.alignment(), MIN_ALIGNMENT);
        let buf = alloc.acquire(1).unwrap();
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.as_ptr() as usize % MIN_ALIGNMENT, 0);
    }

    #[test]
    fn default_allocator_is_page_aligned() {
        let alloc = PageAllocator::default();
        assert_eq!(alloc.alignment(), sys::page_size());
        let buf = alloc.acquire(100).unwrap();
        assert_eq!(buf.as_ptr() as usize % sys::page_size(), 0);
    }

    #[test]
    fn many_acquire_release_cycles() {
        let alloc = PageAllocator::default();
        for len in [1usize, 512, 4096, 65536, 1 << 20] {
            let buf = alloc.acquire(len).unwrap();
            assert_eq!(buf.len(), len);
            drop(buf);
        }
    }
}
