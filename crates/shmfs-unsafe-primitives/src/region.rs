//! Raw memory regions that can host a segment.
//!
//! A region is a fixed-size, 8-byte aligned block of memory that stays mapped
//! for as long as the region value lives. [`SharedSegment`] is the production
//! region; [`HeapRegion`] provides the same contract from process-private heap
//! memory so the engine can be exercised without SysV IPC.
//!
//! # Safety Invariants
//!
//! 1. **Stable base**: `base()` never changes for the life of the value
//! 2. **Valid length**: `len()` bytes starting at `base()` are readable and writable
//! 3. **Alignment**: `base()` is aligned to 8 bytes
//!
//! [`SharedSegment`]: crate::segment::SharedSegment

use core::ptr::NonNull;
use std::io;
use std::sync::Arc;

/// A block of memory a [`Segment`](crate::sync::Segment) can be laid over.
///
/// # Safety
///
/// Implementors must uphold the module-level invariants: the pointer returned
/// by `base` is 8-byte aligned and valid for reads and writes of `len` bytes
/// until the value is dropped or consumed by `remove`.
pub unsafe trait Region {
    /// Base address of the region.
    fn base(&self) -> NonNull<u8>;

    /// Length of the region in bytes.
    fn len(&self) -> usize;

    /// Whether the region is zero-length.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release the region and ask the operating system to discard it.
    ///
    /// Process-private regions simply drop.
    fn remove(self) -> io::Result<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

// SAFETY: the Arc keeps the inner region alive, so its invariants carry over.
unsafe impl<R: Region> Region for Arc<R> {
    fn base(&self) -> NonNull<u8> {
        (**self).base()
    }

    fn len(&self) -> usize {
        (**self).len()
    }

    /// Removes the inner region only when this is the last handle.
    fn remove(self) -> io::Result<()> {
        match Arc::try_unwrap(self) {
            Ok(region) => region.remove(),
            Err(_) => Ok(()),
        }
    }
}

// ============================================================================
// Heap-backed region
// ============================================================================

/// Zero-initialized, word-aligned heap memory implementing [`Region`].
///
/// Two [`Segment`](crate::sync::Segment) handles can share one heap region
/// through an `Arc<HeapRegion>`, which is how tests model several attachments
/// without creating IPC objects.
pub struct HeapRegion {
    ptr: NonNull<u64>,
    words: usize,
}

impl HeapRegion {
    /// Allocate a zeroed region of at least `len` bytes (rounded up to 8).
    pub fn new(len: usize) -> Self {
        let words = len.div_ceil(8).max(1);
        let boxed: Box<[u64]> = vec![0u64; words].into_boxed_slice();
        let raw = Box::into_raw(boxed) as *mut u64;
        // SAFETY: Box::into_raw never returns null.
        let ptr = unsafe { NonNull::new_unchecked(raw) };
        Self { ptr, words }
    }
}

// SAFETY: the allocation is owned, word aligned and `words * 8` bytes long
// until Drop reconstructs and frees the Box.
unsafe impl Region for HeapRegion {
    fn base(&self) -> NonNull<u8> {
        self.ptr.cast()
    }

    fn len(&self) -> usize {
        self.words * 8
    }
}

impl Drop for HeapRegion {
    fn drop(&mut self) {
        let slice = core::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.words);
        // SAFETY: `slice` is exactly the pointer/length produced by
        // Box::into_raw in `new`, and Drop runs once.
        drop(unsafe { Box::from_raw(slice) });
    }
}

// SAFETY: the region is plain memory; all concurrent access goes through the
// segment lock or atomics.
unsafe impl Send for HeapRegion {}
unsafe impl Sync for HeapRegion {}

impl core::fmt::Debug for HeapRegion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HeapRegion")
            .field("base", &self.ptr)
            .field("len", &self.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_region_rounds_up_and_aligns() {
        let region = HeapRegion::new(13);
        assert_eq!(region.len(), 16);
        assert_eq!(region.base().as_ptr() as usize % 8, 0);
    }

    #[test]
    fn test_heap_region_is_zeroed() {
        let region = HeapRegion::new(4096);
        let bytes =
            unsafe { core::slice::from_raw_parts(region.base().as_ptr(), region.len()) };
        assert!(bytes.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_arc_region_remove_keeps_other_handles() {
        let shared = Arc::new(HeapRegion::new(64));
        let other = Arc::clone(&shared);
        shared.remove().unwrap();
        assert_eq!(other.len(), 64);
        other.remove().unwrap();
    }

    fn _assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_heap_region_send_sync() {
        _assert_send_sync::<HeapRegion>();
        _assert_send_sync::<Arc<HeapRegion>>();
    }
}
