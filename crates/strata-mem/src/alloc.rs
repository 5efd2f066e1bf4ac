//! The allocation interface shared by arenas and the process heap.
//!
//! [`BlockAlloc`] is implemented by [`Arena`](crate::Arena) and by
//! [`Heap`]. Both put a [`BlockHeader`](crate::header) in front of every
//! block, so a block's capacity can always be recovered from its pointer
//! and a block released through the wrong allocator is caught instead of
//! corrupting memory.

use std::alloc::{self, Layout};
use std::ptr::{self, NonNull};

use crate::error::{Error, Result};
use crate::header::{self, BLOCK_ALIGN, BlockHeader, HEADER_SIZE};

/// Layout of a system block holding a header and `payload` bytes.
pub(crate) fn block_layout(payload: usize) -> Result<Layout> {
    let size = HEADER_SIZE
        .checked_add(payload)
        .ok_or(Error::SizeOverflow { size: payload, count: 1 })?;
    Layout::from_size_align(size, BLOCK_ALIGN)
        .map_err(|_| Error::SizeOverflow { size: payload, count: 1 })
}

/// Allocates `layout` from the system allocator.
pub(crate) fn system_alloc(layout: Layout) -> Result<NonNull<u8>> {
    debug_assert!(layout.size() > 0);
    // SAFETY: every layout built by this crate has a non-zero size.
    let raw = unsafe { alloc::alloc(layout) };
    NonNull::new(raw).ok_or(Error::OutOfMemory { size: layout.size() })
}

/// # Safety
///
/// `ptr` must come from [`system_alloc`] with the same `layout`.
pub(crate) unsafe fn system_free(ptr: NonNull<u8>, layout: Layout) {
    // SAFETY: forwarded from the caller.
    unsafe { alloc::dealloc(ptr.as_ptr(), layout) }
}

/// Total byte size of `count` elements of `size` bytes.
#[inline]
pub(crate) fn total_size(size: usize, count: usize) -> Result<usize> {
    size.checked_mul(count)
        .ok_or(Error::SizeOverflow { size, count })
}

/// Copies `src` into `dst`, or zeroes `len` bytes when there is no source.
///
/// # Safety
///
/// `dst` must be valid for `len` bytes of writes and must not overlap
/// `src`.
pub(crate) unsafe fn copy_or_zero(dst: NonNull<u8>, src: Option<&[u8]>, len: usize) {
    // SAFETY: forwarded from the caller.
    unsafe {
        match src {
            Some(bytes) => {
                debug_assert_eq!(bytes.len(), len);
                ptr::copy_nonoverlapping(bytes.as_ptr(), dst.as_ptr(), len);
            }
            None => ptr::write_bytes(dst.as_ptr(), 0, len),
        }
    }
}

/// An allocator whose blocks carry a [`capacity_of`](crate::capacity_of)
/// header.
///
/// Blocks are aligned to 16 bytes. Only `alloc_uninit` and `free` are
/// required; zeroed, copying and resizing allocation are built on top.
pub trait BlockAlloc {
    /// Allocates `count * size` uninitialized bytes.
    ///
    /// # Errors
    ///
    /// [`Error::SizeOverflow`] if the total does not fit in `usize`,
    /// [`Error::OutOfMemory`] if the system allocator fails.
    fn alloc_uninit(&mut self, size: usize, count: usize) -> Result<NonNull<u8>>;

    /// Releases a block.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this allocator, must not have been
    /// released already, and must not be used afterwards.
    ///
    /// # Panics
    ///
    /// Implementations panic when they can tell that `ptr` was already
    /// released or belongs to a different kind of allocator.
    unsafe fn free(&mut self, ptr: NonNull<u8>);

    /// Allocates `count * size` zeroed bytes.
    fn alloc_zeroed(&mut self, size: usize, count: usize) -> Result<NonNull<u8>> {
        let total = total_size(size, count)?;
        let ptr = self.alloc_uninit(size, count)?;
        // SAFETY: the block was just allocated with at least `total` bytes.
        unsafe { copy_or_zero(ptr, None, total) };
        Ok(ptr)
    }

    /// Allocates a block holding a copy of `items`.
    fn alloc_copy<T: Copy>(&mut self, items: &[T]) -> Result<NonNull<T>> {
        assert!(
            std::mem::align_of::<T>() <= BLOCK_ALIGN,
            "alignment {} exceeds block alignment",
            std::mem::align_of::<T>()
        );
        let ptr = self.alloc_uninit(std::mem::size_of_val(items), 1)?.cast::<T>();
        // SAFETY: the block holds `items.len()` elements and is fresh.
        unsafe {
            ptr::copy_nonoverlapping(items.as_ptr(), ptr.as_ptr(), items.len());
        }
        Ok(ptr)
    }

    /// Allocates a NUL-terminated copy of `s`.
    fn alloc_str(&mut self, s: &str) -> Result<NonNull<u8>> {
        let len = s.len();
        let ptr = self.alloc_uninit(1, len + 1)?;
        // SAFETY: the block holds `len + 1` bytes and is fresh.
        unsafe {
            ptr::copy_nonoverlapping(s.as_ptr(), ptr.as_ptr(), len);
            ptr.as_ptr().add(len).write(0);
        }
        Ok(ptr)
    }

    /// Resizes a block to hold `count * size` bytes.
    ///
    /// `None` allocates a fresh block. A block that is already large enough
    /// is returned unchanged. Otherwise a new block of at least twice the
    /// old capacity (and never less than the request) is allocated, the
    /// old capacity is copied over, and the old block is released.
    ///
    /// # Safety
    ///
    /// A `Some` pointer must satisfy the contract of [`BlockAlloc::free`].
    /// On success it must not be used again unless it was returned.
    unsafe fn realloc(
        &mut self,
        ptr: Option<NonNull<u8>>,
        size: usize,
        count: usize,
    ) -> Result<NonNull<u8>> {
        let total = total_size(size, count)?;
        let Some(old) = ptr else {
            return self.alloc_uninit(size, count);
        };

        // SAFETY: forwarded from the caller.
        let capacity = unsafe { header::capacity_of(old) };
        if total <= capacity {
            return Ok(old);
        }

        let new_capacity = capacity.saturating_mul(2).max(total);
        let new = self.alloc_uninit(1, new_capacity)?;
        // SAFETY: both blocks hold at least `capacity` bytes and are
        // distinct allocations; `old` is released exactly once.
        unsafe {
            ptr::copy_nonoverlapping(old.as_ptr(), new.as_ptr(), capacity);
            self.free(old);
        }
        Ok(new)
    }
}

/// The process heap with the arena header convention.
///
/// This is the "no arena" allocator: blocks are individually allocated
/// from the system and are never released implicitly.
///
/// ```
/// use strata_mem::{capacity_of, BlockAlloc, Heap};
///
/// let mut heap = Heap;
/// let ptr = heap.alloc_zeroed(4, 8).unwrap();
/// unsafe {
///     assert_eq!(capacity_of(ptr), 32);
///     heap.free(ptr);
/// }
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct Heap;

impl BlockAlloc for Heap {
    fn alloc_uninit(&mut self, size: usize, count: usize) -> Result<NonNull<u8>> {
        let total = total_size(size, count)?;
        let layout = block_layout(total)?;
        let block = system_alloc(layout)?.cast::<BlockHeader>();
        // SAFETY: the block is fresh, aligned and at least one header long.
        unsafe {
            header::write(block, BlockHeader::Heap { capacity: total });
            Ok(header::payload_of(block))
        }
    }

    unsafe fn free(&mut self, ptr: NonNull<u8>) {
        // SAFETY: forwarded from the caller.
        let block = unsafe { header::header_of(ptr) };
        let capacity = match unsafe { header::read(block) } {
            BlockHeader::Heap { capacity } => capacity,
            other => panic!("heap free of non-heap block {ptr:p} ({other:?})"),
        };
        let Ok(layout) = block_layout(capacity) else {
            unreachable!("heap block {ptr:p} has an unrepresentable capacity");
        };
        // SAFETY: heap blocks are allocated with exactly this layout and
        // their capacity is never rewritten.
        unsafe { system_free(block.cast(), layout) };
    }
}
