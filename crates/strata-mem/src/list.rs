//! Growable sequences stored in allocator blocks.
//!
//! An [`ArenaList`] is a pointer and a length. The capacity lives in the
//! block header, so growing goes through [`BlockAlloc::realloc`] and
//! reuses the block whenever it already has room. The list does not
//! remember its allocator: every call that touches storage takes it
//! explicitly, which lets many lists share one arena.
//!
//! ```
//! use strata_mem::{Arena, ArenaList};
//!
//! let mut arena = Arena::new().unwrap();
//! let mut list = ArenaList::new();
//! unsafe {
//!     list.push_n(&mut arena, &[1u32, 2, 3]).unwrap();
//!     list.push(&mut arena, 4).unwrap();
//!     assert_eq!(list.swap_remove(0), Ok(1));
//!     assert_eq!(list.as_slice(), &[4, 2, 3]);
//!     assert_eq!(list.pop(), Some(3));
//! }
//! ```

use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::ptr::{self, NonNull};
use std::slice;

use crate::alloc::BlockAlloc;
use crate::error::{Error, Result};
use crate::header::BLOCK_ALIGN;

/// A growable sequence of `Copy` values in a block of some allocator.
///
/// # Safety
///
/// Methods that read or write elements are `unsafe`: the caller must keep
/// the allocator that owns the storage alive, and must always pass that
/// same allocator to the methods that take one.
#[derive(Debug)]
pub struct ArenaList<T> {
    data: Option<NonNull<T>>,
    len: usize,
    _marker: PhantomData<T>,
}

impl<T: Copy> ArenaList<T> {
    const ELEMENT_FITS: () = {
        assert!(size_of::<T>() != 0, "zero-sized list elements are not supported");
        assert!(align_of::<T>() <= BLOCK_ALIGN, "list element alignment exceeds block alignment");
    };

    /// Creates an empty list without allocating.
    #[must_use]
    pub const fn new() -> Self {
        let () = Self::ELEMENT_FITS;
        ArenaList {
            data: None,
            len: 0,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends `item`, growing the block if needed.
    ///
    /// # Errors
    ///
    /// Any error of [`BlockAlloc::realloc`]; the list is unchanged.
    ///
    /// # Safety
    ///
    /// See the type-level documentation.
    pub unsafe fn push<A: BlockAlloc + ?Sized>(&mut self, alloc: &mut A, item: T) -> Result<()> {
        // SAFETY: forwarded from the caller.
        let data = unsafe { self.reserve(alloc, 1)? };
        unsafe { data.add(self.len).write(item) };
        self.len += 1;
        Ok(())
    }

    /// Appends every element of `items`.
    ///
    /// # Errors
    ///
    /// Any error of [`BlockAlloc::realloc`]; the list is unchanged.
    ///
    /// # Safety
    ///
    /// See the type-level documentation.
    pub unsafe fn push_n<A: BlockAlloc + ?Sized>(&mut self, alloc: &mut A, items: &[T]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        // SAFETY: forwarded from the caller; `items` cannot overlap the
        // spare capacity it is copied into.
        let data = unsafe { self.reserve(alloc, items.len())? };
        unsafe {
            ptr::copy_nonoverlapping(items.as_ptr(), data.add(self.len).as_ptr(), items.len());
        }
        self.len += items.len();
        Ok(())
    }

    /// Removes and returns the last element.
    ///
    /// # Safety
    ///
    /// See the type-level documentation.
    pub unsafe fn pop(&mut self) -> Option<T> {
        let data = self.data?;
        self.len = self.len.checked_sub(1)?;
        // SAFETY: `len` was in bounds before the decrement.
        Some(unsafe { data.add(self.len).read() })
    }

    /// Removes the last `n` elements and returns them in their original
    /// order. The slice stays readable until the list is next modified.
    ///
    /// Returns `None`, leaving the list untouched, if fewer than `n`
    /// elements are present.
    ///
    /// # Safety
    ///
    /// See the type-level documentation.
    pub unsafe fn pop_n(&mut self, n: usize) -> Option<&[T]> {
        let len = self.len.checked_sub(n)?;
        self.len = len;
        match self.data {
            // SAFETY: the popped elements are still initialized storage.
            Some(data) => Some(unsafe { slice::from_raw_parts(data.add(len).as_ptr(), n) }),
            None => Some(&[]),
        }
    }

    /// Removes the element at `index` by moving the last element into its
    /// place. Order is not preserved.
    ///
    /// # Errors
    ///
    /// [`Error::IndexOutOfBounds`] if `index >= len`.
    ///
    /// # Safety
    ///
    /// See the type-level documentation.
    pub unsafe fn swap_remove(&mut self, index: usize) -> Result<T> {
        let len = self.len;
        let data = match self.data {
            Some(data) if index < len => data,
            _ => return Err(Error::IndexOutOfBounds { index, len }),
        };
        // SAFETY: `index` and `len - 1` are both in bounds.
        unsafe {
            let removed = data.add(index).read();
            let last = data.add(len - 1).read();
            data.add(index).write(last);
            self.len = len - 1;
            Ok(removed)
        }
    }

    /// # Safety
    ///
    /// See the type-level documentation.
    #[must_use]
    pub unsafe fn get(&self, index: usize) -> Option<T> {
        let data = self.data?;
        // SAFETY: bounds checked just below.
        (index < self.len).then(|| unsafe { data.add(index).read() })
    }

    /// # Safety
    ///
    /// See the type-level documentation.
    #[must_use]
    pub unsafe fn as_slice(&self) -> &[T] {
        match self.data {
            // SAFETY: the first `len` elements are initialized.
            Some(data) => unsafe { slice::from_raw_parts(data.as_ptr(), self.len) },
            None => &[],
        }
    }

    /// Releases the storage back to `alloc`.
    ///
    /// # Safety
    ///
    /// See the type-level documentation.
    pub unsafe fn release<A: BlockAlloc + ?Sized>(self, alloc: &mut A) {
        if let Some(data) = self.data {
            // SAFETY: the block came from `alloc` and is released once.
            unsafe { alloc.free(data.cast()) };
        }
    }

    /// Makes room for `extra` more elements and returns the storage.
    unsafe fn reserve<A: BlockAlloc + ?Sized>(&mut self, alloc: &mut A, extra: usize) -> Result<NonNull<T>> {
        let count = self.len.checked_add(extra).ok_or(Error::SizeOverflow {
            size: size_of::<T>(),
            count: usize::MAX,
        })?;
        // SAFETY: forwarded from the caller.
        let data = unsafe { alloc.realloc(self.data.map(NonNull::cast), size_of::<T>(), count)? };
        let data = data.cast::<T>();
        self.data = Some(data);
        Ok(data)
    }
}

impl<T: Copy> Default for ArenaList<T> {
    fn default() -> Self {
        Self::new()
    }
}
