//! Hierarchical region arenas.
//!
//! An [`Arena`] hands out 16-byte aligned blocks from three sources:
//!
//! - **Small blocks** (footprint up to [`SMALL_LIMIT`]) are carved from the
//!   current page with a bump cursor. Released small blocks go onto the free
//!   list of their size class and are reused before the cursor moves again.
//! - **Big blocks** come from the system allocator and are linked into the
//!   arena's big-block ring, so they can be released one by one or all at
//!   teardown.
//! - **Pages** are big blocks too. When the current page cannot fit a
//!   bucket, a new page is allocated with a size hint that doubles up to
//!   [`ArenaConfig::max_page_size`].
//!
//! On top of that every arena keeps a registry of deferred cleanups. A
//! cleanup is either a finalizer closure or a *child arena*. Dropping an
//! arena runs its cleanups most recent first, which tears down children
//! before their parent, and only then returns its pages to the system.
//!
//! # Examples
//!
//! ```
//! use std::cell::Cell;
//! use strata_mem::{Arena, BlockAlloc};
//!
//! let closed = Cell::new(false);
//! {
//!     let mut arena = Arena::new().unwrap();
//!     let child = arena.create_child().unwrap();
//!
//!     let name = arena.child_mut(child).alloc_str("request-42").unwrap();
//!     arena.defer(|| closed.set(true)).unwrap();
//!
//!     unsafe { assert_eq!(*name.as_ptr(), b'r') };
//! }
//! assert!(closed.get());
//! ```

use std::alloc::Layout;
use std::fmt;
use std::marker::PhantomData;
use std::mem::{MaybeUninit, align_of, size_of};
use std::ptr::{self, NonNull};

use strata_log::{debug, trace};

use crate::alloc::{self as raw, BlockAlloc};
use crate::big::{BigRing, SystemBlock};
use crate::defer::{Cleanup, Registry, SlotId};
use crate::error::{Error, Result};
use crate::factory::ArenaConfig;
use crate::header::{self, BLOCK_ALIGN, BlockHeader, HEADER_SIZE};
use crate::size_class::{self, NUM_CLASSES, QUANTUM, SMALL_LIMIT, SizeClass};

/// Prefix stored in front of blocks from [`Arena::defer_alloc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(align(16))]
enum DeferTag {
    /// The block's finalizer is registered in `SlotId`.
    Armed(SlotId),
    /// The finalizer was cancelled; the block is plain memory now.
    Detached,
}

const DEFER_TAG_SIZE: usize = size_of::<DeferTag>();

const _: () = assert!(DEFER_TAG_SIZE == QUANTUM);

/// Handle to a child arena owned by another arena.
///
/// Ids are generation checked: once the child is destroyed or detached,
/// using its id again panics instead of reaching another arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChildId(SlotId);

/// Arena statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaStats {
    /// Pages allocated after the first one.
    pub pages_grown: usize,
    /// Live big blocks, grown pages included.
    pub big_blocks: usize,
    /// Registered finalizers, child arenas excluded.
    pub deferred: usize,
    /// Child arenas owned by this arena.
    pub children: usize,
    /// Released small blocks waiting on free lists.
    pub free_small_blocks: usize,
    /// Bytes left behind the bump cursor of the current page.
    pub page_remaining: usize,
}

#[derive(Debug, Clone, Copy)]
struct Page {
    base: NonNull<u8>,
    pos: usize,
    size: usize,
}

impl Page {
    fn remaining(&self) -> usize {
        self.size - self.pos
    }

    /// Takes `chunk` bytes from the cursor, if they fit.
    fn carve(&mut self, chunk: usize) -> Option<NonNull<BlockHeader>> {
        if self.remaining() < chunk {
            return None;
        }
        // SAFETY: `pos + chunk <= size`, so the block is inside the page.
        let block = unsafe { self.base.add(self.pos) };
        self.pos += chunk;
        Some(block.cast())
    }
}

/// Where the first page of an arena came from.
#[derive(Debug, Clone, Copy)]
enum Backing {
    /// Allocated from the system by this arena.
    Owned(SystemBlock),
    /// Caller storage, borrowed for the arena's lifetime.
    Borrowed,
}

/// A region allocator with size-classed free lists, a big-block ring,
/// deferred cleanups and child arenas.
///
/// The lifetime `'a` bounds everything the arena may reference: caller
/// storage for in-place arenas and the captures of registered finalizers.
/// Heap-backed root arenas from [`Arena::new`] start out as
/// `Arena<'static>`, and the lifetime shrinks as shorter-lived finalizers
/// are registered.
///
/// # Thread Safety
///
/// `Arena` is neither `Send` nor `Sync`. Use one arena per thread.
pub struct Arena<'a> {
    config: ArenaConfig,
    page: Page,
    /// Last page-size hint; the next grown page uses twice this, capped.
    next_page_size: usize,
    backing: Backing,
    free_lists: [Option<NonNull<BlockHeader>>; NUM_CLASSES],
    big: BigRing,
    defers: Registry<Cleanup<'a>>,
    pages_grown: usize,
    _storage: PhantomData<&'a mut [MaybeUninit<u8>]>,
}

impl Arena<'static> {
    /// Creates a heap-backed root arena with the default [`ArenaConfig`].
    ///
    /// # Errors
    ///
    /// [`Error::OutOfMemory`] if the first page cannot be allocated.
    pub fn new() -> Result<Self> {
        Self::with_config(ArenaConfig::default())
    }

    /// Creates a heap-backed root arena.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] if `config` does not validate,
    /// [`Error::OutOfMemory`] if the first page cannot be allocated.
    pub fn with_config(config: ArenaConfig) -> Result<Self> {
        config.validate()?;
        let arena = Self::heap_backed(config)?;
        debug!(
            "created root arena with a {} byte first page",
            config.first_page_size
        );
        Ok(arena)
    }

    /// Allocates a first page of `config.first_page_size` bytes that the
    /// new arena owns and frees itself, wherever the arena value ends up.
    fn heap_backed(config: ArenaConfig) -> Result<Self> {
        let layout = Layout::from_size_align(config.first_page_size, BLOCK_ALIGN).map_err(|_| {
            Error::InvalidConfig {
                reason: "first page size does not fit an allocation",
            }
        })?;
        let ptr = raw::system_alloc(layout)?;
        Ok(Arena::from_parts(
            config,
            Backing::Owned(SystemBlock { ptr, layout }),
            ptr,
            layout.size(),
        ))
    }
}

impl<'a> Arena<'a> {
    /// Creates a root arena whose first page is `storage`.
    ///
    /// The storage does not need to be aligned; the arena skips up to the
    /// next 16-byte boundary. Storage too small for any block is fine: the
    /// first allocation simply grows a heap page.
    ///
    /// ```
    /// use std::mem::MaybeUninit;
    /// use strata_mem::{Arena, BlockAlloc};
    ///
    /// let mut storage = [MaybeUninit::<u8>::uninit(); 1024];
    /// let mut arena = Arena::in_place(&mut storage);
    /// let ptr = arena.alloc_uninit(8, 8).unwrap();
    /// assert_eq!(arena.stats().pages_grown, 0);
    /// # let _ = ptr;
    /// ```
    #[must_use]
    pub fn in_place(storage: &'a mut [MaybeUninit<u8>]) -> Self {
        Self::in_place_unchecked(storage, ArenaConfig::default())
    }

    /// [`Arena::in_place`] with an explicit growth configuration.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] if `config` does not validate.
    pub fn in_place_with_config(
        storage: &'a mut [MaybeUninit<u8>],
        config: ArenaConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::in_place_unchecked(storage, config))
    }

    /// `config` must already be validated.
    pub(crate) fn in_place_unchecked(
        storage: &'a mut [MaybeUninit<u8>],
        config: ArenaConfig,
    ) -> Self {
        let size = storage.len();
        let base = NonNull::from(storage).cast::<u8>();
        let mut arena = Arena::from_parts(config, Backing::Borrowed, base, size);
        arena.page.pos = base.as_ptr().align_offset(BLOCK_ALIGN).min(size);
        debug!("created in-place arena over {size} bytes");
        arena
    }

    fn from_parts(config: ArenaConfig, backing: Backing, base: NonNull<u8>, size: usize) -> Self {
        Arena {
            config,
            page: Page { base, pos: 0, size },
            next_page_size: config.first_page_size / 2,
            backing,
            free_lists: [None; NUM_CLASSES],
            big: BigRing::new(),
            defers: Registry::new(),
            pages_grown: 0,
            _storage: PhantomData,
        }
    }

    /// Configuration shared with every child of this arena.
    #[must_use]
    pub fn config(&self) -> ArenaConfig {
        self.config
    }

    /// Tears the arena down. Equivalent to dropping it.
    pub fn destroy(self) {
        drop(self);
    }

    /// Returns current arena statistics.
    #[must_use]
    pub fn stats(&self) -> ArenaStats {
        let children = self
            .defers
            .iter()
            .filter(|cleanup| matches!(cleanup, Cleanup::Child(_)))
            .count();
        ArenaStats {
            pages_grown: self.pages_grown,
            big_blocks: self.big.len(),
            deferred: self.defers.len() - children,
            children,
            free_small_blocks: self.free_lists.iter().map(|&head| free_list_len(head)).sum(),
            page_remaining: self.page.remaining(),
        }
    }

    fn alloc_small(&mut self, class: SizeClass, total: usize) -> Result<NonNull<u8>> {
        let block = match self.pop_free(class) {
            Some(block) => block,
            None => {
                let chunk = class.bucket_size();
                match self.page.carve(chunk) {
                    Some(block) => block,
                    None => self.grow(chunk)?,
                }
            }
        };
        // SAFETY: `block` starts a bucket of at least `total + HEADER_SIZE`
        // bytes inside a live page, 16-byte aligned.
        unsafe {
            header::write(block, BlockHeader::Small { capacity: total });
            Ok(header::payload_of(block))
        }
    }

    fn pop_free(&mut self, class: SizeClass) -> Option<NonNull<BlockHeader>> {
        let head = self.free_lists[class.index()]?;
        // SAFETY: free lists only link released small blocks of live pages.
        let next = match unsafe { header::read(head) } {
            BlockHeader::Freed { next } => next,
            other => panic!("free list {} holds a live block ({other:?})", class.index()),
        };
        self.free_lists[class.index()] = next;
        Some(head)
    }

    /// Allocates a fresh page, carves the first `chunk` bytes from it and
    /// switches to it if it has more room left than the current page.
    #[cold]
    fn grow(&mut self, chunk: usize) -> Result<NonNull<BlockHeader>> {
        let hint = self
            .next_page_size
            .saturating_mul(2)
            .min(self.config.max_page_size);
        let page_size = hint.max(chunk);
        let base = self.alloc_big(page_size)?;
        self.next_page_size = hint;
        self.pages_grown += 1;

        let leftover = page_size - chunk;
        let switched = leftover > self.page.remaining();
        if switched {
            self.page = Page {
                base,
                pos: chunk,
                size: page_size,
            };
        }
        trace!("grew a {page_size} byte page (switched: {switched})");
        Ok(base.cast())
    }

    fn alloc_big(&mut self, total: usize) -> Result<NonNull<u8>> {
        let layout = raw::block_layout(total)?;
        let ptr = raw::system_alloc(layout)?;
        let node = match self.big.insert(SystemBlock { ptr, layout }) {
            Ok(node) => node,
            Err(err) => {
                // SAFETY: `ptr` was allocated with `layout` just above.
                unsafe { raw::system_free(ptr, layout) };
                return Err(err);
            }
        };
        let block = ptr.cast::<BlockHeader>();
        // SAFETY: the system block is fresh, aligned and has room for the
        // header plus `total` bytes.
        unsafe {
            header::write(block, BlockHeader::Big { node, capacity: total });
            Ok(header::payload_of(block))
        }
    }

    /// Registers `finalizer` to run when the arena is torn down.
    ///
    /// Finalizers run in reverse registration order. They cannot reach the
    /// arena itself; by the time one runs it has already been unlinked.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfMemory`] or [`Error::SlotTableFull`] if the slot table
    /// cannot grow. The finalizer is dropped without running.
    pub fn defer<F>(&mut self, finalizer: F) -> Result<SlotId>
    where
        F: FnOnce() + 'a,
    {
        self.defers.register(Cleanup::Call(Box::new(finalizer)))
    }

    /// Replaces the finalizer in `slot`, keeping its position in the
    /// teardown order. The previous finalizer is dropped without running.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is not an active finalizer slot of this arena.
    pub fn redefer<F>(&mut self, slot: SlotId, finalizer: F)
    where
        F: FnOnce() + 'a,
    {
        self.expect_finalizer(slot);
        drop(self.defers.replace(slot, Cleanup::Call(Box::new(finalizer))));
    }

    /// Unregisters the finalizer in `slot`, running it first if `run` is set.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is not an active finalizer slot of this arena.
    pub fn cancel_defer(&mut self, slot: SlotId, run: bool) {
        self.expect_finalizer(slot);
        match self.defers.cancel(slot) {
            Cleanup::Call(finalizer) if run => finalizer(),
            _ => {}
        }
    }

    fn expect_finalizer(&self, slot: SlotId) {
        if let Cleanup::Child(_) = self.defers.get(slot) {
            panic!(
                "deferred cleanup slot {} owns a child arena; use the child operations",
                slot.index()
            );
        }
    }

    /// Allocates `size` bytes whose `finalizer` runs at arena teardown.
    ///
    /// The block is initialized from `init` or zeroed. The returned pointer
    /// is 16-byte aligned but is not a plain block: release it with
    /// [`Arena::cancel`], never with [`BlockAlloc::free`], and do not pass it
    /// to [`capacity_of`](crate::capacity_of).
    ///
    /// # Errors
    ///
    /// Any allocation or registration error. Nothing stays allocated or
    /// registered on failure.
    ///
    /// # Panics
    ///
    /// Panics if `init` is given and its length differs from `size`.
    pub fn defer_alloc<F>(
        &mut self,
        size: usize,
        init: Option<&[u8]>,
        finalizer: F,
    ) -> Result<NonNull<u8>>
    where
        F: FnOnce(NonNull<u8>) + 'a,
    {
        if let Some(bytes) = init {
            assert_eq!(bytes.len(), size, "initializer length must equal the block size");
        }
        let total = size
            .checked_add(DEFER_TAG_SIZE)
            .ok_or(Error::SizeOverflow { size, count: 1 })?;
        let base = self.alloc_uninit(1, total)?;
        // SAFETY: the block holds the tag plus `size` bytes.
        let data = unsafe { base.add(DEFER_TAG_SIZE) };
        unsafe { raw::copy_or_zero(data, init, size) };

        let slot = match self.defer(move || finalizer(data)) {
            Ok(slot) => slot,
            Err(err) => {
                // SAFETY: `base` was allocated above and never handed out.
                unsafe { self.free(base) };
                return Err(err);
            }
        };
        // SAFETY: the tag occupies the first 16 bytes of the block.
        unsafe { base.cast::<DeferTag>().write(DeferTag::Armed(slot)) };
        Ok(data)
    }

    /// Moves `value` into the arena and drops it at teardown.
    ///
    /// Cancelling the returned block with `run == false` leaks the value
    /// the way [`std::mem::forget`] does.
    ///
    /// # Errors
    ///
    /// Any allocation or registration error; `value` is dropped.
    ///
    /// # Panics
    ///
    /// Panics if `T` needs more than 16-byte alignment.
    pub fn alloc_managed<T: 'a>(&mut self, value: T) -> Result<NonNull<T>> {
        assert!(
            align_of::<T>() <= BLOCK_ALIGN,
            "alignment {} exceeds block alignment",
            align_of::<T>()
        );
        let ptr = self
            .defer_alloc(size_of::<T>(), None, |data| {
                // SAFETY: the value was written right after allocation and is
                // dropped exactly once, here.
                unsafe { ptr::drop_in_place(data.cast::<T>().as_ptr()) }
            })?
            .cast::<T>();
        // SAFETY: the block is aligned and large enough for `T`.
        unsafe { ptr.write(value) };
        Ok(ptr)
    }

    /// Unregisters the finalizer of a deferred block, running it first if
    /// `run` is set, and leaves the block allocated.
    ///
    /// The block can be released later with [`Arena::cancel`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`Arena::defer_alloc`] or
    /// [`Arena::alloc_managed`] on this arena and must not be released.
    ///
    /// # Panics
    ///
    /// Panics if the block was already cancelled.
    pub unsafe fn cancel_retain(&mut self, ptr: NonNull<u8>, run: bool) {
        // SAFETY: deferred payloads sit right after their tag.
        let tag = unsafe { ptr.sub(DEFER_TAG_SIZE).cast::<DeferTag>() };
        let slot = match unsafe { tag.read() } {
            DeferTag::Armed(slot) => slot,
            DeferTag::Detached => panic!("deferred block {ptr:p} was already cancelled"),
        };
        let cleanup = self.defers.cancel(slot);
        unsafe { tag.write(DeferTag::Detached) };
        match cleanup {
            Cleanup::Call(finalizer) if run => finalizer(),
            _ => {}
        }
    }

    /// Unregisters the finalizer of a deferred block, running it first if
    /// `run` is set, and releases the block.
    ///
    /// A block already detached by [`Arena::cancel_retain`] is just
    /// released.
    ///
    /// # Safety
    ///
    /// As for [`Arena::cancel_retain`]. `ptr` must not be used afterwards.
    pub unsafe fn cancel(&mut self, ptr: NonNull<u8>, run: bool) {
        // SAFETY: forwarded from the caller.
        let tag = unsafe { ptr.sub(DEFER_TAG_SIZE).cast::<DeferTag>() };
        if let DeferTag::Armed(_) = unsafe { tag.read() } {
            unsafe { self.cancel_retain(ptr, run) };
        }
        unsafe { self.free(tag.cast()) };
    }

    /// Creates a child arena owned by this one.
    ///
    /// The child allocates and owns its first page, sized like this
    /// arena's. It is torn down when it is destroyed, when it is detached
    /// and dropped, or when this arena is torn down, whichever comes first.
    ///
    /// # Errors
    ///
    /// Any allocation or registration error. Nothing stays allocated or
    /// registered on failure.
    pub fn create_child(&mut self) -> Result<ChildId> {
        let child = Arena::heap_backed(self.config)?;
        let slot = self.defers.register(Cleanup::Child(Box::new(child)))?;
        debug!("created child arena in slot {}", slot.index());
        Ok(ChildId(slot))
    }

    /// Creates a child arena whose first page is `storage`.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfMemory`] or [`Error::SlotTableFull`] if the child
    /// cannot be registered.
    pub fn create_child_in(&mut self, storage: &'a mut [MaybeUninit<u8>]) -> Result<ChildId> {
        let child = Arena::in_place_unchecked(storage, self.config);
        let slot = self.defers.register(Cleanup::Child(Box::new(child)))?;
        debug!("created in-place child arena in slot {}", slot.index());
        Ok(ChildId(slot))
    }

    /// # Panics
    ///
    /// Panics if `id` is not a live child of this arena.
    #[must_use]
    pub fn child(&self, id: ChildId) -> &Arena<'a> {
        match self.defers.get(id.0) {
            Cleanup::Child(child) => child,
            Cleanup::Call(_) => panic!("slot {} is not a child arena", id.0.index()),
        }
    }

    /// The child owns its pages, so it may be moved out of this arena.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not a live child of this arena.
    pub fn child_mut(&mut self, id: ChildId) -> &mut Arena<'a> {
        match self.defers.get_mut(id.0) {
            Cleanup::Child(child) => child,
            Cleanup::Call(_) => panic!("slot {} is not a child arena", id.0.index()),
        }
    }

    fn expect_child(&self, id: ChildId) {
        if let Cleanup::Call(_) = self.defers.get(id.0) {
            panic!("slot {} is not a child arena", id.0.index());
        }
    }

    /// Tears down a child now.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not a live child of this arena.
    pub fn destroy_child(&mut self, id: ChildId) {
        self.expect_child(id);
        drop(self.defers.cancel(id.0));
        debug!("destroyed child arena in slot {}", id.0.index());
    }

    /// Removes a child from this arena and returns it as an independent
    /// root arena that keeps every block it has handed out.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not a live child of this arena.
    pub fn detach_child(&mut self, id: ChildId) -> Arena<'a> {
        self.expect_child(id);
        let Cleanup::Child(child) = self.defers.cancel(id.0) else {
            unreachable!("slot {} was checked to hold a child", id.0.index());
        };
        debug!("detached child arena from slot {}", id.0.index());
        *child
    }
}

fn free_list_len(mut cursor: Option<NonNull<BlockHeader>>) -> usize {
    let mut len = 0;
    while let Some(block) = cursor {
        // SAFETY: free lists only link released small blocks of live pages.
        cursor = match unsafe { header::read(block) } {
            BlockHeader::Freed { next } => next,
            other => panic!("free list holds a live block ({other:?})"),
        };
        len += 1;
    }
    len
}

impl BlockAlloc for Arena<'_> {
    fn alloc_uninit(&mut self, size: usize, count: usize) -> Result<NonNull<u8>> {
        let total = raw::total_size(size, count)?;
        match total.checked_add(HEADER_SIZE).and_then(size_class::classify) {
            Some(class) => self.alloc_small(class, total),
            None => {
                trace!("big allocation of {total} bytes");
                self.alloc_big(total)
            }
        }
    }

    unsafe fn free(&mut self, ptr: NonNull<u8>) {
        // SAFETY: forwarded from the caller.
        let block = unsafe { header::header_of(ptr) };
        match unsafe { header::read(block) } {
            BlockHeader::Small { capacity } => {
                let class = size_class::classify(capacity + HEADER_SIZE).unwrap_or_else(|| {
                    panic!("small block {ptr:p} claims {capacity} bytes, above {SMALL_LIMIT}")
                });
                let head = self.free_lists[class.index()];
                // SAFETY: the block is live and owned by this arena.
                unsafe { header::write(block, BlockHeader::Freed { next: head }) };
                self.free_lists[class.index()] = Some(block);
            }
            BlockHeader::Big { node, .. } => {
                let released = self.big.remove(node, block.cast());
                // SAFETY: the ring hands back the exact system allocation.
                unsafe { raw::system_free(released.ptr, released.layout) };
            }
            BlockHeader::Freed { .. } => panic!("double free of arena block {ptr:p}"),
            BlockHeader::Heap { .. } => {
                panic!("heap block {ptr:p} released through an arena")
            }
        }
    }
}

impl Drop for Arena<'_> {
    fn drop(&mut self) {
        let cleanups = self.defers.len();
        while let Some(cleanup) = self.defers.pop_front() {
            match cleanup {
                Cleanup::Call(finalizer) => finalizer(),
                Cleanup::Child(child) => drop(child),
            }
        }

        let big_blocks = self.big.len();
        while let Some(block) = self.big.pop_front() {
            // SAFETY: ring entries are live system allocations.
            unsafe { raw::system_free(block.ptr, block.layout) };
        }
        debug_assert!(self.big.is_empty());
        if let Backing::Owned(block) = self.backing {
            // SAFETY: an owned first page is a live system allocation.
            unsafe { raw::system_free(block.ptr, block.layout) };
        }
        debug!("tore down arena: {cleanups} cleanups, {big_blocks} big blocks");
    }
}

impl fmt::Debug for Arena<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn addr(ptr: NonNull<u8>) -> usize {
        ptr.as_ptr() as usize
    }

    #[test]
    fn test_small_alloc_alignment_and_capacity() {
        let mut arena = Arena::new().unwrap();
        for size in [1, 7, 16, 20, 100, 432] {
            let ptr = arena.alloc_uninit(1, size).unwrap();
            assert_eq!(addr(ptr) % BLOCK_ALIGN, 0);
            assert_eq!(unsafe { crate::capacity_of(ptr) }, size);
        }
    }

    #[test]
    fn test_bump_cursor_advances_by_bucket() {
        let mut arena = Arena::new().unwrap();
        let a = arena.alloc_uninit(1, 20).unwrap();
        let b = arena.alloc_uninit(1, 20).unwrap();
        // 20 + 16 byte header lands in the 48 byte bucket.
        assert_eq!(addr(b) - addr(a), 48);
        assert_eq!(arena.stats().page_remaining, 512 - 96);
    }

    #[test]
    fn test_free_list_reuse() {
        let mut arena = Arena::new().unwrap();
        let a = arena.alloc_uninit(1, 20).unwrap();
        unsafe { arena.free(a) };
        assert_eq!(arena.stats().free_small_blocks, 1);

        // 30 bytes share the 48 byte bucket with 20.
        let b = arena.alloc_uninit(1, 30).unwrap();
        assert_eq!(a, b);
        assert_eq!(unsafe { crate::capacity_of(b) }, 30);
        assert_eq!(arena.stats().free_small_blocks, 0);
    }

    #[test]
    fn test_page_growth_sequence() {
        let mut arena = Arena::new().unwrap();
        // 432 + 16 = 448: one full bucket per allocation.
        let first = arena.alloc_uninit(1, 432).unwrap();
        assert_eq!(arena.stats().page_remaining, 64);

        // Grown 512 byte page keeps only 64 bytes: no switch.
        arena.alloc_uninit(1, 432).unwrap();
        assert_eq!(arena.next_page_size, 512);
        assert_eq!(arena.stats().page_remaining, 64);
        assert_eq!(arena.stats().pages_grown, 1);

        // 1024 byte page keeps 576 bytes: switch, cursor past the block.
        let third = arena.alloc_uninit(1, 432).unwrap();
        assert_eq!(arena.next_page_size, 1024);
        assert_eq!(arena.stats().page_remaining, 576);
        let fourth = arena.alloc_uninit(1, 432).unwrap();
        assert_eq!(addr(fourth) - addr(third), 448);

        for _ in 0..16 {
            arena.alloc_uninit(1, 432).unwrap();
        }
        assert_eq!(arena.next_page_size, 4096);
        assert!(arena.big.is_well_formed());
        let _ = first;
    }

    #[test]
    fn test_big_block_ring_membership() {
        let mut arena = Arena::new().unwrap();
        let big = arena.alloc_uninit(1, 5000).unwrap();
        assert_eq!(arena.stats().big_blocks, 1);
        assert_eq!(unsafe { crate::capacity_of(big) }, 5000);
        unsafe { arena.free(big) };
        assert!(arena.big.is_empty());
        assert!(arena.big.is_well_formed());
    }

    #[test]
    fn test_small_limit_boundary() {
        let mut arena = Arena::new().unwrap();
        arena.alloc_uninit(1, SMALL_LIMIT - HEADER_SIZE).unwrap();
        assert_eq!(arena.stats().big_blocks, 0);
        arena.alloc_uninit(1, SMALL_LIMIT - HEADER_SIZE + 1).unwrap();
        assert_eq!(arena.stats().big_blocks, 1);
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn test_double_free_panics() {
        let mut arena = Arena::new().unwrap();
        let ptr = arena.alloc_uninit(1, 8).unwrap();
        unsafe {
            arena.free(ptr);
            arena.free(ptr);
        }
    }

    #[test]
    #[should_panic(expected = "released through an arena")]
    fn test_heap_block_rejected() {
        let mut arena = Arena::new().unwrap();
        let ptr = crate::Heap.alloc_uninit(1, 8).unwrap();
        unsafe { arena.free(ptr) };
    }

    #[test]
    fn test_in_place_unaligned_storage() {
        let mut storage = [MaybeUninit::<u8>::uninit(); 257];
        let mut arena = Arena::in_place(&mut storage[1..]);
        let ptr = arena.alloc_uninit(1, 20).unwrap();
        assert_eq!(addr(ptr) % BLOCK_ALIGN, 0);
        assert_eq!(arena.stats().pages_grown, 0);
    }

    #[test]
    fn test_in_place_empty_storage_grows() {
        let mut storage: [MaybeUninit<u8>; 0] = [];
        let mut arena = Arena::in_place(&mut storage);
        arena.alloc_uninit(1, 20).unwrap();
        assert_eq!(arena.stats().pages_grown, 1);
    }

    #[test]
    fn test_child_owns_its_first_page() {
        let mut parent = Arena::new().unwrap();
        let id = parent.create_child().unwrap();
        assert_eq!(parent.stats().big_blocks, 0);
        assert_eq!(parent.stats().children, 1);
        assert!(matches!(parent.child(id).backing, Backing::Owned(_)));
        assert_eq!(parent.child(id).stats().page_remaining, 512);

        parent.destroy_child(id);
        assert_eq!(parent.stats().children, 0);
    }

    #[test]
    fn test_detached_child_outlives_parent() {
        let mut parent = Arena::new().unwrap();
        let id = parent.create_child().unwrap();
        let ptr = parent.child_mut(id).alloc_copy(&[7u64; 4]).unwrap();

        let child = parent.detach_child(id);
        assert!(matches!(child.backing, Backing::Owned(_)));
        drop(parent);

        unsafe { assert_eq!(*ptr.as_ptr().add(3), 7) };
        drop(child);
    }

    #[test]
    fn test_child_swapped_out_survives_parent() {
        let mut parent = Arena::new().unwrap();
        let id = parent.create_child().unwrap();
        let kept = parent.child_mut(id).alloc_copy(&[3u8; 20]).unwrap();

        let mut child = std::mem::replace(parent.child_mut(id), Arena::new().unwrap());
        drop(parent);

        let mut blocks = vec![kept];
        for i in 0..8u8 {
            blocks.push(child.alloc_copy(&[i; 20]).unwrap());
            let noise = vec![0xaau8; 528];
            assert!(noise.iter().all(|&b| b == 0xaa));
        }
        let page = child.page;
        let page_range = addr(page.base)..addr(page.base) + page.size;
        assert!(blocks.iter().all(|&ptr| page_range.contains(&addr(ptr))));
        unsafe {
            assert_eq!(*kept.as_ptr().add(19), 3);
            assert_eq!(*blocks[8].as_ptr(), 7);
        }
    }

    #[test]
    fn test_in_place_rejects_invalid_config() {
        let mut storage = [MaybeUninit::<u8>::uninit(); 64];
        let config = ArenaConfig::new()
            .with_first_page_size(64)
            .with_max_page_size(64);
        assert!(matches!(
            Arena::in_place_with_config(&mut storage, config),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_failed_defer_alloc_releases_block() {
        let dropped = RefCell::new(false);
        let mut arena = Arena::new().unwrap();
        arena.defers = Registry::with_limit(0);

        let result = arena.defer_alloc(20, None, |_| *dropped.borrow_mut() = true);
        assert_eq!(result, Err(Error::SlotTableFull));
        assert!(!*dropped.borrow());
        assert_eq!(arena.stats().deferred, 0);
        assert_eq!(arena.stats().free_small_blocks, 1);
    }

    #[test]
    fn test_failed_create_child_leaves_parent_unchanged() {
        let mut parent = Arena::new().unwrap();
        parent.defers = Registry::with_limit(0);
        let before = parent.stats();

        assert_eq!(parent.create_child(), Err(Error::SlotTableFull));
        assert_eq!(parent.stats(), before);
        assert!(parent.defers.is_partitioned());
    }

    #[test]
    fn test_teardown_order_is_lifo() {
        let log = RefCell::new(Vec::new());
        {
            let mut arena = Arena::new().unwrap();
            for name in ["a", "b", "c"] {
                let log = &log;
                arena.defer(move || log.borrow_mut().push(name)).unwrap();
            }
            assert!(arena.defers.is_partitioned());
        }
        assert_eq!(*log.borrow(), ["c", "b", "a"]);
    }

    #[test]
    #[should_panic(expected = "owns a child arena")]
    fn test_cancel_defer_on_child_slot_panics() {
        let mut arena = Arena::new().unwrap();
        let ChildId(slot) = arena.create_child().unwrap();
        arena.cancel_defer(slot, false);
    }

    #[test]
    fn test_defer_tag_is_one_quantum() {
        let mut arena = Arena::new().unwrap();
        let data = arena.defer_alloc(20, None, |_| {}).unwrap();
        let base = unsafe { data.sub(DEFER_TAG_SIZE) };
        assert_eq!(unsafe { crate::capacity_of(base) }, 20 + DEFER_TAG_SIZE);
        unsafe { arena.cancel(data, false) };
        assert_eq!(arena.stats().deferred, 0);
    }
}
