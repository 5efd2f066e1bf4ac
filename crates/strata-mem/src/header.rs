//! Block headers.
//!
//! Every pointer handed out by an arena or by [`Heap`](crate::Heap) is
//! preceded by one [`BlockHeader`]. The header says which allocator path
//! owns the block and, while the block is live, how many payload bytes it
//! may use. A small block that has been released stores its free-list link
//! in the same bytes; because the header is an enum, the link and the
//! capacity can never be read at the same time.
//!
//! # Safety
//!
//! All functions taking a payload pointer require that the pointer was
//! returned by this crate and that the allocator owning it is still alive.

use std::mem::{align_of, size_of};
use std::ptr::NonNull;

use crate::size_class::QUANTUM;

/// Metadata word pair in front of every block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(align(16))]
pub(crate) enum BlockHeader {
    /// Unmanaged block from the process heap.
    Heap { capacity: usize },
    /// Live block carved from an arena page.
    Small { capacity: usize },
    /// Released small block, threaded onto its class free list.
    Freed { next: Option<NonNull<BlockHeader>> },
    /// Live block linked into an arena's big-block ring at `node`.
    Big { node: u32, capacity: usize },
}

/// Bytes occupied by a header.
pub(crate) const HEADER_SIZE: usize = size_of::<BlockHeader>();

/// Alignment of every header and therefore of every payload.
pub(crate) const BLOCK_ALIGN: usize = align_of::<BlockHeader>();

const _: () = assert!(HEADER_SIZE == QUANTUM);
const _: () = assert!(BLOCK_ALIGN == QUANTUM);

/// Header in front of `ptr`.
///
/// # Safety
///
/// `ptr` must be a payload pointer produced by this crate.
#[inline]
pub(crate) unsafe fn header_of(ptr: NonNull<u8>) -> NonNull<BlockHeader> {
    // SAFETY: payloads always sit HEADER_SIZE bytes after their header,
    // inside the same allocation.
    unsafe { NonNull::new_unchecked(ptr.as_ptr().sub(HEADER_SIZE)).cast() }
}

/// Payload following `block`.
///
/// # Safety
///
/// `block` must point at a header inside an allocation that extends at
/// least to the end of the header.
#[inline]
pub(crate) unsafe fn payload_of(block: NonNull<BlockHeader>) -> NonNull<u8> {
    // SAFETY: one-past-the-header is in bounds (possibly one past the end
    // for an empty payload) and never null.
    unsafe { NonNull::new_unchecked(block.as_ptr().add(1)).cast() }
}

/// # Safety
///
/// `block` must point at an initialized header.
#[inline]
pub(crate) unsafe fn read(block: NonNull<BlockHeader>) -> BlockHeader {
    // SAFETY: guaranteed by the caller; headers are always 16-byte aligned.
    unsafe { block.as_ptr().read() }
}

/// # Safety
///
/// `block` must be valid for writes of one header and 16-byte aligned.
#[inline]
pub(crate) unsafe fn write(block: NonNull<BlockHeader>, header: BlockHeader) {
    // SAFETY: guaranteed by the caller.
    unsafe { block.as_ptr().write(header) }
}

/// Usable capacity in bytes of the block behind `ptr`.
///
/// Works for blocks from any arena and from [`Heap`](crate::Heap). The
/// capacity is at least the size that was requested and may be larger
/// after an in-place [`realloc`](crate::BlockAlloc::realloc) no-op.
///
/// # Safety
///
/// `ptr` must have been returned by this crate and its allocator must
/// still be alive.
///
/// # Panics
///
/// Panics if the block has already been released.
pub unsafe fn capacity_of(ptr: NonNull<u8>) -> usize {
    // SAFETY: forwarded from the caller.
    let header = unsafe { read(header_of(ptr)) };
    match header {
        BlockHeader::Heap { capacity }
        | BlockHeader::Small { capacity }
        | BlockHeader::Big { capacity, .. } => capacity,
        BlockHeader::Freed { .. } => {
            panic!("capacity query on released block {ptr:p}")
        }
    }
}
