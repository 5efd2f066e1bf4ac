//! Ring of big blocks.
//!
//! Blocks whose footprint exceeds the small limit come straight from the
//! system allocator. Each one is recorded in a circular doubly-linked list
//! so that it can be released on its own and so that arena teardown can
//! find every one of them. Links are indices into a node table rather than
//! addresses; nodes 0 and 1 are the head and tail sentinels, and an empty
//! ring has `head.next == tail` and `tail.next == head`.

use std::alloc::Layout;
use std::ptr::NonNull;

use crate::error::{Error, Result};

const HEAD: u32 = 0;
const TAIL: u32 = 1;
const NIL: u32 = u32::MAX;

/// A live system allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SystemBlock {
    pub(crate) ptr: NonNull<u8>,
    pub(crate) layout: Layout,
}

#[derive(Debug)]
struct Node {
    prev: u32,
    next: u32,
    /// `None` for sentinels and for recycled nodes, whose `next` then
    /// threads the free node list (`NIL`-terminated).
    block: Option<SystemBlock>,
}

#[derive(Debug)]
pub(crate) struct BigRing {
    nodes: Vec<Node>,
    free_head: Option<u32>,
    len: usize,
}

impl BigRing {
    pub(crate) fn new() -> Self {
        BigRing {
            nodes: vec![
                Node { prev: TAIL, next: TAIL, block: None },
                Node { prev: HEAD, next: HEAD, block: None },
            ],
            free_head: None,
            len: 0,
        }
    }

    /// Number of linked blocks.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.nodes[HEAD as usize].next == TAIL
    }

    /// Links `block` right after the head sentinel and returns its node.
    pub(crate) fn insert(&mut self, block: SystemBlock) -> Result<u32> {
        let index = match self.free_head {
            Some(index) => {
                debug_assert!(self.node(index).block.is_none());
                let next = self.node(index).next;
                self.free_head = (next != NIL).then_some(next);
                index
            }
            None => {
                let index = u32::try_from(self.nodes.len())
                    .ok()
                    .filter(|&index| index != NIL)
                    .ok_or(Error::SlotTableFull)?;
                self.nodes
                    .try_reserve(1)
                    .map_err(|_| Error::OutOfMemory { size: std::mem::size_of::<Node>() })?;
                self.nodes.push(Node { prev: NIL, next: NIL, block: None });
                index
            }
        };

        let first = self.node(HEAD).next;
        *self.node_mut(index) = Node {
            prev: HEAD,
            next: first,
            block: Some(block),
        };
        self.node_mut(first).prev = index;
        self.node_mut(HEAD).next = index;
        self.len += 1;
        Ok(index)
    }

    /// Unlinks node `index`, which must hold the block starting at
    /// `expected`, and hands the block back for release.
    ///
    /// # Panics
    ///
    /// Panics if the node is a sentinel, is not linked, holds a different
    /// block, or if either neighbour does not point back at it.
    pub(crate) fn remove(&mut self, index: u32, expected: NonNull<u8>) -> SystemBlock {
        assert!(
            index != HEAD && index != TAIL && (index as usize) < self.nodes.len(),
            "big block node {index} does not belong to this arena"
        );
        let node = self.node(index);
        let block = match node.block {
            Some(block) if block.ptr == expected => block,
            Some(_) => panic!("big block node {index} belongs to another block"),
            None => panic!("big block {expected:p} released twice"),
        };
        let (prev, next) = (node.prev, node.next);
        assert!(
            self.node(prev).next == index && self.node(next).prev == index,
            "big block ring corrupted around node {index}"
        );

        self.node_mut(prev).next = next;
        self.node_mut(next).prev = prev;
        self.recycle(index);
        block
    }

    /// Unlinks and returns the most recently inserted block.
    pub(crate) fn pop_front(&mut self) -> Option<SystemBlock> {
        let index = self.node(HEAD).next;
        if index == TAIL {
            return None;
        }
        let block = self.node(index).block;
        let next = self.node(index).next;
        self.node_mut(HEAD).next = next;
        self.node_mut(next).prev = HEAD;
        self.recycle(index);
        block
    }

    fn recycle(&mut self, index: u32) {
        *self.node_mut(index) = Node {
            prev: NIL,
            next: self.free_head.unwrap_or(NIL),
            block: None,
        };
        self.free_head = Some(index);
        self.len -= 1;
    }

    fn node(&self, index: u32) -> &Node {
        &self.nodes[index as usize]
    }

    fn node_mut(&mut self, index: u32) -> &mut Node {
        &mut self.nodes[index as usize]
    }

    /// Walks the ring forwards, checking every back-link.
    #[cfg(test)]
    pub(crate) fn is_well_formed(&self) -> bool {
        let mut seen = 0;
        let mut current = HEAD;
        loop {
            let next = self.node(current).next;
            if self.node(next).prev != current {
                return false;
            }
            if next == HEAD {
                break;
            }
            if next != TAIL {
                seen += 1;
            }
            current = next;
            if seen > self.len {
                return false;
            }
        }
        current == TAIL && seen == self.len
    }
}
