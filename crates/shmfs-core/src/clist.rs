//! Intrusive circular doubly-linked list stored in the arena.
//!
//! A list is a header `{ len, sentinel }` plus nodes `{ next, prev, data }`.
//! The sentinel anchors the ring: an empty list's sentinel points at itself,
//! `begin` is the sentinel's successor and `end` is the sentinel.
//!
//! ```text
//!            ┌──────────────────────────────────────────┐
//!            ▼                                          │
//!   ┌──────────────┐   ┌──────────┐   ┌──────────┐      │
//!   │   sentinel   │──▶│  node A  │──▶│  node B  │──────┘
//!   └──────────────┘◀──└──────────┘◀──└──────────┘
//! ```
//!
//! Where node memory comes from is a [`NodeStorage`] strategy: child lists take
//! nodes from the arena allocator, while the allocator's own free list keeps
//! each node inside the freed block it describes.

use crate::arena;
use crate::error::{CoreError, Result};
use crate::mem::{read_u64, write_u64, zero};
use crate::types::{Offset, NIL};

const LIST_LEN: Offset = 0;
const LIST_SENTINEL: Offset = 8;

/// Size of a list header.
pub const LIST_HEADER_SIZE: u64 = 16;

const NODE_NEXT: Offset = 0;
const NODE_PREV: Offset = 8;
const NODE_DATA: Offset = 16;

/// Size of a list node.
pub const NODE_SIZE: u64 = 24;

/// Where list nodes live and what happens to their payloads.
pub trait NodeStorage {
    /// Provide node memory for an element carrying `value`.
    fn acquire(&self, arena: &mut [u8], value: Offset) -> Result<Offset>;

    /// Give node memory back.
    fn release(&self, arena: &mut [u8], node: Offset) -> Result<()>;

    /// Dispose of an element's payload when it leaves the list.
    fn drop_value(&self, _arena: &mut [u8], _value: Offset) -> Result<()> {
        Ok(())
    }
}

/// Nodes allocated from the arena. Payloads are left alone.
#[derive(Clone, Copy, Debug, Default)]
pub struct ArenaNodes;

impl NodeStorage for ArenaNodes {
    fn acquire(&self, arena: &mut [u8], _value: Offset) -> Result<Offset> {
        arena::allocate(arena, NODE_SIZE)
    }

    fn release(&self, arena: &mut [u8], node: Offset) -> Result<()> {
        arena::deallocate(arena, node)
    }
}

/// Nodes stored at the payload's own offset; the payload must be at least
/// [`NODE_SIZE`] bytes and unused while it is on the list.
#[derive(Clone, Copy, Debug, Default)]
pub struct InPlace;

impl NodeStorage for InPlace {
    fn acquire(&self, _arena: &mut [u8], value: Offset) -> Result<Offset> {
        Ok(value)
    }

    fn release(&self, _arena: &mut [u8], _node: Offset) -> Result<()> {
        Ok(())
    }
}

/// Handle to a list header in the arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CList {
    header: Offset,
}

impl CList {
    /// Allocate a header and sentinel from the arena and link an empty ring.
    pub fn create(arena: &mut [u8]) -> Result<Self> {
        let header = arena::allocate(arena, LIST_HEADER_SIZE + NODE_SIZE)?;
        Self::create_in_place(arena, header, header + LIST_HEADER_SIZE)
    }

    /// Link an empty ring over pre-reserved header and sentinel storage.
    pub fn create_in_place(arena: &mut [u8], header: Offset, sentinel: Offset) -> Result<Self> {
        write_u64(arena, header + LIST_LEN, 0)?;
        write_u64(arena, header + LIST_SENTINEL, sentinel)?;
        link(arena, sentinel, sentinel, sentinel)?;
        write_u64(arena, sentinel + NODE_DATA, NIL)?;
        Ok(Self { header })
    }

    /// Reopen a list from a stored header offset.
    pub fn open(header: Offset) -> Self {
        Self { header }
    }

    /// Offset of the list header.
    pub fn header(&self) -> Offset {
        self.header
    }

    /// Number of elements, tombstoned ones included.
    pub fn len(&self, arena: &[u8]) -> Result<u64> {
        read_u64(arena, self.header + LIST_LEN)
    }

    pub fn is_empty(&self, arena: &[u8]) -> Result<bool> {
        Ok(self.len(arena)? == 0)
    }

    fn set_len(&self, arena: &mut [u8], len: u64) -> Result<()> {
        write_u64(arena, self.header + LIST_LEN, len)
    }

    // ========== Cursor ==========

    /// The sentinel node; also the past-the-end position.
    pub fn end(&self, arena: &[u8]) -> Result<Offset> {
        read_u64(arena, self.header + LIST_SENTINEL)
    }

    /// First element, or `end` when empty.
    pub fn begin(&self, arena: &[u8]) -> Result<Offset> {
        self.next(arena, self.end(arena)?)
    }

    pub fn next(&self, arena: &[u8], node: Offset) -> Result<Offset> {
        read_u64(arena, node + NODE_NEXT)
    }

    pub fn prev(&self, arena: &[u8], node: Offset) -> Result<Offset> {
        read_u64(arena, node + NODE_PREV)
    }

    /// Payload stored in a node.
    pub fn get(&self, arena: &[u8], node: Offset) -> Result<Offset> {
        read_u64(arena, node + NODE_DATA)
    }

    /// Overwrite a node's payload in place.
    pub fn set(&self, arena: &mut [u8], node: Offset, value: Offset) -> Result<()> {
        write_u64(arena, node + NODE_DATA, value)
    }

    // ========== Mutation ==========

    /// Splice a new element after `position`; returns the new node.
    pub fn insert_after<S: NodeStorage>(
        &self,
        arena: &mut [u8],
        position: Offset,
        value: Offset,
        storage: &S,
    ) -> Result<Offset> {
        let node = storage.acquire(arena, value)?;
        let after = self.next(arena, position)?;
        link(arena, node, after, position)?;
        write_u64(arena, node + NODE_DATA, value)?;
        write_u64(arena, position + NODE_NEXT, node)?;
        write_u64(arena, after + NODE_PREV, node)?;
        let len = self.len(arena)?;
        self.set_len(arena, len + 1)?;
        Ok(node)
    }

    /// Unlink and release a node. Removing the sentinel does nothing.
    pub fn remove<S: NodeStorage>(
        &self,
        arena: &mut [u8],
        node: Offset,
        storage: &S,
    ) -> Result<()> {
        if node == self.end(arena)? {
            return Ok(());
        }
        let len = self.len(arena)?;
        if len == 0 {
            return Err(CoreError::corrupt(self.header, "remove from an empty list"));
        }
        let next = self.next(arena, node)?;
        let prev = self.prev(arena, node)?;
        write_u64(arena, prev + NODE_NEXT, next)?;
        write_u64(arena, next + NODE_PREV, prev)?;
        let value = self.get(arena, node)?;
        storage.drop_value(arena, value)?;
        zero(arena, node, NODE_SIZE)?;
        storage.release(arena, node)?;
        self.set_len(arena, len - 1)
    }

    pub fn push_front<S: NodeStorage>(
        &self,
        arena: &mut [u8],
        value: Offset,
        storage: &S,
    ) -> Result<Offset> {
        let end = self.end(arena)?;
        self.insert_after(arena, end, value, storage)
    }

    pub fn push_back<S: NodeStorage>(
        &self,
        arena: &mut [u8],
        value: Offset,
        storage: &S,
    ) -> Result<Offset> {
        let end = self.end(arena)?;
        let last = self.prev(arena, end)?;
        self.insert_after(arena, last, value, storage)
    }

    /// Remove the first element and return its payload.
    pub fn pop_front<S: NodeStorage>(
        &self,
        arena: &mut [u8],
        storage: &S,
    ) -> Result<Option<Offset>> {
        let first = self.begin(arena)?;
        self.pop_node(arena, first, storage)
    }

    /// Remove the last element and return its payload.
    pub fn pop_back<S: NodeStorage>(
        &self,
        arena: &mut [u8],
        storage: &S,
    ) -> Result<Option<Offset>> {
        let end = self.end(arena)?;
        let last = self.prev(arena, end)?;
        self.pop_node(arena, last, storage)
    }

    fn pop_node<S: NodeStorage>(
        &self,
        arena: &mut [u8],
        node: Offset,
        storage: &S,
    ) -> Result<Option<Offset>> {
        if node == self.end(arena)? {
            return Ok(None);
        }
        let value = self.get(arena, node)?;
        self.remove(arena, node, storage)?;
        Ok(Some(value))
    }

    pub fn front(&self, arena: &[u8]) -> Result<Option<Offset>> {
        let first = self.begin(arena)?;
        self.value_at(arena, first)
    }

    pub fn back(&self, arena: &[u8]) -> Result<Option<Offset>> {
        let end = self.end(arena)?;
        let last = self.prev(arena, end)?;
        self.value_at(arena, last)
    }

    fn value_at(&self, arena: &[u8], node: Offset) -> Result<Option<Offset>> {
        if node == self.end(arena)? {
            Ok(None)
        } else {
            self.get(arena, node).map(Some)
        }
    }

    /// Pop every element, then free the header and sentinel block.
    ///
    /// Only valid for lists made by [`CList::create`].
    pub fn destroy<S: NodeStorage>(self, arena: &mut [u8], storage: &S) -> Result<()> {
        while self.pop_front(arena, storage)?.is_some() {}
        zero(arena, self.header, LIST_HEADER_SIZE + NODE_SIZE)?;
        arena::deallocate(arena, self.header)
    }

    /// Walk the elements front to back as `(node, value)` pairs.
    ///
    /// The walk stops with an error after `len` steps so a damaged ring cannot
    /// loop forever.
    pub fn iter<'a>(&self, arena: &'a [u8]) -> Iter<'a> {
        let start = self
            .end(arena)
            .and_then(|end| Ok((end, self.next(arena, end)?, self.len(arena)?)));
        match start {
            Ok((end, cursor, remaining)) => Iter {
                arena,
                end,
                cursor,
                remaining,
                failed: None,
            },
            Err(err) => Iter {
                arena,
                end: NIL,
                cursor: NIL,
                remaining: 0,
                failed: Some(err),
            },
        }
    }
}

fn link(arena: &mut [u8], node: Offset, next: Offset, prev: Offset) -> Result<()> {
    write_u64(arena, node + NODE_NEXT, next)?;
    write_u64(arena, node + NODE_PREV, prev)
}

/// Front-to-back walk over a [`CList`].
pub struct Iter<'a> {
    arena: &'a [u8],
    end: Offset,
    cursor: Offset,
    remaining: u64,
    failed: Option<CoreError>,
}

impl Iterator for Iter<'_> {
    type Item = Result<(Offset, Offset)>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.failed.take() {
            self.cursor = self.end;
            return Some(Err(err));
        }
        if self.cursor == self.end {
            return None;
        }
        if self.remaining == 0 {
            let node = self.cursor;
            self.cursor = self.end;
            return Some(Err(CoreError::corrupt(node, "list is longer than its length")));
        }
        self.remaining -= 1;
        let node = self.cursor;
        let step = read_u64(self.arena, node + NODE_DATA)
            .and_then(|value| Ok((value, read_u64(self.arena, node + NODE_NEXT)?)));
        match step {
            Ok((value, next)) => {
                self.cursor = next;
                Some(Ok((node, value)))
            }
            Err(err) => {
                self.cursor = self.end;
                Some(Err(err))
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
