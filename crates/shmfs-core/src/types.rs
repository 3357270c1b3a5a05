//! Core engine types
//!
//! Plain data shared by every engine module. Offsets are relative to the start
//! of the arena, so values stay meaningful no matter where a process maps the
//! segment.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Byte offset into the arena.
pub type Offset = u64;

/// The empty reference. Offset 0 is the arena header, never a user block.
pub const NIL: Offset = 0;

/// Handle to a tree node stored in the arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeRef(pub Offset);

impl NodeRef {
    /// Raw arena offset of the node.
    pub fn offset(self) -> Offset {
        self.0
    }
}

/// Node kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// Regular file with an optional byte payload
    File,
    /// Directory holding a list of children
    Directory,
}

impl NodeKind {
    pub(crate) fn to_raw(self) -> u64 {
        match self {
            NodeKind::File => 1,
            NodeKind::Directory => 2,
        }
    }

    pub(crate) fn from_raw(raw: u64) -> Option<Self> {
        match raw {
            1 => Some(NodeKind::File),
            2 => Some(NodeKind::Directory),
            _ => None,
        }
    }

    /// Check if this is a directory.
    pub fn is_directory(self) -> bool {
        self == NodeKind::Directory
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::File => f.write_str("file"),
            NodeKind::Directory => f.write_str("directory"),
        }
    }
}

/// A live child of a directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChildEntry {
    pub node: NodeRef,
    pub name: String,
    pub kind: NodeKind,
}

/// Allocator usage snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArenaStats {
    /// Total arena size in bytes
    pub arena_size: u64,
    /// First never-allocated byte
    pub bump_offset: u64,
    /// Blocks waiting on the free list
    pub free_blocks: u64,
    /// Bytes (metadata included) held by free blocks
    pub free_bytes: u64,
}

impl ArenaStats {
    /// Bytes never handed out by the bump pointer.
    pub fn untouched_bytes(&self) -> u64 {
        self.arena_size.saturating_sub(self.bump_offset)
    }
}
