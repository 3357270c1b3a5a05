//! Engine error types.

use crate::types::{NodeKind, Offset};

/// Errors raised while operating on arena bytes.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// A sibling with the same name and kind already exists.
    #[error("{kind} '{name}' already exists")]
    DuplicateName { kind: NodeKind, name: String },

    /// No child with this name and kind.
    #[error("{kind} '{name}' not found")]
    NotFound { kind: NodeKind, name: String },

    /// A `cd` component did not name a directory.
    #[error("no such directory: '{component}'")]
    PathNotFound { component: String },

    /// The name cannot be stored in a node.
    #[error("invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// The working directory text would exceed its capacity.
    #[error("path exceeds {capacity} bytes")]
    PathTooLong { capacity: usize },

    /// Neither the free list nor the bump region can satisfy a request.
    #[error("arena exhausted: requested {requested} bytes, {available} available")]
    ArenaExhausted { requested: u64, available: u64 },

    /// Block metadata does not describe a block at this offset.
    #[error("corrupt block metadata for offset {offset}")]
    CorruptBlock { offset: Offset },

    /// A node or list record holds values no valid record can hold.
    #[error("corrupt record at offset {offset}: {reason}")]
    CorruptNode { offset: Offset, reason: &'static str },

    /// A read or write would leave the arena.
    #[error("{len} bytes at offset {offset} fall outside the arena")]
    OutOfBounds { offset: Offset, len: u64 },
}

impl CoreError {
    /// Errors after which the segment should not be trusted or grown.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::ArenaExhausted { .. }
                | CoreError::CorruptBlock { .. }
                | CoreError::CorruptNode { .. }
                | CoreError::OutOfBounds { .. }
        )
    }

    /// Check if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CoreError::NotFound { .. } | CoreError::PathNotFound { .. }
        )
    }

    pub(crate) fn corrupt(offset: Offset, reason: &'static str) -> Self {
        CoreError::CorruptNode { offset, reason }
    }
}

/// Engine result type.
pub type Result<T> = core::result::Result<T, CoreError>;
