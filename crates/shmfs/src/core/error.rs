//! Error types for the filesystem layer.

use std::io;

use shmfs_core::{CoreError, NodeKind};
use shmfs_unsafe_primitives::PrimitiveError;

/// Errors from filesystem operations.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    /// Tree, allocator or navigation failure.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Region validation or lock syscall failure.
    #[error(transparent)]
    Primitive(#[from] PrimitiveError),

    /// Creating, attaching or removing the shared segment failed.
    #[error("shared segment: {0}")]
    Segment(#[source] io::Error),

    /// The segment was torn down (or never set up) under this handle.
    #[error("segment is not initialized")]
    NotInitialized,

    /// Another attacher claimed initialization and never published it.
    #[error("segment initialization did not finish within {waited_ms} ms")]
    InitStalled { waited_ms: u64 },

    /// Invalid or unreadable configuration.
    #[error("configuration: {0}")]
    Config(String),
}

impl FsError {
    /// Create a configuration error with message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Check if this is a "not found" error (missing child or path component).
    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::Core(err) if err.is_not_found())
    }

    /// Check if this is a duplicate-name error.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, FsError::Core(CoreError::DuplicateName { .. }))
    }

    /// Errors after which the caller should stop using the segment.
    ///
    /// Recoverable conditions (duplicates, missing targets, bad names, long
    /// paths, bad config) leave the tree untouched.
    pub fn is_fatal(&self) -> bool {
        match self {
            FsError::Core(err) => err.is_fatal(),
            FsError::Primitive(_) | FsError::Segment(_) | FsError::InitStalled { .. } => true,
            FsError::NotInitialized | FsError::Config(_) => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn not_found(kind: NodeKind, name: &str) -> Self {
        FsError::Core(CoreError::NotFound {
            kind,
            name: name.to_string(),
        })
    }
}

/// Filesystem result type.
pub type FsResult<T> = Result<T, FsError>;
