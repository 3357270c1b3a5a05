//! Heap-backed filesystem for testing.
//!
//! Runs the real engine and locking over process-private memory, so tests get
//! the exact shared-memory semantics without creating SysV objects. Extra
//! handles made with [`MemoryFs::attach_shared`] behave like additional
//! processes attached to the same segment.

use std::sync::Arc;
use std::time::Duration;

use shmfs_unsafe_primitives::HeapRegion;

use crate::core::FsResult;
use crate::filesystem::ShmFileSystem;

/// Default size of a [`MemoryFs`] region: 1 MiB.
pub const MEMORY_FS_SIZE: usize = 1024 * 1024;

/// In-memory filesystem for testing.
pub type MemoryFs = ShmFileSystem<Arc<HeapRegion>>;

impl ShmFileSystem<Arc<HeapRegion>> {
    /// Create a fresh, initialized in-memory filesystem.
    pub fn new() -> FsResult<Self> {
        Self::with_size(MEMORY_FS_SIZE)
    }

    /// Create a fresh filesystem over a region of `size` bytes.
    pub fn with_size(size: usize) -> FsResult<Self> {
        Self::attach(Arc::new(HeapRegion::new(size)), Duration::from_secs(1))
    }

    /// Another handle on the same region, as a second process would see it.
    pub fn attach_shared(&self) -> FsResult<Self> {
        Self::attach(Arc::clone(self.region()), Duration::from_secs(1))
    }
}
