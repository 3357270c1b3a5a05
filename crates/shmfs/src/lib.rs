//! shmfs - A File Tree in Shared Memory
//!
//! shmfs keeps a hierarchical file/directory tree entirely inside one SysV
//! shared memory segment. The first process to attach initializes it; every
//! later process attaching with the same key sees the same tree, including the
//! same current directory, and can change it.
//!
//! - **Filesystem**: `ShmFileSystem`, the attached handle and its lifecycle
//! - **Service**: `FsService` trait with the tree operations
//! - **Config**: `FsConfig`, how processes agree on a segment
//! - **Testing**: `MemoryFs`, the same engine over heap memory
//!
//! # Design Principles
//!
//! 1. **One segment, one lock**: every operation holds a process-shared
//!    reader-writer lock for its whole duration
//! 2. **Offsets only**: the tree stores arena offsets, never addresses
//! 3. **Lock before bytes**: the engine can only reach arena bytes through a
//!    lock guard
//! 4. **No disk**: the tree lives until the segment is removed
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               shmfs                                     │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐   │
//! │  │                 ShmFileSystem<R>  (FsService)                    │   │
//! │  │  • init / attach / deinit    • read or write guard per call      │   │
//! │  └────────────────────────────────┬─────────────────────────────────┘   │
//! │                                   │ &mut [u8]                           │
//! │                                   ▼                                     │
//! │  ┌──────────────────────────────────────────────────────────────────┐   │
//! │  │                  shmfs-core (forbid(unsafe_code))                │   │
//! │  │  • navigate    • tree    • clist    • arena    • invariants      │   │
//! │  └──────────────────────────────────────────────────────────────────┘   │
//! │                                   ▲                                     │
//! │                                   │ guards                              │
//! │  ┌──────────────────────────────────────────────────────────────────┐   │
//! │  │                    shmfs-unsafe-primitives                       │   │
//! │  │  • SysV segment   • magic word   • pthread rwlock (pshared)      │   │
//! │  └──────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod core;
pub mod filesystem;
pub mod service;
pub mod testing;

// Convenient re-exports at crate root
pub use config::FsConfig;
pub use self::core::{DirEntry, FsError, FsResult, FsStats};
pub use filesystem::ShmFileSystem;
pub use service::FsService;
pub use shmfs_core::{InvariantViolation, NodeKind};
pub use shmfs_unsafe_primitives::{HeapRegion, Region, SharedSegment};
pub use testing::MemoryFs;
