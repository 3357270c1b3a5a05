//! shmfs Unsafe Primitives - Consolidated Unsafe Code TCB
//!
//! This crate contains ALL unsafe code in shmfs, consolidated into a single
//! auditable location. The engine crates are `#![forbid(unsafe_code)]` and
//! only ever see arena bytes as `&[u8]` / `&mut [u8]` borrowed from a lock
//! guard handed out here.
//!
//! # Design Principles
//!
//! 1. **Minimal unsafe surface**: raw memory, SysV IPC and pthread calls only
//! 2. **Safe wrappers**: every unsafe call sits behind a safe interface
//! 3. **Lock before bytes**: arena bytes are unreachable without a guard
//! 4. **Verified**: loom model of the initialization handshake
//!
//! # Segment Layout
//!
//! ```text
//! offset 0            8                          PREFIX_SIZE
//! ┌──────────────────┬──────────────────────────┬──────────────────────────┐
//! │ magic (AtomicU64)│ pthread_rwlock_t (pshared)│ arena bytes ...          │
//! └──────────────────┴──────────────────────────┴──────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! - `region` - the `Region` trait and a heap-backed region for tests
//! - `segment` - SysV shared memory segments (`ftok`/`shmget`/`shmat`)
//! - `sync` - magic word handshake and the process-shared reader-writer lock
//! - `loom_tests` - concurrency tests using loom (with `loom` feature)

pub mod error;
pub mod region;
pub mod segment;
pub mod sync;


// Re-export commonly used items
pub use error::PrimitiveError;
pub use region::{HeapRegion, Region};
pub use segment::{key_from_path, SegmentKey, SharedSegment};
pub use sync::{
    InitClaim, ReadGuard, Segment, WriteGuard, MAGIC_DEINITIALIZED, MAGIC_INITIALIZED,
    MAGIC_INITIALIZING, PREFIX_SIZE,
};
