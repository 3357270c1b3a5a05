//! shmfs Core - Safe File Tree Engine over Arena Bytes
//!
//! This crate contains the **lock-free, syscall-free** engine that lays a file
//! tree out inside a byte arena. It never touches raw pointers: every entry
//! point takes the arena as `&[u8]` or `&mut [u8]`, which callers can only
//! borrow from a lock guard held on the shared segment.
//!
//! # Design Principles
//!
//! 1. **Offsets, not pointers**: every stored reference is an arena offset, so
//!    processes may map the segment at different addresses
//! 2. **No unsafe**: `#![forbid(unsafe_code)]`; bounds are checked on access
//! 3. **No locking**: exclusion is the caller's guard
//! 4. **Checkable**: invariants can be asserted between any two operations
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        shmfs-core                           │
//! │                                                             │
//! │   ┌───────────────┐    ┌───────────────┐                   │
//! │   │   navigate    │───▶│     tree      │                   │
//! │   │  cd / pwd     │    │ nodes, lookup │                   │
//! │   └───────────────┘    └───────┬───────┘                   │
//! │                                │                            │
//! │                 ┌──────────────┴─────────────┐              │
//! │                 ▼                            ▼              │
//! │   ┌───────────────┐              ┌───────────────┐          │
//! │   │     clist     │◀────────────▶│     arena     │          │
//! │   │ circular list │  free list   │  first fit    │          │
//! │   └───────────────┘              └───────────────┘          │
//! │                                                             │
//! │   header (offset 0)              invariants                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! - `types` - Offsets, node handles and kinds, allocator stats
//! - `header` - The segment header at arena offset 0
//! - `arena` - Bump allocator with first-fit free list
//! - `clist` - Intrusive circular doubly-linked list
//! - `tree` - File and directory nodes
//! - `navigate` - `cd` with rollback
//! - `invariants` - Runtime-checkable invariants

#![forbid(unsafe_code)]

pub mod arena;
pub mod clist;
pub mod error;
pub mod header;
pub mod invariants;
mod mem;
pub mod navigate;
pub mod tree;
pub mod types;

// Re-export commonly used items
pub use error::{CoreError, Result};
pub use header::{HEADER_SIZE, PWD_CAPACITY};
pub use invariants::{check_all_invariants, InvariantViolation};
pub use tree::NAME_CAPACITY;
pub use types::{ArenaStats, ChildEntry, NodeKind, NodeRef, Offset, NIL};
