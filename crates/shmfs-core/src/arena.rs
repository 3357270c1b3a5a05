//! Arena allocator: bump allocation with first-fit reuse of freed blocks.
//!
//! Every block is preceded by 16 bytes of metadata:
//!
//! ```text
//! block ──▶ ┌──────────────────────────┐
//!           │ capacity (meta included) │
//!           │ usable offset            │
//! usable ──▶├──────────────────────────┤
//!           │ payload ...              │
//!           └──────────────────────────┘
//! ```
//!
//! Freed blocks go onto a circular list whose nodes live inside the freed
//! payloads, so releasing memory never needs to allocate. Blocks are never
//! split or merged; a reused block keeps its original capacity.
//!
//! The allocator does no locking. Callers hand in arena bytes borrowed from a
//! held write guard.

use tracing::trace;

use crate::clist::{CList, InPlace, NODE_SIZE};
use crate::error::{CoreError, Result};
use crate::header::{self, HDR_FREE_LIST, HDR_FREE_SENTINEL, HEADER_SIZE};
use crate::mem::{align8, read_u64, write_u64, zero};
use crate::types::{ArenaStats, Offset};

/// Size of the metadata preceding every block.
pub const META_SIZE: u64 = 16;

const META_CAPACITY: Offset = 0;
const META_USABLE: Offset = 8;

/// Payload bytes actually reserved for a request of `size` bytes.
///
/// Rounded to 8 and to at least one list node, so a freed block can carry its
/// own free-list link. `None` if the rounded size does not fit in a `u64`.
pub fn payload_size(size: u64) -> Option<u64> {
    align8(size).map(|payload| payload.max(NODE_SIZE))
}

fn free_list() -> CList {
    CList::open(HDR_FREE_LIST)
}

/// Write a fresh header: empty free list, nothing allocated, no tree.
pub fn format(arena: &mut [u8]) -> Result<()> {
    let available = arena.len() as u64;
    if available < HEADER_SIZE + META_SIZE + NODE_SIZE {
        return Err(CoreError::ArenaExhausted {
            requested: HEADER_SIZE + META_SIZE + NODE_SIZE,
            available,
        });
    }
    zero(arena, 0, HEADER_SIZE)?;
    header::set_bump(arena, HEADER_SIZE)?;
    CList::create_in_place(arena, HDR_FREE_LIST, HDR_FREE_SENTINEL)?;
    header::set_pwd(arena, b"")?;
    trace!(arena_size = available, "formatted arena");
    Ok(())
}

/// Reserve at least `size` bytes and return the usable offset.
pub fn allocate(arena: &mut [u8], size: u64) -> Result<Offset> {
    let needed = payload_size(size)
        .and_then(|payload| payload.checked_add(META_SIZE))
        .ok_or(CoreError::ArenaExhausted {
            requested: size,
            available: arena.len() as u64,
        })?;

    let free = free_list();
    let mut hit = None;
    for item in free.iter(arena) {
        let (node, usable) = item?;
        if recorded_capacity(arena, usable)? >= needed {
            hit = Some((node, usable));
            break;
        }
    }
    if let Some((node, usable)) = hit {
        free.remove(arena, node, &InPlace)?;
        trace!(size, usable, "reused free block");
        return Ok(usable);
    }

    let bump = header::bump(arena)?;
    let arena_size = arena.len() as u64;
    let end = bump.saturating_add(needed);
    if end > arena_size {
        return Err(CoreError::ArenaExhausted {
            requested: needed,
            available: arena_size.saturating_sub(bump),
        });
    }
    write_u64(arena, bump + META_CAPACITY, needed)?;
    write_u64(arena, bump + META_USABLE, bump + META_SIZE)?;
    header::set_bump(arena, end)?;
    trace!(size, usable = bump + META_SIZE, "bump allocated block");
    Ok(bump + META_SIZE)
}

/// Return a block to the free list.
pub fn deallocate(arena: &mut [u8], usable: Offset) -> Result<()> {
    validate_block(arena, usable)?;
    free_list().push_back(arena, usable, &InPlace)?;
    trace!(usable, "freed block");
    Ok(())
}

/// Usable payload bytes of an allocated block.
pub fn block_capacity(arena: &[u8], usable: Offset) -> Result<u64> {
    validate_block(arena, usable).map(|capacity| capacity - META_SIZE)
}

/// Check a block's metadata and return its capacity including metadata.
fn validate_block(arena: &[u8], usable: Offset) -> Result<u64> {
    let corrupt = CoreError::CorruptBlock { offset: usable };
    let bump = header::bump(arena)?;
    if usable < HEADER_SIZE + META_SIZE || usable % 8 != 0 || usable >= bump {
        return Err(corrupt);
    }
    let block = usable - META_SIZE;
    let capacity = read_u64(arena, block + META_CAPACITY)?;
    let recorded = read_u64(arena, block + META_USABLE)?;
    let fits = block
        .checked_add(capacity)
        .is_some_and(|end| end <= bump);
    if recorded != usable || capacity < META_SIZE + NODE_SIZE || capacity % 8 != 0 || !fits {
        return Err(corrupt);
    }
    Ok(capacity)
}

fn recorded_capacity(arena: &[u8], usable: Offset) -> Result<u64> {
    let block = usable
        .checked_sub(META_SIZE)
        .ok_or(CoreError::CorruptBlock { offset: usable })?;
    read_u64(arena, block + META_CAPACITY)
}

/// Usage snapshot of the arena.
pub fn stats(arena: &[u8]) -> Result<ArenaStats> {
    let mut stats = ArenaStats {
        arena_size: arena.len() as u64,
        bump_offset: header::bump(arena)?,
        ..ArenaStats::default()
    };
    for item in free_list().iter(arena) {
        let (_, usable) = item?;
        stats.free_blocks += 1;
        stats.free_bytes += recorded_capacity(arena, usable)?;
    }
    Ok(stats)
}

/// Usable offsets of every block on the free list, front to back.
pub fn free_blocks(arena: &[u8]) -> Result<Vec<Offset>> {
    free_list().iter(arena).map(|item| item.map(|(_, usable)| usable)).collect()
}

pub(crate) fn is_valid_block(arena: &[u8], usable: Offset) -> bool {
    validate_block(arena, usable).is_ok()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const ARENA: usize = 16 * 1024;

    fn formatted() -> Vec<u8> {
        let mut arena = vec![0u8; ARENA];
        format(&mut arena).unwrap();
        arena
    }

    #[test]
    fn test_format_rejects_tiny_arena() {
        let mut arena = vec![0u8; 64];
        assert!(matches!(
            format(&mut arena),
            Err(CoreError::ArenaExhausted { .. })
        ));
    }

    #[test]
    fn test_payload_rounding() {
        assert_eq!(payload_size(0), Some(NODE_SIZE));
        assert_eq!(payload_size(5), Some(NODE_SIZE));
        assert_eq!(payload_size(25), Some(32));
        assert_eq!(payload_size(112), Some(112));
        assert_eq!(payload_size(u64::MAX), None);
    }

    #[test]
    fn test_oversized_request_is_exhaustion() {
        let mut arena = formatted();
        let before = stats(&arena).unwrap();
        for size in [u64::MAX, u64::MAX - 7, u64::MAX - META_SIZE] {
            assert!(matches!(
                allocate(&mut arena, size),
                Err(CoreError::ArenaExhausted { .. })
            ));
        }
        assert_eq!(stats(&arena).unwrap(), before);
    }

    #[test]
    fn test_bump_allocation_is_sequential() {
        let mut arena = formatted();
        let a = allocate(&mut arena, 10).unwrap();
        let b = allocate(&mut arena, 40).unwrap();
        assert_eq!(a, HEADER_SIZE + META_SIZE);
        assert_eq!(b, a + NODE_SIZE + META_SIZE);
        assert_eq!(block_capacity(&arena, a).unwrap(), NODE_SIZE);
        assert_eq!(block_capacity(&arena, b).unwrap(), 40);
        assert_eq!(stats(&arena).unwrap().bump_offset, b + 40);
    }

    #[test]
    fn test_freed_block_is_reused_without_bump() {
        let mut arena = formatted();
        let a = allocate(&mut arena, 64).unwrap();
        allocate(&mut arena, 8).unwrap();
        deallocate(&mut arena, a).unwrap();
        let before = stats(&arena).unwrap();
        assert_eq!(before.free_blocks, 1);
        assert_eq!(before.free_bytes, 64 + META_SIZE);

        let again = allocate(&mut arena, 64).unwrap();
        assert_eq!(again, a);
        let after = stats(&arena).unwrap();
        assert_eq!(after.bump_offset, before.bump_offset);
        assert_eq!(after.free_blocks, 0);
    }

    #[test]
    fn test_first_fit_skips_small_blocks_and_never_splits() {
        let mut arena = formatted();
        let small = allocate(&mut arena, 24).unwrap();
        let large = allocate(&mut arena, 256).unwrap();
        allocate(&mut arena, 8).unwrap();
        deallocate(&mut arena, small).unwrap();
        deallocate(&mut arena, large).unwrap();

        let got = allocate(&mut arena, 100).unwrap();
        assert_eq!(got, large);
        assert_eq!(block_capacity(&arena, got).unwrap(), 256);
        assert_eq!(free_blocks(&arena).unwrap(), vec![small]);
    }

    #[test]
    fn test_exhaustion_reports_sizes() {
        let mut arena = formatted();
        let err = allocate(&mut arena, ARENA as u64).unwrap_err();
        match err {
            CoreError::ArenaExhausted {
                requested,
                available,
            } => {
                assert_eq!(requested, ARENA as u64 + META_SIZE);
                assert_eq!(available, ARENA as u64 - HEADER_SIZE);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_fatal());
    }

    #[test]
    fn test_deallocate_rejects_bad_offsets() {
        let mut arena = formatted();
        let a = allocate(&mut arena, 32).unwrap();
        assert!(matches!(
            deallocate(&mut arena, a + 8),
            Err(CoreError::CorruptBlock { .. })
        ));
        assert!(deallocate(&mut arena, 0).is_err());
        assert!(deallocate(&mut arena, a + 4096).is_err());
        deallocate(&mut arena, a).unwrap();
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn accounting_balances(
                ops in prop::collection::vec((any::<bool>(), 0u64..300), 1..80)
            ) {
                let mut arena = formatted();
                let mut live: Vec<Offset> = Vec::new();
                for (free, size) in ops {
                    if free && !live.is_empty() {
                        let at = live.swap_remove(size as usize % live.len());
                        deallocate(&mut arena, at).unwrap();
                    } else if let Ok(at) = allocate(&mut arena, size) {
                        let capacity = block_capacity(&arena, at).unwrap();
                        prop_assert!(capacity >= payload_size(size).unwrap());
                        prop_assert!(!live.contains(&at));
                        live.push(at);
                    }
                }
                let stats = stats(&arena).unwrap();
                let live_bytes: u64 = live
                    .iter()
                    .map(|at| block_capacity(&arena, *at).unwrap() + META_SIZE)
                    .sum();
                prop_assert_eq!(HEADER_SIZE + live_bytes + stats.free_bytes, stats.bump_offset);
            }
        }
    }
}
