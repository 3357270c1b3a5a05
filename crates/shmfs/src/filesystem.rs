//! Attached file tree: segment lifecycle and locked operations.
//!
//! # Lifecycle
//!
//! ```text
//!   attach ──▶ claim_init ──┬─ Claimed ──▶ lock + format + root ──▶ publish
//!                           ├─ Ready ────────────────────────────────┐
//!                           └─ Busy ──▶ yield until Ready or timeout │
//!                                                                    ▼
//!                                                                  READY
//!                                                                    │
//!                      deinit: take + drop write lock ───────────────┤
//!                                                                    ▼
//!                      force_deinit: DEINITIALIZED, destroy lock, remove
//! ```
//!
//! Every operation takes the segment lock for its whole duration: the write
//! lock for anything that changes the tree or the current directory, the
//! read lock otherwise. The engine only ever sees the arena slice borrowed
//! from that guard.

use std::time::{Duration, Instant};

use shmfs_core::{
    arena, check_all_invariants, header, navigate, tree, CoreError, InvariantViolation, NodeKind,
};
use shmfs_unsafe_primitives::{InitClaim, ReadGuard, Region, Segment, SharedSegment, WriteGuard};
use tracing::{debug, info, warn};

use crate::config::FsConfig;
use crate::core::{DirEntry, FsError, FsResult, FsStats};
use crate::service::FsService;

/// A handle on a file tree living in region `R`.
///
/// Created by [`ShmFileSystem::init`] (shared memory) or
/// [`ShmFileSystem::attach`] (any region). Dropping the handle only detaches;
/// [`deinit`](Self::deinit) and [`force_deinit`](Self::force_deinit) tear the
/// segment down for everybody.
pub struct ShmFileSystem<R: Region> {
    segment: Segment<R>,
}

impl ShmFileSystem<SharedSegment> {
    /// Attach to the configured shared segment, creating and initializing it
    /// if this is the first attachment.
    pub fn init(config: &FsConfig) -> FsResult<Self> {
        config.validate()?;
        let key = config.resolve_key()?;
        let region =
            SharedSegment::attach_or_create(key, config.segment_size).map_err(FsError::Segment)?;
        Self::attach(region, config.init_wait())
    }
}

impl<R: Region> ShmFileSystem<R> {
    /// Lay the filesystem over `region`, initializing it if no one has.
    ///
    /// Waits up to `init_wait` for a concurrent initializer to publish.
    pub fn attach(region: R, init_wait: Duration) -> FsResult<Self> {
        let segment = Segment::new(region)?;
        let started = Instant::now();
        loop {
            match segment.claim_init() {
                InitClaim::Ready => {
                    info!(size = segment.region().len(), "attached to initialized segment");
                    break;
                }
                InitClaim::Claimed => {
                    initialize(&segment)?;
                    break;
                }
                InitClaim::Busy => {
                    let waited = started.elapsed();
                    if waited >= init_wait {
                        let waited_ms = waited.as_millis() as u64;
                        warn!(waited_ms, "segment initialization stalled");
                        return Err(FsError::InitStalled { waited_ms });
                    }
                    std::thread::yield_now();
                }
            }
        }
        Ok(Self { segment })
    }

    /// The underlying region.
    pub fn region(&self) -> &R {
        self.segment.region()
    }

    /// Whether the segment still carries the initialized magic.
    pub fn is_initialized(&self) -> bool {
        self.segment.is_initialized()
    }

    /// Wait for in-flight operations, then tear the segment down.
    ///
    /// The magic word flips while the write lock is held, so operations queued
    /// behind it see [`FsError::NotInitialized`] instead of a torn-down arena.
    pub fn deinit(self) -> FsResult<()> {
        let owns_lock = {
            let _guard = self.lock_write()?;
            self.segment.mark_deinitialized()
        };
        self.teardown(owns_lock)
    }

    /// Tear the segment down without waiting for the lock.
    pub fn force_deinit(self) -> FsResult<()> {
        let owns_lock = self.segment.mark_deinitialized();
        if !owns_lock {
            warn!("segment was not initialized; removing it without destroying the lock");
        }
        self.teardown(owns_lock)
    }

    fn teardown(self, destroy_lock: bool) -> FsResult<()> {
        if destroy_lock {
            if let Err(err) = self.segment.destroy_lock() {
                warn!(%err, "destroying the segment lock failed");
            }
        }
        self.segment
            .into_region()
            .remove()
            .map_err(FsError::Segment)?;
        info!("segment torn down");
        Ok(())
    }

    fn ensure_initialized(&self) -> FsResult<()> {
        if self.segment.is_initialized() {
            Ok(())
        } else {
            Err(FsError::NotInitialized)
        }
    }

    fn lock_read(&self) -> FsResult<ReadGuard<'_>> {
        self.ensure_initialized()?;
        let guard = self.segment.read()?;
        // Teardown may have won the race for the lock.
        self.ensure_initialized()?;
        Ok(guard)
    }

    fn lock_write(&self) -> FsResult<WriteGuard<'_>> {
        self.ensure_initialized()?;
        let guard = self.segment.write()?;
        self.ensure_initialized()?;
        Ok(guard)
    }

    fn read<T>(&self, op: impl FnOnce(&[u8]) -> Result<T, CoreError>) -> FsResult<T> {
        let arena = self.lock_read()?;
        Ok(op(&arena)?)
    }

    fn write<T>(&self, op: impl FnOnce(&mut [u8]) -> Result<T, CoreError>) -> FsResult<T> {
        let mut arena = self.lock_write()?;
        Ok(op(&mut arena)?)
    }
}

/// First-time setup, run by the attacher that won the claim.
///
/// On failure the claim is released; a lock that was already built is
/// destroyed first so the next claimant starts from uninitialized memory.
fn initialize<R: Region>(segment: &Segment<R>) -> FsResult<()> {
    if let Err(err) = segment.init_lock() {
        segment.abandon_init();
        warn!(%err, "segment lock initialization failed");
        return Err(err.into());
    }
    match build_arena(segment) {
        Ok(()) => {
            segment.publish_init();
            info!(size = segment.region().len(), "initialized fresh segment");
            Ok(())
        }
        Err(err) => {
            if let Err(lock_err) = segment.destroy_lock() {
                warn!(err = %lock_err, "destroying the segment lock failed");
            }
            segment.abandon_init();
            warn!(%err, "segment initialization failed");
            Err(err)
        }
    }
}

fn build_arena<R: Region>(segment: &Segment<R>) -> FsResult<()> {
    let mut arena = segment.write()?;
    arena::format(&mut arena)?;
    tree::bootstrap_root(&mut arena)?;
    Ok(())
}

impl<R: Region> FsService for ShmFileSystem<R> {
    fn cd(&self, path: &str) -> FsResult<()> {
        self.write(|arena| navigate::cd(arena, path))
    }

    fn pwd(&self) -> FsResult<String> {
        self.read(header::pwd)
    }

    fn mkdir(&self, name: &str) -> FsResult<()> {
        self.write(|arena| {
            let cur = header::cur_dir(arena)?;
            tree::create_node(arena, cur, NodeKind::Directory, name, None).map(drop)
        })
    }

    fn rmdir(&self, name: &str) -> FsResult<()> {
        self.write(|arena| {
            let cur = header::cur_dir(arena)?;
            tree::remove_child(arena, cur, NodeKind::Directory, name)
        })
    }

    fn ls(&self) -> FsResult<Vec<DirEntry>> {
        self.read(|arena| {
            let cur = header::cur_dir(arena)?;
            Ok(tree::children(arena, cur)?
                .into_iter()
                .map(DirEntry::from)
                .collect())
        })
    }

    fn create_file(&self, name: &str, data: Option<&[u8]>) -> FsResult<()> {
        self.write(|arena| {
            let cur = header::cur_dir(arena)?;
            tree::create_node(arena, cur, NodeKind::File, name, data).map(drop)
        })
    }

    fn alter_file(&self, name: &str, data: &[u8]) -> FsResult<()> {
        self.write(|arena| {
            let cur = header::cur_dir(arena)?;
            let file = tree::require_child(arena, cur, NodeKind::File, name)?;
            tree::set_file_data(arena, file, data)?;
            debug!(name, len = data.len(), "altered file");
            Ok(())
        })
    }

    fn read_file(&self, name: &str) -> FsResult<Option<Vec<u8>>> {
        self.read(|arena| {
            let cur = header::cur_dir(arena)?;
            let file = tree::require_child(arena, cur, NodeKind::File, name)?;
            tree::file_data(arena, file)
        })
    }

    fn remove_file(&self, name: &str) -> FsResult<()> {
        self.write(|arena| {
            let cur = header::cur_dir(arena)?;
            tree::remove_child(arena, cur, NodeKind::File, name)
        })
    }

    fn stats(&self) -> FsResult<FsStats> {
        let segment_size = self.segment.region().len() as u64;
        self.read(|arena| {
            Ok(FsStats {
                segment_size,
                arena: arena::stats(arena)?,
            })
        })
    }

    fn check(&self) -> FsResult<Vec<InvariantViolation>> {
        self.read(|arena| Ok(check_all_invariants(arena)))
    }
}

impl<R: Region> std::fmt::Debug for ShmFileSystem<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmFileSystem")
            .field("segment", &self.segment)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use shmfs_unsafe_primitives::{HeapRegion, MAGIC_DEINITIALIZED, MAGIC_INITIALIZING};
    use std::sync::Arc;

    const SIZE: usize = 256 * 1024;

    fn fresh() -> ShmFileSystem<Arc<HeapRegion>> {
        ShmFileSystem::attach(Arc::new(HeapRegion::new(SIZE)), Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn test_fresh_attach_initializes() {
        let fs = fresh();
        assert!(fs.is_initialized());
        assert_eq!(fs.pwd().unwrap(), "/");
        assert!(fs.ls().unwrap().is_empty());
        assert!(fs.check().unwrap().is_empty());
    }

    #[test]
    fn test_second_attach_keeps_tree() {
        let fs = fresh();
        fs.mkdir("kept").unwrap();
        let other =
            ShmFileSystem::attach(Arc::clone(fs.region()), Duration::from_secs(1)).unwrap();
        assert!(other.has_dir("kept").unwrap());
    }

    #[test]
    fn test_stalled_initializer_times_out() {
        let region = Arc::new(HeapRegion::new(SIZE));
        let claimant = Segment::new(Arc::clone(&region)).unwrap();
        assert_eq!(claimant.claim_init(), InitClaim::Claimed);
        assert_eq!(claimant.magic_value(), MAGIC_INITIALIZING);

        let err = ShmFileSystem::attach(region, Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, FsError::InitStalled { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_force_deinit_marks_segment() {
        let fs = fresh();
        let region = Arc::clone(fs.region());
        let probe = Segment::new(Arc::clone(&region)).unwrap();
        fs.force_deinit().unwrap();
        assert_eq!(probe.magic_value(), MAGIC_DEINITIALIZED);
    }

    #[test]
    fn test_reattach_after_deinit_starts_empty() {
        let fs = fresh();
        let region = Arc::clone(fs.region());
        fs.mkdir("old").unwrap();
        fs.deinit().unwrap();

        let again = ShmFileSystem::attach(region, Duration::from_secs(1)).unwrap();
        assert!(again.ls().unwrap().is_empty());
        assert_eq!(again.pwd().unwrap(), "/");
    }

    #[test]
    fn test_region_too_small_for_header() {
        let region = Arc::new(HeapRegion::new(1024));
        let err = ShmFileSystem::attach(Arc::clone(&region), Duration::from_secs(1)).unwrap_err();
        assert!(matches!(
            err,
            FsError::Core(CoreError::ArenaExhausted { .. })
        ));
        // The failed claim is released for the next attacher.
        let observer = Segment::new(Arc::clone(&region)).unwrap();
        assert_eq!(observer.magic_value(), MAGIC_DEINITIALIZED);

        // A retry claims again and builds its lock from scratch.
        let err = ShmFileSystem::attach(Arc::clone(&region), Duration::from_secs(1)).unwrap_err();
        assert!(matches!(
            err,
            FsError::Core(CoreError::ArenaExhausted { .. })
        ));
        assert_eq!(observer.magic_value(), MAGIC_DEINITIALIZED);
        assert_eq!(observer.claim_init(), InitClaim::Claimed);
        observer.init_lock().unwrap();
        drop(observer.write().unwrap());
        observer.destroy_lock().unwrap();
    }

    #[test]
    fn test_survivor_after_teardown_is_not_initialized() {
        let fs = fresh();
        fs.mkdir("a").unwrap();
        let survivor =
            ShmFileSystem::attach(Arc::clone(fs.region()), Duration::from_secs(1)).unwrap();
        fs.force_deinit().unwrap();

        let err = survivor.mkdir("after_teardown").unwrap_err();
        assert!(matches!(err, FsError::NotInitialized));
        assert!(!err.is_fatal());
        assert!(matches!(survivor.ls(), Err(FsError::NotInitialized)));
        assert!(matches!(survivor.cd("a"), Err(FsError::NotInitialized)));

        // Forcing teardown again must not destroy the lock a second time.
        let observer = Segment::new(Arc::clone(survivor.region())).unwrap();
        survivor.force_deinit().unwrap();
        assert_eq!(observer.magic_value(), MAGIC_DEINITIALIZED);
    }

    #[test]
    fn test_deinit_twice_reports_not_initialized() {
        let fs = fresh();
        let other =
            ShmFileSystem::attach(Arc::clone(fs.region()), Duration::from_secs(1)).unwrap();
        fs.deinit().unwrap();
        assert!(matches!(other.deinit(), Err(FsError::NotInitialized)));
    }
}
