//! Segment prefix: magic word handshake and the process-shared lock.
//!
//! Every segment starts with a fixed prefix holding an atomic magic word and a
//! `pthread_rwlock_t` initialized with `PTHREAD_PROCESS_SHARED`. The bytes after
//! the prefix form the arena, and the only way to reach them is through a
//! [`ReadGuard`] or [`WriteGuard`], so holding the lock is a precondition the
//! type system enforces rather than a convention.
//!
//! # Initialization handshake
//!
//! ```text
//!   garbage / DEINITIALIZED ──CAS──▶ INITIALIZING ──publish──▶ INITIALIZED
//!            ▲                            │
//!            └────────── abandon ─────────┘
//! ```
//!
//! Exactly one attacher wins the compare-and-set and performs first-time setup;
//! everybody else observes `INITIALIZING` and waits for `INITIALIZED`.
//!
//! # Safety Invariants
//!
//! 1. The magic word is only touched through `AtomicU64`
//! 2. The lock is initialized before any guard is requested on a fresh segment
//! 3. Arena slices never outlive the guard that produced them

use core::mem::MaybeUninit;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU64, Ordering};

use crate::error::PrimitiveError;
use crate::region::Region;

/// Magic value of a segment whose first-time setup has completed.
pub const MAGIC_INITIALIZED: u64 = 0xDEAD_BEEF;

/// Magic value while one attacher performs first-time setup.
pub const MAGIC_INITIALIZING: u64 = 0xDEAD_C0DE;

/// Magic value written on teardown so a re-attach is not mistaken for live state.
pub const MAGIC_DEINITIALIZED: u64 = 0xDEAD_DEAD;

/// Byte offset of the lock inside the prefix.
const LOCK_OFFSET: usize = 8;

/// Size of the segment prefix; the arena starts right after it.
pub const PREFIX_SIZE: usize = 128;

const _: () = assert!(LOCK_OFFSET + core::mem::size_of::<libc::pthread_rwlock_t>() <= PREFIX_SIZE);

/// Outcome of trying to claim first-time initialization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitClaim {
    /// This caller won the race and must initialize, then publish.
    Claimed,
    /// The segment is already initialized.
    Ready,
    /// Another attacher is initializing; retry later.
    Busy,
}

/// A region with the shmfs prefix laid over it.
pub struct Segment<R: Region> {
    region: R,
}

impl<R: Region> Segment<R> {
    /// Wrap a region, validating its size and alignment.
    pub fn new(region: R) -> Result<Self, PrimitiveError> {
        let required = PREFIX_SIZE + 8;
        if region.len() < required {
            return Err(PrimitiveError::RegionTooSmall {
                len: region.len(),
                required,
            });
        }
        let addr = region.base().as_ptr() as usize;
        if addr % 8 != 0 {
            return Err(PrimitiveError::Misaligned { addr });
        }
        Ok(Self { region })
    }

    /// Borrow the underlying region.
    pub fn region(&self) -> &R {
        &self.region
    }

    /// Unwrap the underlying region.
    pub fn into_region(self) -> R {
        self.region
    }

    /// Length of the arena that follows the prefix.
    pub fn arena_len(&self) -> usize {
        self.region.len() - PREFIX_SIZE
    }

    // ========== Magic word ==========

    fn magic(&self) -> &AtomicU64 {
        // SAFETY: the base is 8-byte aligned (checked in `new`) and valid for
        // the region's lifetime; the word is only accessed atomically.
        unsafe { &*self.region.base().as_ptr().cast::<AtomicU64>() }
    }

    /// Current magic value.
    pub fn magic_value(&self) -> u64 {
        self.magic().load(Ordering::Acquire)
    }

    /// Whether first-time setup has been published.
    pub fn is_initialized(&self) -> bool {
        self.magic_value() == MAGIC_INITIALIZED
    }

    /// Try to claim first-time initialization with a compare-and-set.
    pub fn claim_init(&self) -> InitClaim {
        let magic = self.magic();
        let observed = magic.load(Ordering::Acquire);
        match observed {
            MAGIC_INITIALIZED => InitClaim::Ready,
            MAGIC_INITIALIZING => InitClaim::Busy,
            _ => match magic.compare_exchange(
                observed,
                MAGIC_INITIALIZING,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => InitClaim::Claimed,
                Err(MAGIC_INITIALIZED) => InitClaim::Ready,
                Err(_) => InitClaim::Busy,
            },
        }
    }

    /// Publish a completed first-time setup.
    pub fn publish_init(&self) {
        self.magic().store(MAGIC_INITIALIZED, Ordering::Release);
    }

    /// Give up a claimed initialization so another attacher can retry.
    pub fn abandon_init(&self) {
        self.magic().store(MAGIC_DEINITIALIZED, Ordering::Release);
    }

    /// Mark the segment as torn down.
    ///
    /// Returns true only for the caller that moved it out of the initialized
    /// state; that caller owns destroying the lock.
    pub fn mark_deinitialized(&self) -> bool {
        self.magic().swap(MAGIC_DEINITIALIZED, Ordering::AcqRel) == MAGIC_INITIALIZED
    }

    // ========== Lock ==========

    fn lock_ptr(&self) -> *mut libc::pthread_rwlock_t {
        // SAFETY: LOCK_OFFSET + size_of::<pthread_rwlock_t>() fits in the
        // prefix (const assert above) and the region is at least that long.
        unsafe {
            self.region
                .base()
                .as_ptr()
                .add(LOCK_OFFSET)
                .cast::<libc::pthread_rwlock_t>()
        }
    }

    fn arena_ptr(&self) -> *mut u8 {
        // SAFETY: the region is longer than PREFIX_SIZE (checked in `new`).
        unsafe { self.region.base().as_ptr().add(PREFIX_SIZE) }
    }

    /// Construct the process-shared lock in place.
    ///
    /// Must only be called by the attacher holding an [`InitClaim::Claimed`].
    pub fn init_lock(&self) -> Result<(), PrimitiveError> {
        let mut attr = MaybeUninit::<libc::pthread_rwlockattr_t>::uninit();
        let attr_ptr = attr.as_mut_ptr();
        // SAFETY: attr_ptr points at writable storage for a pthread_rwlockattr_t;
        // it is destroyed on every path after a successful init.
        unsafe {
            check("pthread_rwlockattr_init", libc::pthread_rwlockattr_init(attr_ptr))?;
            let shared =
                libc::pthread_rwlockattr_setpshared(attr_ptr, libc::PTHREAD_PROCESS_SHARED);
            let init = if shared == 0 {
                libc::pthread_rwlock_init(self.lock_ptr(), attr_ptr)
            } else {
                shared
            };
            libc::pthread_rwlockattr_destroy(attr_ptr);
            if shared != 0 {
                return Err(PrimitiveError::lock("pthread_rwlockattr_setpshared", shared));
            }
            check("pthread_rwlock_init", init)
        }
    }

    /// Destroy the lock object. No guard may be alive.
    pub fn destroy_lock(&self) -> Result<(), PrimitiveError> {
        // SAFETY: the lock was initialized by `init_lock`; callers tear down
        // only after every guard from this handle has been dropped.
        check("pthread_rwlock_destroy", unsafe {
            libc::pthread_rwlock_destroy(self.lock_ptr())
        })
    }

    /// Block until the shared (read) lock is held.
    pub fn read(&self) -> Result<ReadGuard<'_>, PrimitiveError> {
        // SAFETY: the lock lives in the prefix and was initialized before the
        // segment was published.
        check("pthread_rwlock_rdlock", unsafe {
            libc::pthread_rwlock_rdlock(self.lock_ptr())
        })?;
        Ok(ReadGuard {
            lock: self.lock_ptr(),
            arena: self.arena_ptr(),
            len: self.arena_len(),
            _segment: core::marker::PhantomData,
        })
    }

    /// Block until the exclusive (write) lock is held.
    pub fn write(&self) -> Result<WriteGuard<'_>, PrimitiveError> {
        // SAFETY: as in `read`.
        check("pthread_rwlock_wrlock", unsafe {
            libc::pthread_rwlock_wrlock(self.lock_ptr())
        })?;
        Ok(WriteGuard {
            lock: self.lock_ptr(),
            arena: self.arena_ptr(),
            len: self.arena_len(),
            _segment: core::marker::PhantomData,
        })
    }
}

fn check(op: &'static str, rc: libc::c_int) -> Result<(), PrimitiveError> {
    if rc == 0 {
        Ok(())
    } else {
        Err(PrimitiveError::lock(op, rc))
    }
}

fn unlock(lock: *mut libc::pthread_rwlock_t) {
    // SAFETY: only called from guard Drop, i.e. while this thread holds the lock.
    let rc = unsafe { libc::pthread_rwlock_unlock(lock) };
    debug_assert_eq!(rc, 0, "pthread_rwlock_unlock failed");
}

impl<R: Region> core::fmt::Debug for Segment<R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Segment")
            .field("base", &self.region.base())
            .field("len", &self.region.len())
            .field("magic", &format_args!("{:#x}", self.magic_value()))
            .finish()
    }
}

// ============================================================================
// Guards
// ============================================================================

/// Shared access to the arena bytes. Unlocks on drop.
pub struct ReadGuard<'a> {
    lock: *mut libc::pthread_rwlock_t,
    arena: *mut u8,
    len: usize,
    _segment: core::marker::PhantomData<&'a ()>,
}

impl Deref for ReadGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: the read lock excludes writers for the guard's lifetime and
        // the arena spans `len` bytes of the region.
        unsafe { core::slice::from_raw_parts(self.arena, self.len) }
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        unlock(self.lock);
    }
}

/// Exclusive access to the arena bytes. Unlocks on drop.
pub struct WriteGuard<'a> {
    lock: *mut libc::pthread_rwlock_t,
    arena: *mut u8,
    len: usize,
    _segment: core::marker::PhantomData<&'a ()>,
}

impl Deref for WriteGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: the write lock is exclusive for the guard's lifetime.
        unsafe { core::slice::from_raw_parts(self.arena, self.len) }
    }
}

impl DerefMut for WriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: the write lock is exclusive and `&mut self` prevents a
        // second live slice from this guard.
        unsafe { core::slice::from_raw_parts_mut(self.arena, self.len) }
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        unlock(self.lock);
    }
}

// ============================================================================
// Tests
// ============================================================================
