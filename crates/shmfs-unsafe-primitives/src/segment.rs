//! SysV shared memory segments.
//!
//! Safe wrappers around `ftok`, `shmget`, `shmat`, `shmdt` and `shmctl`. A
//! [`SharedSegment`] is one attachment of a keyed segment into this process;
//! the same key attached twice yields two mappings at different addresses over
//! the same pages.
//!
//! # Cleanup semantics
//!
//! - Dropping a `SharedSegment` only detaches; the segment outlives the process.
//! - [`SharedSegment::remove`] detaches and marks the segment for destruction
//!   (`IPC_RMID`). The kernel frees it once the last attachment is gone.

use core::ptr::NonNull;
use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use tracing::{debug, trace};

use crate::region::Region;

/// Key naming a SysV segment.
pub type SegmentKey = libc::key_t;

/// Permission bits for newly created segments (rw-r--r--).
const SEGMENT_MODE: libc::c_int = 0o644;

/// Derive a segment key from an existing filesystem path and a project id.
///
/// Two processes passing the same path and project id get the same key.
pub fn key_from_path(path: &Path, project_id: u8) -> io::Result<SegmentKey> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"))?;
    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call.
    let key = unsafe { libc::ftok(c_path.as_ptr(), libc::c_int::from(project_id)) };
    if key == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(key)
}

/// One attachment of a SysV shared memory segment.
pub struct SharedSegment {
    id: libc::c_int,
    key: SegmentKey,
    base: NonNull<u8>,
    len: usize,
}

impl SharedSegment {
    /// Attach to the segment named by `key`, creating it with `size` bytes if
    /// it does not exist yet.
    ///
    /// An existing segment keeps its original size; [`Region::len`] reports it.
    pub fn attach_or_create(key: SegmentKey, size: usize) -> io::Result<Self> {
        // SAFETY: plain syscall with integer arguments.
        let mut id = unsafe { libc::shmget(key, size, libc::IPC_CREAT | SEGMENT_MODE) };
        if id == -1 {
            let err = io::Error::last_os_error();
            // An existing segment smaller than `size` rejects the request;
            // attach to it as-is and let the caller validate the length.
            if err.raw_os_error() != Some(libc::EINVAL) {
                return Err(err);
            }
            // SAFETY: as above.
            id = unsafe { libc::shmget(key, 0, 0) };
            if id == -1 {
                return Err(io::Error::last_os_error());
            }
        }
        Self::attach_id(id, key)
    }

    /// Attach to an existing segment without creating it.
    pub fn attach_existing(key: SegmentKey) -> io::Result<Self> {
        // SAFETY: plain syscall with integer arguments.
        let id = unsafe { libc::shmget(key, 0, 0) };
        if id == -1 {
            return Err(io::Error::last_os_error());
        }
        Self::attach_id(id, key)
    }

    fn attach_id(id: libc::c_int, key: SegmentKey) -> io::Result<Self> {
        let len = segment_size(id)?;
        // SAFETY: a null address lets the kernel choose the mapping; the
        // result is checked against the documented (void*)-1 failure value.
        let addr = unsafe { libc::shmat(id, core::ptr::null(), 0) };
        if addr as isize == -1 {
            return Err(io::Error::last_os_error());
        }
        let base = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "shmat returned null"))?;
        debug!(key, id, len, addr = ?base, "attached shared segment");
        Ok(Self { id, key, base, len })
    }

    /// The kernel identifier of the segment.
    pub fn id(&self) -> libc::c_int {
        self.id
    }

    /// The key the segment was attached with.
    pub fn key(&self) -> SegmentKey {
        self.key
    }

    /// Detach without removing the segment.
    pub fn detach(self) -> io::Result<()> {
        let result = self.detach_inner();
        core::mem::forget(self);
        result
    }

    fn detach_inner(&self) -> io::Result<()> {
        // SAFETY: base is the address returned by shmat and is detached once.
        let rc = unsafe { libc::shmdt(self.base.as_ptr().cast::<libc::c_void>()) };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
        trace!(id = self.id, "detached shared segment");
        Ok(())
    }
}

fn segment_size(id: libc::c_int) -> io::Result<usize> {
    // SAFETY: shmid_ds is plain old data; IPC_STAT fills it in.
    let mut stat: libc::shmid_ds = unsafe { core::mem::zeroed() };
    // SAFETY: `stat` is a valid, writable shmid_ds.
    let rc = unsafe { libc::shmctl(id, libc::IPC_STAT, &mut stat) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(stat.shm_segsz as usize)
}

// SAFETY: shmat mappings are page aligned and stay valid for `len` bytes
// until shmdt, which only runs in `detach`, `remove` or Drop.
unsafe impl Region for SharedSegment {
    fn base(&self) -> NonNull<u8> {
        self.base
    }

    fn len(&self) -> usize {
        self.len
    }

    fn remove(self) -> io::Result<()> {
        let id = self.id;
        self.detach()?;
        // SAFETY: IPC_RMID ignores the buffer argument.
        let rc = unsafe { libc::shmctl(id, libc::IPC_RMID, core::ptr::null_mut()) };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
        debug!(id, "removed shared segment");
        Ok(())
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        let _ = self.detach_inner();
    }
}

// SAFETY: the mapping is process-wide; all concurrent access to its bytes is
// mediated by the segment lock or atomics.
unsafe impl Send for SharedSegment {}
unsafe impl Sync for SharedSegment {}

impl core::fmt::Debug for SharedSegment {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SharedSegment")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("base", &self.base)
            .field("len", &self.len)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_key(dir: &tempfile::TempDir) -> SegmentKey {
        key_from_path(dir.path(), b'p').unwrap()
    }

    #[test]
    fn test_key_from_path_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(fresh_key(&dir), fresh_key(&dir));
    }

    #[test]
    fn test_key_from_missing_path_fails() {
        let err = key_from_path(Path::new("/definitely/not/here"), 1).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_two_attachments_share_pages() {
        let dir = tempfile::tempdir().unwrap();
        let key = fresh_key(&dir);

        let first = SharedSegment::attach_or_create(key, 64 * 1024).unwrap();
        let second = SharedSegment::attach_or_create(key, 64 * 1024).unwrap();
        assert_eq!(first.id(), second.id());
        assert_ne!(first.base(), second.base());
        assert!(first.len() >= 64 * 1024);

        unsafe { first.base().as_ptr().add(100).write(0xAB) };
        let seen = unsafe { second.base().as_ptr().add(100).read() };
        assert_eq!(seen, 0xAB);

        second.detach().unwrap();
        first.remove().unwrap();
        assert!(SharedSegment::attach_existing(key).is_err());
    }
}
