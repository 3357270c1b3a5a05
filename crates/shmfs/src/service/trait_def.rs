//! FsService trait definition.

use shmfs_core::InvariantViolation;

use crate::core::{DirEntry, FsError, FsStats};

/// Operations on an attached file tree.
///
/// All names are single components resolved against the current directory;
/// only `cd` accepts a multi-component path. The current directory lives in
/// the shared segment, so every attached process sees the same one.
pub trait FsService {
    // ========== Navigation ==========

    /// Change the current directory. On failure it stays where it was.
    fn cd(&self, path: &str) -> Result<(), FsError>;

    /// Path of the current directory, `/` at the root.
    fn pwd(&self) -> Result<String, FsError>;

    // ========== Directory Operations ==========

    /// Create a directory in the current directory.
    fn mkdir(&self, name: &str) -> Result<(), FsError>;

    /// Remove a directory of the current directory and everything below it.
    fn rmdir(&self, name: &str) -> Result<(), FsError>;

    /// List the current directory in creation order.
    fn ls(&self) -> Result<Vec<DirEntry>, FsError>;

    // ========== File Operations ==========

    /// Create a file, optionally with initial contents.
    fn create_file(&self, name: &str, data: Option<&[u8]>) -> Result<(), FsError>;

    /// Replace a file's contents.
    fn alter_file(&self, name: &str, data: &[u8]) -> Result<(), FsError>;

    /// Read a file; `None` if it was created without data and never written.
    fn read_file(&self, name: &str) -> Result<Option<Vec<u8>>, FsError>;

    /// Delete a file.
    fn remove_file(&self, name: &str) -> Result<(), FsError>;

    // ========== Diagnostics ==========

    /// Allocator and segment usage.
    fn stats(&self) -> Result<FsStats, FsError>;

    /// Run the invariant checker over the whole tree.
    fn check(&self) -> Result<Vec<InvariantViolation>, FsError>;

    /// Check if a directory with this name exists in the current directory.
    fn has_dir(&self, name: &str) -> Result<bool, FsError> {
        Ok(self
            .ls()?
            .iter()
            .any(|entry| entry.is_directory() && entry.name == name))
    }
}
