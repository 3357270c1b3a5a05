//! Errors raised by the unsafe primitives.

/// Failures from region validation and lock syscalls.
#[derive(Debug, thiserror::Error)]
pub enum PrimitiveError {
    /// The region cannot hold the segment prefix plus any arena bytes.
    #[error("region of {len} bytes is too small, at least {required} bytes are required")]
    RegionTooSmall { len: usize, required: usize },

    /// The region base address is not 8-byte aligned.
    #[error("region base address {addr:#x} is not 8-byte aligned")]
    Misaligned { addr: usize },

    /// A pthread reader-writer lock call returned an error code.
    #[error("{op} failed with errno {errno}")]
    Lock { op: &'static str, errno: i32 },
}

impl PrimitiveError {
    pub(crate) fn lock(op: &'static str, errno: i32) -> Self {
        Self::Lock { op, errno }
    }

    /// The raw errno for lock failures.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Lock { errno, .. } => Some(*errno),
            _ => None,
        }
    }
}
