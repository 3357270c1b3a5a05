//! Core filesystem types and errors

mod error;
mod types;

pub use error::{FsError, FsResult};
pub use types::{DirEntry, FsStats};
