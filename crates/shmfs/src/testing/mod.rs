//! Test doubles

mod memory_fs;

pub use memory_fs::{MemoryFs, MEMORY_FS_SIZE};
