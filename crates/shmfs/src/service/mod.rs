//! Filesystem service trait

mod trait_def;

pub use trait_def::FsService;
