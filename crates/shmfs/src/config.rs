//! Attachment configuration.
//!
//! Every process that should see the same tree must agree on the segment key.
//! The key is either given explicitly or derived with `ftok` from an existing
//! path and a project id; by default the path is the running executable, so
//! every invocation of the same binary shares one tree.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shmfs_core::HEADER_SIZE;
use shmfs_unsafe_primitives::{segment::key_from_path, SegmentKey, PREFIX_SIZE};

use crate::core::{FsError, FsResult};

/// Default segment size: 100 MiB.
pub const DEFAULT_SEGMENT_SIZE: usize = 100 * 1024 * 1024;

/// Default time to wait for another process to finish initializing.
pub const DEFAULT_INIT_WAIT_MS: u64 = 5_000;

/// Default `ftok` project id.
pub const DEFAULT_PROJECT_ID: u8 = b'S';

/// Smallest segment that leaves room for a few nodes after the header.
pub const MIN_SEGMENT_SIZE: usize = PREFIX_SIZE + HEADER_SIZE as usize + 4096;

/// How to find and size the shared segment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    /// Existing path fed to `ftok`. `None` means the current executable.
    pub key_path: Option<PathBuf>,

    /// `ftok` project id.
    pub project_id: u8,

    /// Explicit key; takes precedence over `key_path`.
    pub key: Option<SegmentKey>,

    /// Size used when the segment is created.
    pub segment_size: usize,

    /// How long to wait for a concurrent initializer, in milliseconds.
    pub init_wait_ms: u64,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            key_path: None,
            project_id: DEFAULT_PROJECT_ID,
            key: None,
            segment_size: DEFAULT_SEGMENT_SIZE,
            init_wait_ms: DEFAULT_INIT_WAIT_MS,
        }
    }
}

impl FsConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> FsResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| FsError::config(format!("invalid config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON config file.
    pub fn load(path: &Path) -> FsResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| FsError::config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    /// Use an explicit key.
    pub fn with_key(mut self, key: SegmentKey) -> Self {
        self.key = Some(key);
        self
    }

    /// Derive the key from this path.
    pub fn with_key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    /// Set the creation size.
    pub fn with_segment_size(mut self, size: usize) -> Self {
        self.segment_size = size;
        self
    }

    /// Set the initialization wait.
    pub fn with_init_wait_ms(mut self, ms: u64) -> Self {
        self.init_wait_ms = ms;
        self
    }

    /// Reject values no segment can work with.
    pub fn validate(&self) -> FsResult<()> {
        if self.segment_size < MIN_SEGMENT_SIZE {
            return Err(FsError::config(format!(
                "segment_size {} is below the minimum of {MIN_SEGMENT_SIZE} bytes",
                self.segment_size
            )));
        }
        if self.project_id == 0 {
            return Err(FsError::config("project_id must be non-zero"));
        }
        Ok(())
    }

    /// Wait bound for a concurrent initializer.
    pub fn init_wait(&self) -> Duration {
        Duration::from_millis(self.init_wait_ms)
    }

    /// The segment key every cooperating process computes.
    pub fn resolve_key(&self) -> FsResult<SegmentKey> {
        if let Some(key) = self.key {
            return Ok(key);
        }
        let path = match &self.key_path {
            Some(path) => path.clone(),
            None => std::env::current_exe().map_err(FsError::Segment)?,
        };
        key_from_path(&path, self.project_id).map_err(FsError::Segment)
    }
}
