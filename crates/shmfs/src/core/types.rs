//! Filesystem-level types returned to callers.

use serde::{Deserialize, Serialize};
use shmfs_core::{ArenaStats, ChildEntry, NodeKind};

/// Directory entry returned by `ls`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name
    pub name: String,

    /// File or directory
    pub kind: NodeKind,
}

impl DirEntry {
    /// Check if this is a directory.
    pub fn is_directory(&self) -> bool {
        self.kind.is_directory()
    }
}

impl From<ChildEntry> for DirEntry {
    fn from(entry: ChildEntry) -> Self {
        Self {
            name: entry.name,
            kind: entry.kind,
        }
    }
}

/// Segment usage report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsStats {
    /// Size of the whole segment, prefix included
    pub segment_size: u64,
    /// Allocator view of the arena
    pub arena: ArenaStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use shmfs_core::NodeRef;

    #[test]
    fn test_dir_entry_from_child() {
        let entry = DirEntry::from(ChildEntry {
            node: NodeRef(4200),
            name: "docs".into(),
            kind: NodeKind::Directory,
        });
        assert!(entry.is_directory());
        assert_eq!(entry.name, "docs");
    }

    #[test]
    fn test_dir_entry_serializes_kind() {
        let entry = DirEntry {
            name: "a.txt".into(),
            kind: NodeKind::File,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, r#"{"name":"a.txt","kind":"File"}"#);
    }
}
