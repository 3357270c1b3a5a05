//! Node tree: files and directories linked by parent offsets and child lists.
//!
//! # Node layout
//!
//! ```text
//! 0    parent offset (NIL for the root)
//! 8    kind (1 = file, 2 = directory)
//! 16   flags (bit 0: file has data)
//! 24   payload offset (file bytes, or the directory's child list header)
//! 32   payload length
//! 40   name length
//! 48   name bytes (NAME_CAPACITY)
//! ```
//!
//! Directories own a [`CList`] of child offsets. Destroying a node clears its
//! slot in the parent list to NIL (a tombstone) instead of unlinking it, so a
//! walk over that list stays valid; [`compact_children`] drops the tombstones
//! once no walk is in progress.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::arena;
use crate::clist::{ArenaNodes, CList};
use crate::error::{CoreError, Result};
use crate::header;
use crate::mem::{read_bytes, read_u64, write_bytes, write_u64, zero};
use crate::types::{ChildEntry, NodeKind, NodeRef, Offset, NIL};

const NODE_PARENT: Offset = 0;
const NODE_KIND: Offset = 8;
const NODE_FLAGS: Offset = 16;
const NODE_PAYLOAD: Offset = 24;
const NODE_PAYLOAD_LEN: Offset = 32;
const NODE_NAME_LEN: Offset = 40;
const NODE_NAME: Offset = 48;

/// Longest storable name in bytes.
pub const NAME_CAPACITY: usize = 64;

/// Size of a node record.
pub const NODE_SIZE: u64 = NODE_NAME + NAME_CAPACITY as u64;

const FLAG_HAS_DATA: u64 = 1;

// ============================================================================
// Names
// ============================================================================

/// Check that `name` can be stored as a single path component.
pub fn validate_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name.len() > NAME_CAPACITY {
        Some("name is longer than 64 bytes")
    } else if name.contains('/') {
        Some("name contains '/'")
    } else if name.contains('\0') {
        Some("name contains a NUL byte")
    } else if name == "." || name == ".." {
        Some("name is reserved")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(CoreError::InvalidName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

// ============================================================================
// Accessors
// ============================================================================

fn field(arena: &[u8], node: NodeRef, at: Offset) -> Result<u64> {
    read_u64(arena, node.0 + at)
}

/// Kind of a node.
pub fn node_kind(arena: &[u8], node: NodeRef) -> Result<NodeKind> {
    NodeKind::from_raw(field(arena, node, NODE_KIND)?)
        .ok_or_else(|| CoreError::corrupt(node.0, "unknown node kind"))
}

fn name_bytes(arena: &[u8], node: NodeRef) -> Result<&[u8]> {
    let len = field(arena, node, NODE_NAME_LEN)?;
    if len > NAME_CAPACITY as u64 {
        return Err(CoreError::corrupt(node.0, "name length exceeds capacity"));
    }
    read_bytes(arena, node.0 + NODE_NAME, len)
}

/// Name of a node. The root's name is empty.
pub fn node_name(arena: &[u8], node: NodeRef) -> Result<String> {
    Ok(String::from_utf8_lossy(name_bytes(arena, node)?).into_owned())
}

/// Parent of a node, `None` for the root.
pub fn node_parent(arena: &[u8], node: NodeRef) -> Result<Option<NodeRef>> {
    let raw = field(arena, node, NODE_PARENT)?;
    Ok((raw != NIL).then_some(NodeRef(raw)))
}

pub(crate) fn child_list(arena: &[u8], dir: NodeRef) -> Result<CList> {
    if node_kind(arena, dir)? != NodeKind::Directory {
        return Err(CoreError::corrupt(dir.0, "expected a directory"));
    }
    let header = field(arena, dir, NODE_PAYLOAD)?;
    if header == NIL {
        return Err(CoreError::corrupt(dir.0, "directory has no child list"));
    }
    Ok(CList::open(header))
}

/// A file's contents: `None` when never written, possibly empty otherwise.
pub fn file_data(arena: &[u8], file: NodeRef) -> Result<Option<Vec<u8>>> {
    if node_kind(arena, file)? != NodeKind::File {
        return Err(CoreError::corrupt(file.0, "expected a file"));
    }
    if field(arena, file, NODE_FLAGS)? & FLAG_HAS_DATA == 0 {
        return Ok(None);
    }
    let payload = field(arena, file, NODE_PAYLOAD)?;
    if payload == NIL {
        return Ok(Some(Vec::new()));
    }
    let len = field(arena, file, NODE_PAYLOAD_LEN)?;
    Ok(Some(read_bytes(arena, payload, len)?.to_vec()))
}

// ============================================================================
// Lookup
// ============================================================================

/// Live children of a directory, in insertion order.
pub fn children(arena: &[u8], dir: NodeRef) -> Result<Vec<ChildEntry>> {
    let mut out = Vec::new();
    for item in child_list(arena, dir)?.iter(arena) {
        let (_, child) = item?;
        if child == NIL {
            continue;
        }
        let node = NodeRef(child);
        out.push(ChildEntry {
            node,
            name: node_name(arena, node)?,
            kind: node_kind(arena, node)?,
        });
    }
    Ok(out)
}

/// Find the live child of `parent` with this kind and name.
pub fn find_child(
    arena: &[u8],
    parent: NodeRef,
    kind: NodeKind,
    name: &str,
) -> Result<Option<NodeRef>> {
    for item in child_list(arena, parent)?.iter(arena) {
        let (_, child) = item?;
        if child == NIL {
            continue;
        }
        let node = NodeRef(child);
        if node_kind(arena, node)? == kind && name_bytes(arena, node)? == name.as_bytes() {
            return Ok(Some(node));
        }
    }
    Ok(None)
}

/// Like [`find_child`], but a miss is a `NotFound` error.
pub fn require_child(arena: &[u8], parent: NodeRef, kind: NodeKind, name: &str) -> Result<NodeRef> {
    find_child(arena, parent, kind, name)?.ok_or_else(|| CoreError::NotFound {
        kind,
        name: name.to_string(),
    })
}

// ============================================================================
// Creation
// ============================================================================

/// Create the root directory and point the header at it.
pub fn bootstrap_root(arena: &mut [u8]) -> Result<NodeRef> {
    let offset = arena::allocate(arena, NODE_SIZE)?;
    let list = match CList::create(arena) {
        Ok(list) => list,
        Err(err) => {
            rollback(arena, &[offset]);
            return Err(err);
        }
    };
    let root = NodeRef(offset);
    write_node(arena, root, NIL, NodeKind::Directory, "", (list.header(), 0, 0))?;
    header::set_root(arena, root)?;
    header::set_cur_dir(arena, root)?;
    header::set_pwd(arena, b"/")?;
    debug!(root = root.0, "created root directory");
    Ok(root)
}

/// Create a child of `parent`.
///
/// Files may carry initial data; `Some(&[])` records an empty file, `None` a
/// file that was never written. On any failure the blocks taken so far are
/// returned to the allocator.
pub fn create_node(
    arena: &mut [u8],
    parent: NodeRef,
    kind: NodeKind,
    name: &str,
    data: Option<&[u8]>,
) -> Result<NodeRef> {
    validate_name(name)?;
    let siblings = child_list(arena, parent)?;
    if find_child(arena, parent, kind, name)?.is_some() {
        return Err(CoreError::DuplicateName {
            kind,
            name: name.to_string(),
        });
    }

    let (payload, payload_len, flags) = match kind {
        NodeKind::File => store_data(arena, data)?,
        NodeKind::Directory => (NIL, 0, 0),
    };
    let offset = match arena::allocate(arena, NODE_SIZE) {
        Ok(offset) => offset,
        Err(err) => {
            rollback(arena, &[payload]);
            return Err(err);
        }
    };
    let payload = match kind {
        NodeKind::File => payload,
        NodeKind::Directory => match CList::create(arena) {
            Ok(list) => list.header(),
            Err(err) => {
                rollback(arena, &[offset]);
                return Err(err);
            }
        },
    };

    let node = NodeRef(offset);
    let linked = write_node(arena, node, parent.0, kind, name, (payload, payload_len, flags))
        .and_then(|()| siblings.push_back(arena, node.0, &ArenaNodes));
    if let Err(err) = linked {
        rollback(arena, &[payload, offset]);
        return Err(err);
    }
    debug!(parent = parent.0, node = node.0, %kind, child = name, "created node");
    Ok(node)
}

fn write_node(
    arena: &mut [u8],
    node: NodeRef,
    parent: Offset,
    kind: NodeKind,
    name: &str,
    (payload, payload_len, flags): (Offset, u64, u64),
) -> Result<()> {
    zero(arena, node.0, NODE_SIZE)?;
    write_u64(arena, node.0 + NODE_PARENT, parent)?;
    write_u64(arena, node.0 + NODE_KIND, kind.to_raw())?;
    write_u64(arena, node.0 + NODE_FLAGS, flags)?;
    write_u64(arena, node.0 + NODE_PAYLOAD, payload)?;
    write_u64(arena, node.0 + NODE_PAYLOAD_LEN, payload_len)?;
    write_u64(arena, node.0 + NODE_NAME_LEN, name.len() as u64)?;
    write_bytes(arena, node.0 + NODE_NAME, name.as_bytes())
}

/// Copy file data into a fresh block: `(payload, len, flags)`.
fn store_data(arena: &mut [u8], data: Option<&[u8]>) -> Result<(Offset, u64, u64)> {
    match data {
        None => Ok((NIL, 0, 0)),
        Some([]) => Ok((NIL, 0, FLAG_HAS_DATA)),
        Some(bytes) => {
            let payload = arena::allocate(arena, bytes.len() as u64)?;
            if let Err(err) = write_bytes(arena, payload, bytes) {
                rollback(arena, &[payload]);
                return Err(err);
            }
            Ok((payload, bytes.len() as u64, FLAG_HAS_DATA))
        }
    }
}

/// Release blocks taken by a failed operation. Errors here would only hide the
/// original failure, so they are logged.
fn rollback(arena: &mut [u8], blocks: &[Offset]) {
    for &block in blocks.iter().filter(|block| **block != NIL) {
        if let Err(err) = arena::deallocate(arena, block) {
            warn!(block, %err, "failed to release block during rollback");
        }
    }
}

/// Replace a file's contents in full.
pub fn set_file_data(arena: &mut [u8], file: NodeRef, data: &[u8]) -> Result<()> {
    if node_kind(arena, file)? != NodeKind::File {
        return Err(CoreError::corrupt(file.0, "expected a file"));
    }
    let old = field(arena, file, NODE_PAYLOAD)?;
    let (payload, len, flags) = store_data(arena, Some(data))?;
    write_u64(arena, file.0 + NODE_PAYLOAD, payload)?;
    write_u64(arena, file.0 + NODE_PAYLOAD_LEN, len)?;
    write_u64(arena, file.0 + NODE_FLAGS, flags)?;
    if old != NIL {
        arena::deallocate(arena, old)?;
    }
    Ok(())
}

// ============================================================================
// Destruction
// ============================================================================

/// Destroy a node and everything below it. NIL and the root are ignored.
///
/// Children go before their parent. Each destroyed node's slot in its parent's
/// list becomes a tombstone; call [`compact_children`] on the surviving parent
/// afterwards.
pub fn destroy_node(arena: &mut [u8], node: NodeRef) -> Result<()> {
    if node.0 == NIL || node == header::root(arena)? {
        return Ok(());
    }
    let mut work = vec![(node, false)];
    let mut seen = HashSet::new();
    while let Some((current, expanded)) = work.pop() {
        if !expanded && node_kind(arena, current)? == NodeKind::Directory {
            if !seen.insert(current) {
                return Err(CoreError::corrupt(current.0, "directory reached twice"));
            }
            work.push((current, true));
            for child in children(arena, current)? {
                work.push((child.node, false));
            }
            continue;
        }
        release_node(arena, current)?;
    }
    Ok(())
}

fn release_node(arena: &mut [u8], node: NodeRef) -> Result<()> {
    if let Some(parent) = node_parent(arena, node)? {
        tombstone(arena, parent, node)?;
    }
    match node_kind(arena, node)? {
        NodeKind::File => {
            let payload = field(arena, node, NODE_PAYLOAD)?;
            if payload != NIL {
                arena::deallocate(arena, payload)?;
            }
        }
        NodeKind::Directory => child_list(arena, node)?.destroy(arena, &ArenaNodes)?,
    }
    zero(arena, node.0, NODE_SIZE)?;
    arena::deallocate(arena, node.0)
}

fn tombstone(arena: &mut [u8], parent: NodeRef, child: NodeRef) -> Result<()> {
    let list = child_list(arena, parent)?;
    let mut slot = None;
    for item in list.iter(arena) {
        let (node, value) = item?;
        if value == child.0 {
            slot = Some(node);
            break;
        }
    }
    let slot =
        slot.ok_or_else(|| CoreError::corrupt(child.0, "node missing from its parent's list"))?;
    list.set(arena, slot, NIL)
}

/// Drop tombstoned slots from a directory's child list. Returns how many.
pub fn compact_children(arena: &mut [u8], dir: NodeRef) -> Result<u64> {
    let list = child_list(arena, dir)?;
    let mut dead = Vec::new();
    for item in list.iter(arena) {
        let (node, value) = item?;
        if value == NIL {
            dead.push(node);
        }
    }
    for &slot in &dead {
        list.remove(arena, slot, &ArenaNodes)?;
    }
    Ok(dead.len() as u64)
}

/// Destroy the named child of `parent` and compact the parent's list.
pub fn remove_child(arena: &mut [u8], parent: NodeRef, kind: NodeKind, name: &str) -> Result<()> {
    let node = require_child(arena, parent, kind, name)?;
    destroy_node(arena, node)?;
    compact_children(arena, parent)?;
    debug!(parent = parent.0, node = node.0, %kind, child = name, "removed node");
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{format, stats};

    fn fresh(len: usize) -> (Vec<u8>, NodeRef) {
        let mut arena = vec![0u8; len];
        format(&mut arena).unwrap();
        let root = bootstrap_root(&mut arena).unwrap();
        (arena, root)
    }

    fn names(arena: &[u8], dir: NodeRef) -> Vec<(String, NodeKind)> {
        children(arena, dir)
            .unwrap()
            .into_iter()
            .map(|entry| (entry.name, entry.kind))
            .collect()
    }

    #[test]
    fn test_bootstrap_root() {
        let (arena, root) = fresh(64 * 1024);
        assert_eq!(header::root(&arena).unwrap(), root);
        assert_eq!(header::cur_dir(&arena).unwrap(), root);
        assert_eq!(header::pwd(&arena).unwrap(), "/");
        assert_eq!(node_kind(&arena, root).unwrap(), NodeKind::Directory);
        assert_eq!(node_parent(&arena, root).unwrap(), None);
        assert!(children(&arena, root).unwrap().is_empty());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("notes.txt").is_ok());
        assert!(validate_name(&"a".repeat(NAME_CAPACITY)).is_ok());
        for bad in ["", ".", "..", "a/b", "nul\0"] {
            assert!(
                matches!(validate_name(bad), Err(CoreError::InvalidName { .. })),
                "{bad:?} should be rejected"
            );
        }
        assert!(validate_name(&"a".repeat(NAME_CAPACITY + 1)).is_err());
    }

    #[test]
    fn test_create_and_find() {
        let (mut arena, root) = fresh(64 * 1024);
        let dir = create_node(&mut arena, root, NodeKind::Directory, "docs", None).unwrap();
        let file = create_node(&mut arena, root, NodeKind::File, "a.txt", Some(b"hi")).unwrap();

        assert_eq!(find_child(&arena, root, NodeKind::Directory, "docs").unwrap(), Some(dir));
        assert_eq!(find_child(&arena, root, NodeKind::File, "a.txt").unwrap(), Some(file));
        assert_eq!(find_child(&arena, root, NodeKind::File, "docs").unwrap(), None);
        assert_eq!(node_parent(&arena, dir).unwrap(), Some(root));
        assert_eq!(
            names(&arena, root),
            vec![
                ("docs".to_string(), NodeKind::Directory),
                ("a.txt".to_string(), NodeKind::File)
            ]
        );
    }

    #[test]
    fn test_duplicate_name_same_kind_only() {
        let (mut arena, root) = fresh(64 * 1024);
        create_node(&mut arena, root, NodeKind::Directory, "x", None).unwrap();
        let err = create_node(&mut arena, root, NodeKind::Directory, "x", None).unwrap_err();
        assert_eq!(
            err,
            CoreError::DuplicateName {
                kind: NodeKind::Directory,
                name: "x".to_string()
            }
        );
        create_node(&mut arena, root, NodeKind::File, "x", None).unwrap();
        assert_eq!(children(&arena, root).unwrap().len(), 2);
    }

    #[test]
    fn test_file_data_absent_empty_and_replaced() {
        let (mut arena, root) = fresh(64 * 1024);
        let never = create_node(&mut arena, root, NodeKind::File, "never", None).unwrap();
        let empty = create_node(&mut arena, root, NodeKind::File, "empty", Some(b"")).unwrap();
        assert_eq!(file_data(&arena, never).unwrap(), None);
        assert_eq!(file_data(&arena, empty).unwrap(), Some(Vec::new()));

        set_file_data(&mut arena, never, b"hello world").unwrap();
        assert_eq!(file_data(&arena, never).unwrap(), Some(b"hello world".to_vec()));
        set_file_data(&mut arena, never, b"bye").unwrap();
        assert_eq!(file_data(&arena, never).unwrap(), Some(b"bye".to_vec()));
        assert_eq!(stats(&arena).unwrap().free_blocks, 1);
    }

    #[test]
    fn test_destroy_is_recursive_and_frees_everything() {
        let (mut arena, root) = fresh(64 * 1024);
        let before = stats(&arena).unwrap();

        let top = create_node(&mut arena, root, NodeKind::Directory, "top", None).unwrap();
        let mid = create_node(&mut arena, top, NodeKind::Directory, "mid", None).unwrap();
        create_node(&mut arena, mid, NodeKind::File, "leaf", Some(b"data")).unwrap();
        create_node(&mut arena, top, NodeKind::File, "side", None).unwrap();

        remove_child(&mut arena, root, NodeKind::Directory, "top").unwrap();
        let after = stats(&arena).unwrap();
        assert!(children(&arena, root).unwrap().is_empty());
        assert_eq!(
            after.free_bytes,
            after.bump_offset - before.bump_offset,
            "every block allocated for the subtree should be free again"
        );
    }

    #[test]
    fn test_destroy_ignores_root_and_nil() {
        let (mut arena, root) = fresh(64 * 1024);
        destroy_node(&mut arena, root).unwrap();
        destroy_node(&mut arena, NodeRef(NIL)).unwrap();
        assert_eq!(node_kind(&arena, root).unwrap(), NodeKind::Directory);
    }

    #[test]
    fn test_tombstone_then_compact() {
        let (mut arena, root) = fresh(64 * 1024);
        let a = create_node(&mut arena, root, NodeKind::File, "a", None).unwrap();
        create_node(&mut arena, root, NodeKind::File, "b", None).unwrap();
        destroy_node(&mut arena, a).unwrap();

        let list = child_list(&arena, root).unwrap();
        assert_eq!(list.len(&arena).unwrap(), 2);
        assert_eq!(names(&arena, root), vec![("b".to_string(), NodeKind::File)]);

        assert_eq!(compact_children(&mut arena, root).unwrap(), 1);
        assert_eq!(list.len(&arena).unwrap(), 1);
        assert_eq!(compact_children(&mut arena, root).unwrap(), 0);
    }

    #[test]
    fn test_removed_file_memory_is_reused() {
        let (mut arena, root) = fresh(64 * 1024);
        create_node(&mut arena, root, NodeKind::File, "a", Some(&[7u8; 100])).unwrap();
        remove_child(&mut arena, root, NodeKind::File, "a").unwrap();
        let bump = stats(&arena).unwrap().bump_offset;

        create_node(&mut arena, root, NodeKind::File, "b", Some(&[1u8; 60])).unwrap();
        let after = stats(&arena).unwrap();
        assert_eq!(after.bump_offset, bump);
        assert_eq!(after.free_blocks, 0);
    }

    #[test]
    fn test_deep_tree_destroy() {
        let (mut arena, root) = fresh(2 * 1024 * 1024);
        let mut dir = root;
        for _ in 0..2000 {
            dir = create_node(&mut arena, dir, NodeKind::Directory, "d", None).unwrap();
        }
        remove_child(&mut arena, root, NodeKind::Directory, "d").unwrap();
        assert!(children(&arena, root).unwrap().is_empty());
    }

    #[test]
    fn test_failed_create_releases_blocks() {
        // Room for the node and child list of one directory, not its slot.
        let size = (header::HEADER_SIZE + 184 + 128 + 56 + 20) as usize;
        let (mut arena, root) = fresh(size);
        let before = stats(&arena).unwrap();

        let err = create_node(&mut arena, root, NodeKind::Directory, "d", None).unwrap_err();
        assert!(matches!(err, CoreError::ArenaExhausted { .. }));

        let after = stats(&arena).unwrap();
        assert!(after.bump_offset > before.bump_offset);
        assert_eq!(after.free_bytes, after.bump_offset - before.bump_offset);
        assert!(children(&arena, root).unwrap().is_empty());
    }
}
