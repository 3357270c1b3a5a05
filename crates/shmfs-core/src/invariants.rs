//! Runtime-checkable arena invariants
//!
//! These should hold between any two public operations. They are used for:
//! 1. Assertions in unit and property tests
//! 2. The `check` command, which reports violations instead of panicking
//!
//! # Invariants
//!
//! 1. **List Linkage**: `n.next.prev == n` and `n.prev.next == n` for every
//!    node of every list, and each ring's length matches its header
//! 2. **Parent Backrefs**: every live child's parent field names the directory
//!    whose list holds it
//! 3. **Sibling Uniqueness**: no two live children share name and kind
//! 4. **Current Directory**: `cur_dir` is a directory reachable from the root
//!    and the stored pwd spells its path
//! 5. **Block Validity**: every free block has valid metadata below the bump
//!    offset

use std::collections::HashSet;

use crate::arena;
use crate::clist::CList;
use crate::error::{CoreError, Result};
use crate::header::{self, HDR_FREE_LIST};
use crate::tree;
use crate::types::{NodeKind, NodeRef, NIL};

/// An invariant violation with details
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvariantViolation {
    /// Name of the violated invariant
    pub invariant: &'static str,
    /// Description of what went wrong
    pub description: String,
}

impl InvariantViolation {
    fn new(invariant: &'static str, description: impl Into<String>) -> Self {
        Self {
            invariant,
            description: description.into(),
        }
    }
}

/// Check all arena invariants.
///
/// Returns a list of violations (empty if all invariants hold).
pub fn check_all_invariants(arena: &[u8]) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    violations.extend(check_free_list(arena));
    let reachable = match check_tree(arena, &mut violations) {
        Ok(reachable) => reachable,
        Err(err) => {
            violations.push(InvariantViolation::new("readable", err.to_string()));
            return violations;
        }
    };
    violations.extend(check_current_directory(arena, &reachable));

    violations
}

/// Invariant 1 for a single list.
fn check_list(arena: &[u8], list: CList, owner: &str) -> Vec<InvariantViolation> {
    match ring_length(arena, list) {
        Ok(()) => Vec::new(),
        Err(err) => vec![InvariantViolation::new(
            "list_linkage",
            format!("{owner}: {err}"),
        )],
    }
}

/// Walk a ring checking back links, and compare its length with the header.
fn ring_length(arena: &[u8], list: CList) -> Result<()> {
    let len = list.len(arena)?;
    let end = list.end(arena)?;
    let mut node = end;
    let mut steps = 0u64;
    loop {
        let next = list.next(arena, node)?;
        if list.prev(arena, next)? != node {
            return Err(CoreError::corrupt(node, "successor does not link back"));
        }
        node = next;
        if node == end {
            break;
        }
        steps += 1;
        if steps > len {
            return Err(CoreError::corrupt(node, "ring is longer than its length"));
        }
    }
    if steps != len {
        return Err(CoreError::corrupt(
            list.header(),
            "ring is shorter than its length",
        ));
    }
    Ok(())
}

/// Invariants 1 and 5 for the allocator's free list.
fn check_free_list(arena: &[u8]) -> Vec<InvariantViolation> {
    let mut violations = check_list(arena, CList::open(HDR_FREE_LIST), "free list");
    if !violations.is_empty() {
        return violations;
    }
    match arena::free_blocks(arena) {
        Ok(blocks) => {
            for block in blocks {
                if !arena::is_valid_block(arena, block) {
                    violations.push(InvariantViolation::new(
                        "block_validity",
                        format!("free block at {block} has invalid metadata"),
                    ));
                }
            }
        }
        Err(err) => violations.push(InvariantViolation::new("block_validity", err.to_string())),
    }
    violations
}

/// Invariants 1-3 over every directory reachable from the root.
///
/// Returns the set of reachable directories.
fn check_tree(
    arena: &[u8],
    violations: &mut Vec<InvariantViolation>,
) -> Result<HashSet<NodeRef>> {
    let root = header::root(arena)?;
    let bump = header::bump(arena)?;
    let mut reachable = HashSet::new();
    let mut pending = vec![root];

    while let Some(dir) = pending.pop() {
        if !reachable.insert(dir) {
            violations.push(InvariantViolation::new(
                "parent_backrefs",
                format!("directory {} is reachable twice", dir.0),
            ));
            continue;
        }
        let list = tree::child_list(arena, dir)?;
        let list_violations = check_list(arena, list, &format!("directory {}", dir.0));
        if !list_violations.is_empty() {
            violations.extend(list_violations);
            continue;
        }

        let mut names = HashSet::new();
        for item in list.iter(arena) {
            let (_, child) = item?;
            if child == NIL {
                continue;
            }
            if child >= bump {
                violations.push(InvariantViolation::new(
                    "block_validity",
                    format!("child {child} of {} lies past the bump offset", dir.0),
                ));
                continue;
            }
            let node = NodeRef(child);
            if tree::node_parent(arena, node)? != Some(dir) {
                violations.push(InvariantViolation::new(
                    "parent_backrefs",
                    format!("node {child} is listed under {} but names another parent", dir.0),
                ));
            }
            let kind = tree::node_kind(arena, node)?;
            let name = tree::node_name(arena, node)?;
            if !names.insert((kind, name.clone())) {
                violations.push(InvariantViolation::new(
                    "sibling_uniqueness",
                    format!("{kind} '{name}' appears twice under {}", dir.0),
                ));
            }
            if kind == NodeKind::Directory {
                pending.push(node);
            }
        }
    }
    Ok(reachable)
}

/// Invariant 4: the current directory and pwd text agree.
fn check_current_directory(
    arena: &[u8],
    reachable: &HashSet<NodeRef>,
) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    let result = (|| -> Result<()> {
        let cur = header::cur_dir(arena)?;
        if !reachable.contains(&cur) {
            violations.push(InvariantViolation::new(
                "current_directory",
                format!("current directory {} is not reachable from the root", cur.0),
            ));
            return Ok(());
        }
        let mut parts = Vec::new();
        let mut node = cur;
        while let Some(parent) = tree::node_parent(arena, node)? {
            if parts.len() > reachable.len() {
                return Err(CoreError::corrupt(cur.0, "parent chain does not reach the root"));
            }
            parts.push(tree::node_name(arena, node)?);
            node = parent;
        }
        parts.reverse();
        let expected = format!("/{}", parts.join("/"));
        let stored = header::pwd(arena)?;
        if stored != expected {
            violations.push(InvariantViolation::new(
                "current_directory",
                format!("pwd is '{stored}' but the current directory is '{expected}'"),
            ));
        }
        Ok(())
    })();
    if let Err(err) = result {
        violations.push(InvariantViolation::new("current_directory", err.to_string()));
    }
    violations
}
