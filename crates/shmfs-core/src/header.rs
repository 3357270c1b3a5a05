//! Segment header at arena offset 0.
//!
//! ```text
//! 0     bump offset
//! 8     free list header   { len, sentinel }
//! 24    free list sentinel { next, prev, data }
//! 48    root node
//! 56    current directory node
//! 64    pwd length
//! 72    pwd text (PWD_CAPACITY bytes)
//! ```

use crate::error::{CoreError, Result};
use crate::mem::{read_bytes, read_u64, write_bytes, write_u64};
use crate::types::{NodeRef, Offset, NIL};

pub(crate) const HDR_BUMP: Offset = 0;
pub(crate) const HDR_FREE_LIST: Offset = 8;
pub(crate) const HDR_FREE_SENTINEL: Offset = 24;
const HDR_ROOT: Offset = 48;
const HDR_CUR_DIR: Offset = 56;
const HDR_PWD_LEN: Offset = 64;
const HDR_PWD_TEXT: Offset = 72;

/// Capacity of the stored working directory text.
pub const PWD_CAPACITY: usize = 4096;

/// Size of the header; the first block starts here.
pub const HEADER_SIZE: u64 = HDR_PWD_TEXT + PWD_CAPACITY as u64;

pub(crate) fn bump(arena: &[u8]) -> Result<u64> {
    read_u64(arena, HDR_BUMP)
}

pub(crate) fn set_bump(arena: &mut [u8], value: u64) -> Result<()> {
    write_u64(arena, HDR_BUMP, value)
}

fn node_at(arena: &[u8], field: Offset) -> Result<Option<NodeRef>> {
    let raw = read_u64(arena, field)?;
    Ok((raw != NIL).then_some(NodeRef(raw)))
}

fn require_node(arena: &[u8], field: Offset, reason: &'static str) -> Result<NodeRef> {
    node_at(arena, field)?.ok_or_else(|| CoreError::corrupt(field, reason))
}

/// The root directory.
pub fn root(arena: &[u8]) -> Result<NodeRef> {
    require_node(arena, HDR_ROOT, "header has no root directory")
}

pub(crate) fn set_root(arena: &mut [u8], node: NodeRef) -> Result<()> {
    write_u64(arena, HDR_ROOT, node.0)
}

/// The current working directory.
pub fn cur_dir(arena: &[u8]) -> Result<NodeRef> {
    require_node(arena, HDR_CUR_DIR, "header has no current directory")
}

pub(crate) fn set_cur_dir(arena: &mut [u8], node: NodeRef) -> Result<()> {
    write_u64(arena, HDR_CUR_DIR, node.0)
}

pub(crate) fn pwd_bytes(arena: &[u8]) -> Result<&[u8]> {
    let len = read_u64(arena, HDR_PWD_LEN)?;
    if len > PWD_CAPACITY as u64 {
        return Err(CoreError::corrupt(HDR_PWD_LEN, "pwd length exceeds capacity"));
    }
    read_bytes(arena, HDR_PWD_TEXT, len)
}

/// The working directory as text.
pub fn pwd(arena: &[u8]) -> Result<String> {
    Ok(String::from_utf8_lossy(pwd_bytes(arena)?).into_owned())
}

pub(crate) fn set_pwd(arena: &mut [u8], text: &[u8]) -> Result<()> {
    if text.len() > PWD_CAPACITY {
        return Err(CoreError::PathTooLong {
            capacity: PWD_CAPACITY,
        });
    }
    write_bytes(arena, HDR_PWD_TEXT, text)?;
    write_u64(arena, HDR_PWD_LEN, text.len() as u64)
}

/// Append `/name` to the working directory text.
pub(crate) fn pwd_push(arena: &mut [u8], name: &str) -> Result<()> {
    let mut text = pwd_bytes(arena)?.to_vec();
    if text.last() != Some(&b'/') {
        text.push(b'/');
    }
    text.extend_from_slice(name.as_bytes());
    set_pwd(arena, &text)
}

/// Drop the last component of the working directory text.
pub(crate) fn pwd_pop(arena: &mut [u8]) -> Result<()> {
    let parent = match pwd_bytes(arena)?.iter().rposition(|b| *b == b'/') {
        Some(0) | None => b"/".to_vec(),
        Some(idx) => pwd_bytes(arena)?[..idx].to_vec(),
    };
    set_pwd(arena, &parent)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena() -> Vec<u8> {
        vec![0u8; HEADER_SIZE as usize]
    }

    #[test]
    fn test_header_fits_word_grid() {
        assert_eq!(HEADER_SIZE % 8, 0);
        assert_eq!(HDR_FREE_SENTINEL, HDR_FREE_LIST + 16);
        assert_eq!(HDR_ROOT, HDR_FREE_SENTINEL + 24);
    }

    #[test]
    fn test_pwd_push_and_pop() {
        let mut arena = arena();
        set_pwd(&mut arena, b"/").unwrap();
        pwd_push(&mut arena, "a").unwrap();
        assert_eq!(pwd(&arena).unwrap(), "/a");
        pwd_push(&mut arena, "bc").unwrap();
        assert_eq!(pwd(&arena).unwrap(), "/a/bc");
        pwd_pop(&mut arena).unwrap();
        assert_eq!(pwd(&arena).unwrap(), "/a");
        pwd_pop(&mut arena).unwrap();
        assert_eq!(pwd(&arena).unwrap(), "/");
        pwd_pop(&mut arena).unwrap();
        assert_eq!(pwd(&arena).unwrap(), "/");
    }

    #[test]
    fn test_pwd_capacity() {
        let mut arena = arena();
        let long = vec![b'x'; PWD_CAPACITY + 1];
        assert_eq!(
            set_pwd(&mut arena, &long),
            Err(CoreError::PathTooLong {
                capacity: PWD_CAPACITY
            })
        );
        set_pwd(&mut arena, &long[..PWD_CAPACITY]).unwrap();
        assert_eq!(pwd_bytes(&arena).unwrap().len(), PWD_CAPACITY);
    }

    #[test]
    fn test_missing_root_is_corrupt() {
        let arena = arena();
        assert!(matches!(root(&arena), Err(CoreError::CorruptNode { .. })));
    }
}
