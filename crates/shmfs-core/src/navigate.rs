//! Working directory navigation.
//!
//! `cd` walks a path one component at a time from the current directory (or
//! from the root when the path starts with `/`), updating the stored current
//! directory and its text together. A failed walk restores both.

use tracing::debug;

use crate::error::{CoreError, Result};
use crate::header;
use crate::tree;
use crate::types::NodeKind;

/// Change the current directory. On error nothing changes.
pub fn cd(arena: &mut [u8], path: &str) -> Result<()> {
    let saved_dir = header::cur_dir(arena)?;
    let saved_pwd = header::pwd_bytes(arena)?.to_vec();

    match walk(arena, path) {
        Ok(()) => {
            debug!(path, "changed directory");
            Ok(())
        }
        Err(err) => {
            header::set_cur_dir(arena, saved_dir)?;
            header::set_pwd(arena, &saved_pwd)?;
            debug!(path, %err, "cd rolled back");
            Err(err)
        }
    }
}

fn walk(arena: &mut [u8], path: &str) -> Result<()> {
    if path.starts_with('/') {
        let root = header::root(arena)?;
        header::set_cur_dir(arena, root)?;
        header::set_pwd(arena, b"/")?;
    }
    path.split('/').try_for_each(|component| step(arena, component))
}

fn step(arena: &mut [u8], component: &str) -> Result<()> {
    match component {
        "" | "." => Ok(()),
        ".." => {
            let current = header::cur_dir(arena)?;
            match tree::node_parent(arena, current)? {
                Some(parent) => {
                    header::set_cur_dir(arena, parent)?;
                    header::pwd_pop(arena)
                }
                None => Ok(()),
            }
        }
        name => {
            let current = header::cur_dir(arena)?;
            let child = tree::find_child(arena, current, NodeKind::Directory, name)?.ok_or_else(
                || CoreError::PathNotFound {
                    component: name.to_string(),
                },
            )?;
            header::pwd_push(arena, name)?;
            header::set_cur_dir(arena, child)
        }
    }
}
