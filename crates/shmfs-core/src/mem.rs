//! Bounds-checked word and byte access to the arena.

use core::ops::Range;

use crate::error::{CoreError, Result};
use crate::types::Offset;

fn span(arena_len: usize, at: Offset, len: u64) -> Result<Range<usize>> {
    let out_of_bounds = CoreError::OutOfBounds { offset: at, len };
    let start = usize::try_from(at).map_err(|_| out_of_bounds.clone())?;
    let len = usize::try_from(len).map_err(|_| out_of_bounds.clone())?;
    let end = start.checked_add(len).ok_or_else(|| out_of_bounds.clone())?;
    if end > arena_len {
        return Err(out_of_bounds);
    }
    Ok(start..end)
}

pub(crate) fn read_u64(arena: &[u8], at: Offset) -> Result<u64> {
    let range = span(arena.len(), at, 8)?;
    let mut word = [0u8; 8];
    word.copy_from_slice(&arena[range]);
    Ok(u64::from_ne_bytes(word))
}

pub(crate) fn write_u64(arena: &mut [u8], at: Offset, value: u64) -> Result<()> {
    let range = span(arena.len(), at, 8)?;
    arena[range].copy_from_slice(&value.to_ne_bytes());
    Ok(())
}

pub(crate) fn read_bytes(arena: &[u8], at: Offset, len: u64) -> Result<&[u8]> {
    let range = span(arena.len(), at, len)?;
    Ok(&arena[range])
}

pub(crate) fn write_bytes(arena: &mut [u8], at: Offset, bytes: &[u8]) -> Result<()> {
    let range = span(arena.len(), at, bytes.len() as u64)?;
    arena[range].copy_from_slice(bytes);
    Ok(())
}

pub(crate) fn zero(arena: &mut [u8], at: Offset, len: u64) -> Result<()> {
    let range = span(arena.len(), at, len)?;
    arena[range].fill(0);
    Ok(())
}

/// Round up to the next multiple of 8, or `None` on overflow.
pub(crate) fn align8(value: u64) -> Option<u64> {
    value.checked_next_multiple_of(8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_round_trip_and_bounds() {
        let mut arena = vec![0u8; 32];
        write_u64(&mut arena, 24, 0xABCD).unwrap();
        assert_eq!(read_u64(&arena, 24).unwrap(), 0xABCD);
        assert!(matches!(
            read_u64(&arena, 25),
            Err(CoreError::OutOfBounds { offset: 25, len: 8 })
        ));
        assert!(write_u64(&mut arena, u64::MAX, 1).is_err());
    }

    #[test]
    fn test_align8() {
        assert_eq!(align8(0), Some(0));
        assert_eq!(align8(1), Some(8));
        assert_eq!(align8(8), Some(8));
        assert_eq!(align8(13), Some(16));
        assert_eq!(align8(u64::MAX), None);
    }
}
