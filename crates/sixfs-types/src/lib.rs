#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Size of the boot block at the front of every image.
pub const BOOT_BLOCK_SIZE: usize = 512;
/// Size of the superblock region that follows the boot block.
pub const SUPERBLOCK_SIZE: usize = 512;
/// Byte offset of the superblock fields within an image.
pub const SUPERBLOCK_OFFSET: usize = BOOT_BLOCK_SIZE;
/// Byte address that block-relative region offsets are anchored to.
pub const REGION_BASE: usize = BOOT_BLOCK_SIZE + SUPERBLOCK_SIZE;
/// Size of one packed inode record in bytes.
pub const INODE_SIZE: usize = 100;
/// Number of direct block pointers in an inode.
pub const NDIRECT: usize = 10;
/// Number of single-indirect block pointers in an inode.
pub const NINDIRECT: usize = 4;
/// Width of one on-disk pointer word.
pub const PTR_SIZE: usize = 4;
/// "No block" marker in pointer slots; also terminates the free lists.
pub const SENTINEL: i32 = -1;

/// One on-disk block pointer word: a relative index into the data region,
/// or the sentinel meaning "absent."
///
/// Pointer words are never byte addresses; conversion to a byte address
/// goes through the geometry of the owning image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockPtr(pub i32);

impl BlockPtr {
    pub const ABSENT: Self = Self(SENTINEL);

    /// Wrap a relative data-region index.
    #[must_use]
    pub fn new(index: i32) -> Self {
        Self(index)
    }

    /// True if this slot holds the sentinel.
    #[must_use]
    pub fn is_absent(self) -> bool {
        self.0 == SENTINEL
    }

    /// The relative index, or `None` for the sentinel.
    #[must_use]
    pub fn index(self) -> Option<i32> {
        (self.0 != SENTINEL).then_some(self.0)
    }
}

impl fmt::Display for BlockPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validated block size (the raw superblock field must be positive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockSize(u32);

impl BlockSize {
    /// Create a `BlockSize` from the raw superblock field.
    pub fn new(value: i32) -> Result<Self, ParseError> {
        match u32::try_from(value) {
            Ok(size) if size > 0 => Ok(Self(size)),
            _ => Err(ParseError::InvalidField {
                field: "block_size",
                reason: "must be positive",
            }),
        }
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    /// Block size as a slice length.
    #[must_use]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Number of pointer words one block can hold.
    #[must_use]
    pub fn pointers_per_block(self) -> usize {
        self.as_usize() / PTR_SIZE
    }
}

impl fmt::Display for BlockSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("integer conversion failed: {field}")]
    IntegerConversion { field: &'static str },
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn ensure_slice_mut(
    data: &mut [u8],
    offset: usize,
    len: usize,
) -> Result<&mut [u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&mut data[offset..end])
}

#[inline]
pub fn read_le_i32(data: &[u8], offset: usize) -> Result<i32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn write_le_i32(data: &mut [u8], offset: usize, value: i32) -> Result<(), ParseError> {
    let bytes = ensure_slice_mut(data, offset, 4)?;
    bytes.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

#[inline]
pub fn read_block_ptr(data: &[u8], offset: usize) -> Result<BlockPtr, ParseError> {
    Ok(BlockPtr(read_le_i32(data, offset)?))
}

#[inline]
pub fn write_block_ptr(data: &mut [u8], offset: usize, ptr: BlockPtr) -> Result<(), ParseError> {
    write_le_i32(data, offset, ptr.0)
}

/// Narrow a non-negative `i64` to `usize` with an explicit error path.
///
/// Negative values fail the conversion, so this doubles as the sign check
/// for on-disk fields that must address real bytes. The `field` label is
/// included in the error for diagnostics.
pub fn i64_to_usize(value: i64, field: &'static str) -> Result<usize, ParseError> {
    usize::try_from(value).map_err(|_| ParseError::IntegerConversion { field })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_round_trip() {
        let mut bytes = [0_u8; 12];
        write_le_i32(&mut bytes, 4, -2).expect("write");
        assert_eq!(read_le_i32(&bytes, 4).expect("read"), -2);
        assert_eq!(&bytes[4..8], &[0xFE, 0xFF, 0xFF, 0xFF]);

        write_le_i32(&mut bytes, 8, 0x1234_5678).expect("write");
        assert_eq!(read_le_i32(&bytes, 8).expect("read"), 0x1234_5678);
        assert_eq!(&bytes[8..12], &[0x78, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn test_read_out_of_bounds() {
        let bytes = [0_u8; 6];
        assert_eq!(
            read_le_i32(&bytes, 4),
            Err(ParseError::InsufficientData {
                needed: 4,
                offset: 4,
                actual: 2,
            })
        );
        assert_eq!(
            read_le_i32(&bytes, usize::MAX),
            Err(ParseError::InvalidField {
                field: "offset",
                reason: "overflow",
            })
        );
    }

    #[test]
    fn test_write_out_of_bounds() {
        let mut bytes = [0_u8; 6];
        assert_eq!(
            write_le_i32(&mut bytes, 3, 7),
            Err(ParseError::InsufficientData {
                needed: 4,
                offset: 3,
                actual: 3,
            })
        );
        // Failed writes leave the buffer untouched.
        assert_eq!(bytes, [0_u8; 6]);
    }

    #[test]
    fn test_block_ptr_sentinel() {
        assert!(BlockPtr::ABSENT.is_absent());
        assert_eq!(BlockPtr::ABSENT.index(), None);
        assert_eq!(BlockPtr(0).index(), Some(0));
        assert_eq!(BlockPtr(17).index(), Some(17));
        // Negative non-sentinel values are still "present"; range checks
        // happen at address-computation time.
        assert_eq!(BlockPtr(-2).index(), Some(-2));
    }

    #[test]
    fn test_block_ptr_codec() {
        let mut bytes = [0_u8; 8];
        write_block_ptr(&mut bytes, 0, BlockPtr::ABSENT).expect("write");
        write_block_ptr(&mut bytes, 4, BlockPtr(9)).expect("write");
        assert_eq!(read_block_ptr(&bytes, 0).expect("read"), BlockPtr::ABSENT);
        assert_eq!(read_block_ptr(&bytes, 4).expect("read"), BlockPtr(9));
        assert_eq!(&bytes[0..4], &[0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_block_size_validation() {
        assert!(BlockSize::new(512).is_ok());
        assert!(BlockSize::new(1).is_ok());
        assert_eq!(BlockSize::new(512).unwrap().get(), 512);
        assert_eq!(BlockSize::new(512).unwrap().pointers_per_block(), 128);
        assert_eq!(BlockSize::new(6).unwrap().pointers_per_block(), 1);

        assert!(BlockSize::new(0).is_err());
        assert!(BlockSize::new(-512).is_err());
    }

    #[test]
    fn test_i64_to_usize() {
        assert_eq!(i64_to_usize(0, "test"), Ok(0));
        assert_eq!(i64_to_usize(1024, "test"), Ok(1024));
        assert_eq!(
            i64_to_usize(-1, "test"),
            Err(ParseError::IntegerConversion { field: "test" })
        );
    }

    #[test]
    fn test_layout_constants() {
        assert_eq!(REGION_BASE, 1024);
        assert_eq!(SUPERBLOCK_OFFSET, 512);
        assert_eq!(INODE_SIZE, 100);
        // 25 pointer-width fields pack one inode record exactly.
        assert_eq!((9 + NDIRECT + NINDIRECT + 2) * PTR_SIZE, INODE_SIZE);
    }
}
