#![forbid(unsafe_code)]
//! On-disk format parsing for vintage Unix-style file-system images.
//!
//! Pure parsing crate — no I/O, no side effects. Decodes byte slices into
//! typed superblocks and inode records, derives the validated geometry that
//! anchors all address arithmetic, and re-encodes records back at their
//! fixed offsets.

use serde::{Deserialize, Serialize};
use sixfs_types::{
    BlockPtr, BlockSize, INODE_SIZE, NDIRECT, NINDIRECT, PTR_SIZE, ParseError, REGION_BASE,
    SUPERBLOCK_OFFSET, SUPERBLOCK_SIZE, ensure_slice, ensure_slice_mut, i64_to_usize,
    read_block_ptr, read_le_i32, write_block_ptr, write_le_i32,
};

// ── Superblock ─────────────────────────────────────────────────────────────

/// The six-word superblock describing an image's region map.
///
/// All fields are raw little-endian `i32` words as stored on disk. The
/// three `*_offset` fields are block-relative region offsets anchored at
/// `REGION_BASE`; the two head fields are sentinel-terminated free-list
/// heads (relative indices).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Superblock {
    pub block_size: i32,
    pub inode_offset: i32,
    pub data_offset: i32,
    pub swap_offset: i32,
    pub free_inode_head: i32,
    pub free_block_head: i32,
}

impl Superblock {
    /// Parse a superblock from its 512-byte on-disk region.
    pub fn parse_superblock_region(region: &[u8]) -> Result<Self, ParseError> {
        if region.len() < SUPERBLOCK_SIZE {
            return Err(ParseError::InsufficientData {
                needed: SUPERBLOCK_SIZE,
                offset: 0,
                actual: region.len(),
            });
        }

        Ok(Self {
            block_size: read_le_i32(region, 0x00)?,
            inode_offset: read_le_i32(region, 0x04)?,
            data_offset: read_le_i32(region, 0x08)?,
            swap_offset: read_le_i32(region, 0x0C)?,
            free_inode_head: read_le_i32(region, 0x10)?,
            free_block_head: read_le_i32(region, 0x14)?,
        })
    }

    /// Parse a superblock from a full disk image.
    pub fn parse_from_image(image: &[u8]) -> Result<Self, ParseError> {
        let end = SUPERBLOCK_OFFSET
            .checked_add(SUPERBLOCK_SIZE)
            .ok_or(ParseError::InvalidField {
                field: "superblock_offset",
                reason: "overflow",
            })?;

        if image.len() < end {
            return Err(ParseError::InsufficientData {
                needed: SUPERBLOCK_SIZE,
                offset: SUPERBLOCK_OFFSET,
                actual: image.len().saturating_sub(SUPERBLOCK_OFFSET),
            });
        }

        Self::parse_superblock_region(&image[SUPERBLOCK_OFFSET..end])
    }

    /// Encode all six words at the superblock's fixed image offset.
    ///
    /// Bytes past the six words, up to `SUPERBLOCK_SIZE`, keep whatever
    /// the buffer already holds.
    pub fn encode_into(&self, image: &mut [u8]) -> Result<(), ParseError> {
        write_le_i32(image, SUPERBLOCK_OFFSET, self.block_size)?;
        write_le_i32(image, SUPERBLOCK_OFFSET + 0x04, self.inode_offset)?;
        write_le_i32(image, SUPERBLOCK_OFFSET + 0x08, self.data_offset)?;
        write_le_i32(image, SUPERBLOCK_OFFSET + 0x0C, self.swap_offset)?;
        write_le_i32(image, SUPERBLOCK_OFFSET + 0x10, self.free_inode_head)?;
        write_le_i32(image, SUPERBLOCK_OFFSET + 0x14, self.free_block_head)?;
        Ok(())
    }
}

/// Overwrite only the free-block head word of an image's superblock.
///
/// Every other superblock byte keeps its original value.
pub fn write_free_block_head(image: &mut [u8], head: i32) -> Result<(), ParseError> {
    write_le_i32(image, SUPERBLOCK_OFFSET + 0x14, head)
}

// ── Inode records ──────────────────────────────────────────────────────────

/// One packed 100-byte inode record: twenty-five little-endian `i32` words.
///
/// | Offset | Field |
/// |--------|-------|
/// | `0x00` | `next_inode` (free-inode list link) |
/// | `0x04` | `protect` |
/// | `0x08` | `nlink` (record is in use iff positive) |
/// | `0x0C` | `size` |
/// | `0x10` | `uid` |
/// | `0x14` | `gid` |
/// | `0x18` | `ctime` |
/// | `0x1C` | `mtime` |
/// | `0x20` | `atime` |
/// | `0x24` | ten direct pointers |
/// | `0x4C` | four single-indirect pointers |
/// | `0x5C` | double-indirect pointer |
/// | `0x60` | triple-indirect pointer |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inode {
    pub next_inode: i32,
    pub protect: i32,
    pub nlink: i32,
    pub size: i32,
    pub uid: i32,
    pub gid: i32,
    pub ctime: i32,
    pub mtime: i32,
    pub atime: i32,
    pub direct: [BlockPtr; NDIRECT],
    pub indirect: [BlockPtr; NINDIRECT],
    pub double_indirect: BlockPtr,
    pub triple_indirect: BlockPtr,
}

impl Inode {
    /// Decode one record from its 100-byte on-disk form.
    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < INODE_SIZE {
            return Err(ParseError::InsufficientData {
                needed: INODE_SIZE,
                offset: 0,
                actual: bytes.len(),
            });
        }

        let mut direct = [BlockPtr::ABSENT; NDIRECT];
        for (slot, ptr) in direct.iter_mut().enumerate() {
            *ptr = read_block_ptr(bytes, 0x24 + slot * PTR_SIZE)?;
        }
        let mut indirect = [BlockPtr::ABSENT; NINDIRECT];
        for (slot, ptr) in indirect.iter_mut().enumerate() {
            *ptr = read_block_ptr(bytes, 0x4C + slot * PTR_SIZE)?;
        }

        Ok(Self {
            next_inode: read_le_i32(bytes, 0x00)?,
            protect: read_le_i32(bytes, 0x04)?,
            nlink: read_le_i32(bytes, 0x08)?,
            size: read_le_i32(bytes, 0x0C)?,
            uid: read_le_i32(bytes, 0x10)?,
            gid: read_le_i32(bytes, 0x14)?,
            ctime: read_le_i32(bytes, 0x18)?,
            mtime: read_le_i32(bytes, 0x1C)?,
            atime: read_le_i32(bytes, 0x20)?,
            direct,
            indirect,
            double_indirect: read_block_ptr(bytes, 0x5C)?,
            triple_indirect: read_block_ptr(bytes, 0x60)?,
        })
    }

    /// Decode the record at byte `offset` of a full image.
    pub fn parse_at(image: &[u8], offset: usize) -> Result<Self, ParseError> {
        Self::parse_from_bytes(ensure_slice(image, offset, INODE_SIZE)?)
    }

    /// Re-encode this record at byte `offset` of an image buffer.
    pub fn encode_into(&self, image: &mut [u8], offset: usize) -> Result<(), ParseError> {
        // The whole span is range-checked up front; a failed encode never
        // leaves a partial record behind.
        ensure_slice_mut(image, offset, INODE_SIZE)?;

        write_le_i32(image, offset, self.next_inode)?;
        write_le_i32(image, offset + 0x04, self.protect)?;
        write_le_i32(image, offset + 0x08, self.nlink)?;
        write_le_i32(image, offset + 0x0C, self.size)?;
        write_le_i32(image, offset + 0x10, self.uid)?;
        write_le_i32(image, offset + 0x14, self.gid)?;
        write_le_i32(image, offset + 0x18, self.ctime)?;
        write_le_i32(image, offset + 0x1C, self.mtime)?;
        write_le_i32(image, offset + 0x20, self.atime)?;
        for (slot, ptr) in self.direct.iter().enumerate() {
            write_block_ptr(image, offset + 0x24 + slot * PTR_SIZE, *ptr)?;
        }
        for (slot, ptr) in self.indirect.iter().enumerate() {
            write_block_ptr(image, offset + 0x4C + slot * PTR_SIZE, *ptr)?;
        }
        write_block_ptr(image, offset + 0x5C, self.double_indirect)?;
        write_block_ptr(image, offset + 0x60, self.triple_indirect)?;
        Ok(())
    }

    /// A record participates in the file system iff its link count is positive.
    #[must_use]
    pub fn is_in_use(&self) -> bool {
        self.nlink > 0
    }

    /// An all-zero record with every pointer slot absent.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            next_inode: 0,
            protect: 0,
            nlink: 0,
            size: 0,
            uid: 0,
            gid: 0,
            ctime: 0,
            mtime: 0,
            atime: 0,
            direct: [BlockPtr::ABSENT; NDIRECT],
            indirect: [BlockPtr::ABSENT; NINDIRECT],
            double_indirect: BlockPtr::ABSENT,
            triple_indirect: BlockPtr::ABSENT,
        }
    }
}

// ── Geometry ───────────────────────────────────────────────────────────────

/// Validated address arithmetic for one image.
///
/// Construction checks the superblock's block size, the sign and ordering
/// of the region offsets, and that every region start fits in `usize`.
/// All later address math goes through these methods, so pointer chasing
/// cannot silently wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskGeometry {
    block_size: BlockSize,
    data_offset: i32,
    swap_offset: i32,
    inode_region_start: usize,
    data_region_start: usize,
    swap_region_start: usize,
    inode_slots: usize,
}

impl DiskGeometry {
    /// Derive the geometry from a parsed superblock.
    pub fn from_superblock(sb: &Superblock) -> Result<Self, ParseError> {
        let block_size = BlockSize::new(sb.block_size)?;

        let inode_off = i64_to_usize(i64::from(sb.inode_offset), "inode_offset")?;
        let data_off = i64_to_usize(i64::from(sb.data_offset), "data_offset")?;
        let swap_off = i64_to_usize(i64::from(sb.swap_offset), "swap_offset")?;

        if data_off < inode_off {
            return Err(ParseError::InvalidField {
                field: "data_offset",
                reason: "precedes inode region",
            });
        }
        if swap_off < data_off {
            return Err(ParseError::InvalidField {
                field: "swap_offset",
                reason: "precedes data region",
            });
        }

        let region_start = |off: usize, field: &'static str| -> Result<usize, ParseError> {
            off.checked_mul(block_size.as_usize())
                .and_then(|bytes| bytes.checked_add(REGION_BASE))
                .ok_or(ParseError::IntegerConversion { field })
        };
        let inode_region_start = region_start(inode_off, "inode_offset")?;
        let data_region_start = region_start(data_off, "data_offset")?;
        let swap_region_start = region_start(swap_off, "swap_offset")?;

        // Region ordering was checked above, so this cannot underflow.
        let inode_slots = (data_region_start - inode_region_start) / INODE_SIZE;

        Ok(Self {
            block_size,
            data_offset: sb.data_offset,
            swap_offset: sb.swap_offset,
            inode_region_start,
            data_region_start,
            swap_region_start,
            inode_slots,
        })
    }

    /// Byte address of data-region block `index`.
    ///
    /// `index` is a relative pointer word taken from an inode or an
    /// indirect block. The sentinel and other negative values are rejected
    /// here; whether the address lands inside the buffer is the caller's
    /// slice check.
    pub fn data_block_addr(&self, index: i32) -> Result<usize, ParseError> {
        let index = i64_to_usize(i64::from(index), "block_index")?;
        index
            .checked_mul(self.block_size.as_usize())
            .and_then(|bytes| self.data_region_start.checked_add(bytes))
            .ok_or(ParseError::IntegerConversion { field: "block_index" })
    }

    /// Byte address of inode slot `slot`.
    pub fn inode_slot_addr(&self, slot: usize) -> Result<usize, ParseError> {
        if slot >= self.inode_slots {
            return Err(ParseError::InvalidField {
                field: "inode_slot",
                reason: "past end of inode region",
            });
        }
        slot.checked_mul(INODE_SIZE)
            .and_then(|bytes| self.inode_region_start.checked_add(bytes))
            .ok_or(ParseError::IntegerConversion { field: "inode_slot" })
    }

    #[must_use]
    pub fn block_size(&self) -> BlockSize {
        self.block_size
    }

    /// Pointer words one block can hold.
    #[must_use]
    pub fn pointers_per_block(&self) -> usize {
        self.block_size.pointers_per_block()
    }

    /// Total inode slots the inode region can hold.
    #[must_use]
    pub fn inode_slots(&self) -> usize {
        self.inode_slots
    }

    /// Raw block-relative offset of the data region.
    #[must_use]
    pub fn data_offset(&self) -> i32 {
        self.data_offset
    }

    /// Raw block-relative offset of the swap region.
    #[must_use]
    pub fn swap_offset(&self) -> i32 {
        self.swap_offset
    }

    /// First byte of the data region.
    #[must_use]
    pub fn data_region_start(&self) -> usize {
        self.data_region_start
    }

    /// First byte of the swap region.
    #[must_use]
    pub fn swap_region_start(&self) -> usize {
        self.swap_region_start
    }
}

// ── Inode scan ─────────────────────────────────────────────────────────────

/// Byte addresses of all in-use inode records, in slot order.
///
/// Probes only the `nlink` word of each slot; callers decode full records
/// on demand. Errors if the inode region runs past the end of the image.
pub fn scan_in_use_inodes(image: &[u8], geom: &DiskGeometry) -> Result<Vec<usize>, ParseError> {
    let mut in_use = Vec::new();
    for slot in 0..geom.inode_slots() {
        let addr = geom.inode_slot_addr(slot)?;
        let record = ensure_slice(image, addr, INODE_SIZE)?;
        if read_le_i32(record, 0x08)? > 0 {
            in_use.push(addr);
        }
    }
    Ok(in_use)
}
