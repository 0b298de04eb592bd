//! Block-tree relocation.
//!
//! [`Relocator`] walks each in-use inode's pointer trees and repacks every
//! referenced block into the next free slot of the destination data region.
//! Placement order is fixed: shallower pointer classes before deeper ones,
//! and within a tree each block before its children. One recursive
//! placement procedure handles all four tree shapes; only its [`Depth`]
//! parameter changes.

use sixfs_error::{DefragError, Result};
use sixfs_ondisk::{DiskGeometry, Inode};
use sixfs_types::{BlockPtr, PTR_SIZE, read_block_ptr, write_block_ptr};
use tracing::{debug, trace};

use crate::parse_to_defrag;

// ── Depth ──────────────────────────────────────────────────────────────────

/// Pointer classes of an inode, ordered shallow to deep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Depth {
    Direct,
    Single,
    Double,
    Triple,
}

impl Depth {
    /// Deepest pointer class an inode actually uses.
    ///
    /// Priority order: a set triple-indirect pointer wins, then double,
    /// then any of the four single-indirect slots. `Direct` is the
    /// unconditional fallback, so an in-use inode with no blocks at all
    /// still takes the direct pass (which places nothing but re-encodes
    /// the record).
    #[must_use]
    pub fn select(inode: &Inode) -> Self {
        if !inode.triple_indirect.is_absent() {
            Self::Triple
        } else if !inode.double_indirect.is_absent() {
            Self::Double
        } else if inode.indirect.iter().any(|ptr| !ptr.is_absent()) {
            Self::Single
        } else {
            Self::Direct
        }
    }

    /// The next level down, or `None` at the leaves.
    #[must_use]
    pub fn child(self) -> Option<Self> {
        match self {
            Self::Direct => None,
            Self::Single => Some(Self::Direct),
            Self::Double => Some(Self::Single),
            Self::Triple => Some(Self::Double),
        }
    }

    #[must_use]
    fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Single => "single",
            Self::Double => "double",
            Self::Triple => "triple",
        }
    }
}

// ── Relocation cursor ──────────────────────────────────────────────────────

/// The two monotonic counters threaded through one defragmentation run.
///
/// `blocks_used` is both the number of blocks placed so far and the
/// relative index the next placement receives; `next_free_addr` is that
/// placement's destination byte address. They advance together, one block
/// at a time, and never reset between inodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocationCursor {
    next_free_addr: usize,
    blocks_used: i32,
}

impl RelocationCursor {
    fn new(data_region_start: usize) -> Self {
        Self {
            next_free_addr: data_region_start,
            blocks_used: 0,
        }
    }

    /// Relative index the next placed block will receive.
    #[must_use]
    pub fn next_index(&self) -> i32 {
        self.blocks_used
    }

    /// Destination byte address of the next placement.
    #[must_use]
    pub fn next_free_addr(&self) -> usize {
        self.next_free_addr
    }

    /// Blocks placed so far.
    #[must_use]
    pub fn blocks_used(&self) -> i32 {
        self.blocks_used
    }

    fn advance(&mut self, block_size: usize) -> Result<()> {
        self.blocks_used = self.blocks_used.checked_add(1).ok_or_else(|| {
            DefragError::Format("placed block count exceeds the pointer word range".to_owned())
        })?;
        self.next_free_addr = self
            .next_free_addr
            .checked_add(block_size)
            .ok_or_else(|| DefragError::Format("destination address overflow".to_owned()))?;
        Ok(())
    }
}

// ── Relocator ──────────────────────────────────────────────────────────────

/// One defragmentation pass over a single image.
///
/// Owns the full traversal context: the source image (never written), the
/// destination buffer (seeded with a byte copy of the source, so regions
/// the pass never touches carry over verbatim), the validated geometry and
/// the relocation cursor.
#[derive(Debug)]
pub struct Relocator<'a> {
    src: &'a [u8],
    dst: Vec<u8>,
    geom: &'a DiskGeometry,
    cursor: RelocationCursor,
}

impl<'a> Relocator<'a> {
    /// Start a pass over `src`.
    #[must_use]
    pub fn new(src: &'a [u8], geom: &'a DiskGeometry) -> Self {
        Self {
            src,
            dst: src.to_vec(),
            geom,
            cursor: RelocationCursor::new(geom.data_region_start()),
        }
    }

    /// Finish the pass, yielding the rewritten image and the final counters.
    #[must_use]
    pub fn finish(self) -> (Vec<u8>, RelocationCursor) {
        (self.dst, self.cursor)
    }

    /// Relocate every block tree of the inode record at byte `inode_addr`,
    /// then re-encode the record at that same address in the destination.
    ///
    /// Levels run shallow to deep: all direct blocks land first, then each
    /// single-indirect tree in slot order, then the double tree, then the
    /// triple. Pointer fields are rewritten as their trees are placed; the
    /// record itself never moves.
    pub fn relocate_inode(&mut self, inode_addr: usize) -> Result<()> {
        let mut inode = Inode::parse_at(self.src, inode_addr).map_err(|e| parse_to_defrag(&e))?;
        let depth = Depth::select(&inode);

        debug!(
            inode_addr,
            depth = depth.as_str(),
            size = inode.size,
            "relocating_inode"
        );

        for ptr in &mut inode.direct {
            let Some(index) = ptr.index() else {
                continue;
            };
            *ptr = BlockPtr::new(self.place_tree(index, Depth::Direct)?);
        }

        if depth >= Depth::Single {
            for ptr in &mut inode.indirect {
                let Some(index) = ptr.index() else {
                    continue;
                };
                *ptr = BlockPtr::new(self.place_tree(index, Depth::Single)?);
            }
        }

        if depth >= Depth::Double {
            if let Some(index) = inode.double_indirect.index() {
                inode.double_indirect = BlockPtr::new(self.place_tree(index, Depth::Double)?);
            }
        }

        if depth == Depth::Triple {
            if let Some(index) = inode.triple_indirect.index() {
                inode.triple_indirect = BlockPtr::new(self.place_tree(index, Depth::Triple)?);
            }
        }

        inode
            .encode_into(&mut self.dst, inode_addr)
            .map_err(|e| parse_to_defrag(&e))
    }

    /// Place the block tree rooted at source block `src_index`, returning
    /// the root's new relative index.
    ///
    /// The root block is copied from its source address into the next free
    /// destination slot and the cursor advances past it. For depths with
    /// children, each present child link is then placed in slot order and
    /// its new index written into the destination copy of this block.
    /// Child links are always read from the source image, never from
    /// destination bytes the pass may already have rewritten.
    fn place_tree(&mut self, src_index: i32, depth: Depth) -> Result<i32> {
        let src = self.src;
        let block_size = self.geom.block_size().as_usize();

        let src_addr = self
            .geom
            .data_block_addr(src_index)
            .map_err(|_| corrupt_reference(src_index, "not an addressable data block"))?;
        let source = src_addr
            .checked_add(block_size)
            .and_then(|end| src.get(src_addr..end))
            .ok_or_else(|| {
                corrupt_reference(src_index, "source block runs past the end of the image")
            })?;

        let new_index = self.cursor.next_index();
        let dest_addr = self.cursor.next_free_addr();
        let dest = dest_addr
            .checked_add(block_size)
            .and_then(|end| self.dst.get_mut(dest_addr..end))
            .ok_or_else(|| {
                corrupt_reference(new_index, "destination slot runs past the end of the image")
            })?;
        dest.copy_from_slice(source);
        self.cursor.advance(block_size)?;

        trace!(
            src_index,
            new_index,
            depth = depth.as_str(),
            "block_placed"
        );

        let Some(child_depth) = depth.child() else {
            return Ok(new_index);
        };

        for slot in 0..self.geom.pointers_per_block() {
            let word = read_block_ptr(source, slot * PTR_SIZE).map_err(|e| parse_to_defrag(&e))?;
            let Some(child_index) = word.index() else {
                continue;
            };
            let placed = self.place_tree(child_index, child_depth)?;
            write_block_ptr(
                &mut self.dst,
                dest_addr + slot * PTR_SIZE,
                BlockPtr::new(placed),
            )
            .map_err(|e| parse_to_defrag(&e))?;
        }

        Ok(new_index)
    }
}

fn corrupt_reference(block: i32, detail: &str) -> DefragError {
    DefragError::Corruption {
        block: i64::from(block),
        detail: detail.to_owned(),
    }
}
