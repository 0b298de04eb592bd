#![forbid(unsafe_code)]
//! Disk-image defragmentation engine.
//!
//! Rewrites a fragmented image so every file's blocks pack contiguously at
//! the front of the data region: each in-use inode's trees are placed with
//! shallower pointer classes first and every block before its children,
//! then the remaining data blocks are linked into a fresh free list. Inode
//! records keep their slots; only pointer words change. The boot block,
//! the superblock (apart from the free-block head) and the swap region
//! carry over byte for byte.
//!
//! # Flow
//!
//! ```text
//! parse superblock → geometry → scan inodes → relocate trees → free list
//! ```

mod freelist;
mod relocate;

pub use freelist::build_free_list;
pub use relocate::{Depth, RelocationCursor, Relocator};

use sixfs_error::{DefragError, Result};
use sixfs_ondisk::{DiskGeometry, Superblock, scan_in_use_inodes};
use sixfs_types::ParseError;
use tracing::info;

/// Convert a `ParseError` into the appropriate `DefragError` variant.
///
/// This is the crate-boundary conversion described in the `sixfs-error`
/// taxonomy: truncated metadata surfaces as `Parse`, unusable geometry as
/// `Format`. Bounds failures while chasing block references mid-run are
/// raised as `Corruption` at their call sites instead, where the offending
/// relative index is known.
pub(crate) fn parse_to_defrag(e: &ParseError) -> DefragError {
    match e {
        ParseError::InsufficientData { .. } => DefragError::Parse(e.to_string()),
        ParseError::InvalidField { .. } | ParseError::IntegerConversion { .. } => {
            DefragError::Format(e.to_string())
        }
    }
}

/// Defragment a whole in-memory image.
///
/// Returns the rewritten image; the input is never modified. Two runs over
/// the same input produce identical bytes.
pub fn defragment_image(src: &[u8]) -> Result<Vec<u8>> {
    let sb = Superblock::parse_from_image(src).map_err(|e| parse_to_defrag(&e))?;
    let geom = DiskGeometry::from_superblock(&sb).map_err(|e| parse_to_defrag(&e))?;
    let in_use = scan_in_use_inodes(src, &geom).map_err(|e| parse_to_defrag(&e))?;

    info!(
        image_bytes = src.len(),
        block_size = geom.block_size().get(),
        inode_slots = geom.inode_slots(),
        in_use_inodes = in_use.len(),
        "defrag_run_started"
    );

    let mut relocator = Relocator::new(src, &geom);
    for inode_addr in in_use {
        relocator.relocate_inode(inode_addr)?;
    }
    let (mut dst, cursor) = relocator.finish();

    build_free_list(&mut dst, &geom, cursor.blocks_used())?;

    info!(blocks_used = cursor.blocks_used(), "defrag_run_complete");
    Ok(dst)
}
