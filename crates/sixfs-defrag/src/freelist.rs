//! Free-block list construction for the rewritten image.
//!
//! After relocation the first `blocks_used` data blocks hold every file's
//! blocks and everything from there to the swap region is free. Each free
//! block gets its successor's relative index in its leading word and zeroes
//! everywhere else, the last one gets the sentinel, and the superblock's
//! free-block head is pointed at the first of them.

use sixfs_error::{DefragError, Result};
use sixfs_ondisk::{DiskGeometry, write_free_block_head};
use sixfs_types::{PTR_SIZE, SENTINEL, write_le_i32};
use tracing::debug;

use crate::parse_to_defrag;

/// Link every data block from `blocks_used` up to the swap region into a
/// fresh free list and point the superblock's free-block head at it.
///
/// With zero free blocks no block bytes are written (the next byte belongs
/// to the swap region, which must carry over verbatim); the head is still
/// updated and names the first index past the data region, which is where
/// an empty list begins.
pub fn build_free_list(image: &mut [u8], geom: &DiskGeometry, blocks_used: i32) -> Result<()> {
    // Total data-region capacity in blocks. Geometry construction ordered
    // the offsets, so this cannot underflow.
    let capacity = geom.swap_offset() - geom.data_offset();

    debug!(
        blocks_used,
        free_blocks = capacity - blocks_used,
        "building_free_list"
    );

    for rel in blocks_used..capacity {
        let addr = geom.data_block_addr(rel).map_err(|e| parse_to_defrag(&e))?;
        let block_size = geom.block_size().as_usize();
        let block = addr
            .checked_add(block_size)
            .and_then(|end| image.get_mut(addr..end))
            .ok_or_else(|| DefragError::Corruption {
                block: i64::from(rel),
                detail: "free block runs past the end of the image".to_owned(),
            })?;

        let next = if rel + 1 == capacity { SENTINEL } else { rel + 1 };
        write_le_i32(block, 0, next).map_err(|e| parse_to_defrag(&e))?;
        block[PTR_SIZE..].fill(0);
    }

    write_free_block_head(image, blocks_used).map_err(|e| parse_to_defrag(&e))
}
