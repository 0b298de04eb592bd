#![forbid(unsafe_code)]

//! Test support for the defragmenter.
//!
//! [`ImageBuilder`] assembles synthetic disk images in memory, and the walk
//! helpers re-parse engine output so tests can assert on structure (pointer
//! paths, free-chain order) instead of raw byte offsets.

use anyhow::{Context, Result, ensure};
use sixfs_ondisk::{DiskGeometry, Inode, Superblock};
use sixfs_types::{BOOT_BLOCK_SIZE, PTR_SIZE, SENTINEL, read_le_i32, write_le_i32};

// ── Image builder ───────────────────────────────────────────────────────────

/// Assembles a disk image from region sizes and per-block content.
///
/// The image starts zeroed with a valid superblock; callers lay inodes, data
/// blocks, and pointer blocks on top, then call [`ImageBuilder::build`].
pub struct ImageBuilder {
    image: Vec<u8>,
    sb: Superblock,
    geom: DiskGeometry,
}

impl ImageBuilder {
    /// Start a builder whose inode, data, and swap regions span the given
    /// numbers of blocks. Both free-list heads default to the sentinel.
    pub fn new(
        block_size: i32,
        inode_blocks: i32,
        data_blocks: i32,
        swap_blocks: i32,
    ) -> Result<Self> {
        ensure!(
            swap_blocks >= 0,
            "swap region cannot span {swap_blocks} blocks"
        );
        let swap_offset = inode_blocks
            .checked_add(data_blocks)
            .context("swap offset overflows")?;
        let sb = Superblock {
            block_size,
            inode_offset: 0,
            data_offset: inode_blocks,
            swap_offset,
            free_inode_head: SENTINEL,
            free_block_head: SENTINEL,
        };
        let geom = DiskGeometry::from_superblock(&sb)?;
        let swap_len = usize::try_from(swap_blocks)
            .ok()
            .and_then(|blocks| blocks.checked_mul(geom.block_size().as_usize()))
            .context("swap region size overflows")?;
        let image_len = geom
            .swap_region_start()
            .checked_add(swap_len)
            .context("image size overflows")?;
        Ok(Self {
            image: vec![0_u8; image_len],
            sb,
            geom,
        })
    }

    #[must_use]
    pub fn geometry(&self) -> DiskGeometry {
        self.geom
    }

    pub fn set_free_inode_head(&mut self, head: i32) {
        self.sb.free_inode_head = head;
    }

    pub fn set_free_block_head(&mut self, head: i32) {
        self.sb.free_block_head = head;
    }

    /// Encode `inode` into slot `slot` of the inode region.
    pub fn set_inode(&mut self, slot: usize, inode: &Inode) -> Result<()> {
        let addr = self.geom.inode_slot_addr(slot)?;
        inode.encode_into(&mut self.image, addr)?;
        Ok(())
    }

    /// Fill data block `rel` with a repeated marker byte.
    pub fn fill_data_block(&mut self, rel: i32, byte: u8) -> Result<()> {
        self.data_block_mut(rel)?.fill(byte);
        Ok(())
    }

    /// Write `children` into the leading pointer slots of data block `rel`
    /// and pad every remaining slot with the sentinel.
    pub fn write_pointer_block(&mut self, rel: i32, children: &[i32]) -> Result<()> {
        let per_block = self.geom.pointers_per_block();
        ensure!(
            children.len() <= per_block,
            "{} children do not fit in {per_block} pointer slots",
            children.len()
        );
        let block = self.data_block_mut(rel)?;
        for slot in 0..per_block {
            let word = children.get(slot).copied().unwrap_or(SENTINEL);
            write_le_i32(block, slot * PTR_SIZE, word)?;
        }
        Ok(())
    }

    /// Fill the boot block, which the engine carries over untouched.
    pub fn fill_boot(&mut self, byte: u8) {
        self.image[..BOOT_BLOCK_SIZE].fill(byte);
    }

    /// Fill the swap region, which the engine carries over untouched.
    pub fn fill_swap(&mut self, byte: u8) {
        let start = self.geom.swap_region_start();
        self.image[start..].fill(byte);
    }

    /// Encode the superblock and hand the finished image over.
    pub fn build(mut self) -> Result<Vec<u8>> {
        self.sb.encode_into(&mut self.image)?;
        Ok(self.image)
    }

    fn data_block_mut(&mut self, rel: i32) -> Result<&mut [u8]> {
        let addr = self.geom.data_block_addr(rel)?;
        let end = addr
            .checked_add(self.geom.block_size().as_usize())
            .context("data block end overflows")?;
        self.image
            .get_mut(addr..end)
            .with_context(|| format!("data block {rel} lies outside the image"))
    }
}

// ── Image inspection ────────────────────────────────────────────────────────

/// Re-parse an image's superblock into its geometry.
pub fn parse_geometry(image: &[u8]) -> Result<DiskGeometry> {
    let sb = Superblock::parse_from_image(image)?;
    Ok(DiskGeometry::from_superblock(&sb)?)
}

/// Run the defragmenter and re-parse its output.
pub fn defragment_and_parse(src: &[u8]) -> Result<(Vec<u8>, DiskGeometry)> {
    let out = sixfs_defrag::defragment_image(src)?;
    let geom = parse_geometry(&out).context("defragmented image does not re-parse")?;
    Ok((out, geom))
}

/// Borrow data block `rel` of an image.
pub fn data_block<'a>(image: &'a [u8], geom: &DiskGeometry, rel: i32) -> Result<&'a [u8]> {
    let addr = geom.data_block_addr(rel)?;
    let end = addr
        .checked_add(geom.block_size().as_usize())
        .context("data block end overflows")?;
    image
        .get(addr..end)
        .with_context(|| format!("data block {rel} lies outside the image"))
}

/// Read the leading pointer word of data block `rel`.
pub fn leading_word(image: &[u8], geom: &DiskGeometry, rel: i32) -> Result<i32> {
    Ok(read_le_i32(data_block(image, geom, rel)?, 0)?)
}

/// Decode the inode record in slot `slot`.
pub fn inode_at(image: &[u8], geom: &DiskGeometry, slot: usize) -> Result<Inode> {
    let addr = geom.inode_slot_addr(slot)?;
    Ok(Inode::parse_at(image, addr)?)
}

/// Follow the free-block chain from the superblock head to the sentinel,
/// returning the relative indices visited in order.
///
/// Visits at most one full data region, so a chain that revisits blocks
/// reports an error instead of spinning.
pub fn walk_free_list(image: &[u8]) -> Result<Vec<i32>> {
    let sb = Superblock::parse_from_image(image)?;
    let geom = DiskGeometry::from_superblock(&sb)?;
    let capacity = geom.swap_offset() - geom.data_offset();

    let mut chain = Vec::new();
    let mut next = sb.free_block_head;
    while next != SENTINEL {
        ensure!(
            (0..capacity).contains(&next),
            "free chain entry {next} lies outside the data region"
        );
        ensure!(
            chain.len() < usize::try_from(capacity).unwrap_or(usize::MAX),
            "free chain visits more blocks than the data region holds"
        );
        chain.push(next);
        next = leading_word(image, &geom, next)?;
    }
    Ok(chain)
}

// ── Pointer-tree walk ───────────────────────────────────────────────────────

/// One block reached by walking an inode's pointer structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReachableBlock {
    /// Structural position, e.g. `direct[3]` or `indirect[1]/7`.
    pub path: String,
    /// Relative data-region index the block occupies.
    pub index: i32,
    /// True for file data, false for a block of pointer words.
    pub is_leaf: bool,
    /// Full block content.
    pub bytes: Vec<u8>,
}

/// Walk every block reachable from `inode`, depth first, in the order the
/// engine places them: direct slots, then single-, double-, and
/// triple-indirect trees.
pub fn reachable_blocks(
    image: &[u8],
    geom: &DiskGeometry,
    inode: &Inode,
) -> Result<Vec<ReachableBlock>> {
    let mut out = Vec::new();
    for (slot, ptr) in inode.direct.iter().enumerate() {
        if let Some(index) = ptr.index() {
            collect_tree(image, geom, index, 0, format!("direct[{slot}]"), &mut out)?;
        }
    }
    for (slot, ptr) in inode.indirect.iter().enumerate() {
        if let Some(index) = ptr.index() {
            collect_tree(image, geom, index, 1, format!("indirect[{slot}]"), &mut out)?;
        }
    }
    if let Some(index) = inode.double_indirect.index() {
        collect_tree(image, geom, index, 2, "double".to_owned(), &mut out)?;
    }
    if let Some(index) = inode.triple_indirect.index() {
        collect_tree(image, geom, index, 3, "triple".to_owned(), &mut out)?;
    }
    Ok(out)
}

fn collect_tree(
    image: &[u8],
    geom: &DiskGeometry,
    index: i32,
    levels_below: u8,
    path: String,
    out: &mut Vec<ReachableBlock>,
) -> Result<()> {
    let block = data_block(image, geom, index)?;
    out.push(ReachableBlock {
        path: path.clone(),
        index,
        is_leaf: levels_below == 0,
        bytes: block.to_vec(),
    });
    if levels_below == 0 {
        return Ok(());
    }
    for slot in 0..geom.pointers_per_block() {
        let child = read_le_i32(block, slot * PTR_SIZE)?;
        if child == SENTINEL {
            continue;
        }
        collect_tree(
            image,
            geom,
            child,
            levels_below - 1,
            format!("{path}/{slot}"),
            out,
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sixfs_types::BlockPtr;

    fn small_builder() -> ImageBuilder {
        ImageBuilder::new(32, 7, 5, 1).expect("builder")
    }

    #[test]
    fn built_image_parses_back_to_the_same_geometry() {
        let builder = small_builder();
        let geom = builder.geometry();
        let image = builder.build().expect("image");

        let parsed = parse_geometry(&image).expect("geometry");
        assert_eq!(parsed.data_region_start(), geom.data_region_start());
        assert_eq!(parsed.swap_region_start(), geom.swap_region_start());
        assert_eq!(parsed.inode_slots(), geom.inode_slots());
        assert_eq!(image.len(), geom.swap_region_start() + 32);
    }

    #[test]
    fn pointer_blocks_pad_unset_slots_with_the_sentinel() {
        let mut builder = small_builder();
        builder.write_pointer_block(3, &[4, 1]).expect("pointer block");
        let image = builder.build().expect("image");
        let geom = parse_geometry(&image).expect("geometry");

        assert_eq!(leading_word(&image, &geom, 3).expect("slot 0"), 4);
        let block = data_block(&image, &geom, 3).expect("block");
        assert_eq!(read_le_i32(block, PTR_SIZE).expect("slot 1"), 1);
        for slot in 2..geom.pointers_per_block() {
            assert_eq!(
                read_le_i32(block, slot * PTR_SIZE).expect("tail slot"),
                SENTINEL
            );
        }
    }

    #[test]
    fn free_list_walker_follows_the_chain_to_the_sentinel() {
        let mut builder = small_builder();
        builder.set_free_block_head(2);
        builder.write_pointer_block(2, &[4]).expect("block 2");
        builder.write_pointer_block(4, &[SENTINEL]).expect("block 4");
        let image = builder.build().expect("image");

        assert_eq!(walk_free_list(&image).expect("walk"), vec![2, 4]);
    }

    #[test]
    fn free_list_walker_rejects_a_looping_chain() {
        let mut builder = small_builder();
        builder.set_free_block_head(1);
        builder.write_pointer_block(1, &[1]).expect("block 1");
        let image = builder.build().expect("image");

        assert!(walk_free_list(&image).is_err());
    }

    #[test]
    fn reachable_blocks_walks_trees_in_slot_order() {
        let mut builder = small_builder();
        let mut inode = Inode::empty();
        inode.nlink = 1;
        inode.direct[1] = BlockPtr::new(4);
        inode.indirect[0] = BlockPtr::new(2);
        builder.set_inode(0, &inode).expect("inode");
        builder.fill_data_block(4, 0xAA).expect("block 4");
        builder.write_pointer_block(2, &[3]).expect("block 2");
        builder.fill_data_block(3, 0xBB).expect("block 3");
        let image = builder.build().expect("image");
        let geom = parse_geometry(&image).expect("geometry");

        let reached = reachable_blocks(&image, &geom, &inode).expect("walk");
        let paths: Vec<&str> = reached.iter().map(|block| block.path.as_str()).collect();
        assert_eq!(paths, vec!["direct[1]", "indirect[0]", "indirect[0]/0"]);
        let indices: Vec<i32> = reached.iter().map(|block| block.index).collect();
        assert_eq!(indices, vec![4, 2, 3]);
        assert!(reached[0].is_leaf);
        assert!(!reached[1].is_leaf);
        assert!(reached[0].bytes.iter().all(|&byte| byte == 0xAA));
        assert!(reached[2].bytes.iter().all(|&byte| byte == 0xBB));
    }
}
