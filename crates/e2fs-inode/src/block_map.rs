use e2fs_block::BlockReader;
use e2fs_error::{Ext2Error, Result};
use e2fs_ondisk::{Inode, Superblock};
use e2fs_types::{
    BlockNumber, EXT2_DIND_BLOCK, EXT2_IND_BLOCK, EXT2_N_BLOCKS, EXT2_NDIR_BLOCKS, EXT2_TIND_BLOCK,
    read_le_u32,
};
use serde::{Deserialize, Serialize};
use tracing::trace;

const NDIR: u64 = EXT2_NDIR_BLOCKS as u64;

/// Result of mapping one logical block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockMapping {
    Mapped(BlockNumber),
    /// Sparse region; reads as zeros.
    Hole,
}

impl BlockMapping {
    #[must_use]
    pub fn block(self) -> Option<BlockNumber> {
        match self {
            Self::Mapped(b) => Some(b),
            Self::Hole => None,
        }
    }
}

/// Logical blocks addressable with `addrs_per_block` pointers per index block.
#[must_use]
pub fn max_logical_blocks(addrs_per_block: u32) -> u64 {
    let a = u64::from(addrs_per_block);
    let a2 = a.saturating_mul(a);
    let a3 = a2.saturating_mul(a);
    NDIR.saturating_add(a).saturating_add(a2).saturating_add(a3)
}

/// A logical block index split into a root slot and index-block digits.
///
/// `depth` is the number of index blocks between the inode and the data
/// block: 0 for direct slots, up to 3 for the triple-indirect tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPath {
    root: usize,
    depth: usize,
    digits: [u32; 3],
}

impl BlockPath {
    pub fn new(logical: u64, addrs_per_block: u32) -> Result<Self> {
        let a = u64::from(addrs_per_block);
        let out_of_range = || Ext2Error::BlockIndexOutOfRange {
            index: logical,
            capacity: max_logical_blocks(addrs_per_block),
        };
        if a == 0 {
            return Err(out_of_range());
        }
        let digit = |v: u64| u32::try_from(v % a).map_err(|_| out_of_range());

        if logical < NDIR {
            let root = usize::try_from(logical).map_err(|_| out_of_range())?;
            return Ok(Self {
                root,
                depth: 0,
                digits: [0; 3],
            });
        }

        let mut rel = logical - NDIR;
        let mut span = a;
        for (depth, root) in [(1, EXT2_IND_BLOCK), (2, EXT2_DIND_BLOCK), (3, EXT2_TIND_BLOCK)] {
            if rel < span {
                let mut digits = [0_u32; 3];
                let mut rest = rel;
                for slot in (0..depth).rev() {
                    digits[slot] = digit(rest)?;
                    rest /= a;
                }
                return Ok(Self {
                    root,
                    depth,
                    digits,
                });
            }
            rel -= span;
            span = span.checked_mul(a).ok_or_else(out_of_range)?;
        }
        Err(out_of_range())
    }

    /// Slot of the inode's pointer array the walk starts from.
    #[must_use]
    pub fn root_slot(&self) -> usize {
        self.root
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Entry index to take in each index block, outermost first.
    #[must_use]
    pub fn digits(&self) -> &[u32] {
        &self.digits[..self.depth]
    }
}

/// Logical-to-physical mapping for one inode's pointer tree.
///
/// No caching: each [`resolve`](Self::resolve) re-reads the index blocks on
/// its path.
#[derive(Debug)]
pub struct BlockMap<'a, R: BlockReader + ?Sized> {
    reader: &'a R,
    ptrs: [u32; EXT2_N_BLOCKS],
    addrs_per_block: u32,
    block_size: u32,
    blocks_count: u64,
    size: u64,
}

impl<'a, R: BlockReader + ?Sized> BlockMap<'a, R> {
    /// Extent-mapped inodes are rejected; their pointer array is an extent tree.
    /// A size the pointer tree cannot address is `CorruptInode`.
    pub fn new(reader: &'a R, sb: &Superblock, inode: &Inode) -> Result<Self> {
        if inode.uses_extents() {
            return Err(Ext2Error::UnsupportedFeature(
                "extent-mapped inode".to_owned(),
            ));
        }
        let max_bytes = max_logical_blocks(sb.addresses_per_block())
            .saturating_mul(u64::from(sb.block_size()));
        if inode.size() > max_bytes {
            return Err(Ext2Error::CorruptInode(format!(
                "size {} exceeds the {max_bytes} bytes the block pointers can address",
                inode.size()
            )));
        }
        Ok(Self {
            reader,
            ptrs: *inode.block_ptrs(),
            addrs_per_block: sb.addresses_per_block(),
            block_size: sb.block_size(),
            blocks_count: sb.blocks_count(),
            size: inode.size(),
        })
    }

    /// Largest logical block index plus one.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        max_logical_blocks(self.addrs_per_block)
    }

    /// Logical blocks covered by the inode's size.
    #[must_use]
    pub fn logical_block_count(&self) -> u64 {
        self.size.div_ceil(u64::from(self.block_size))
    }

    fn check_pointer(&self, ptr: u32, detail: &str) -> Result<BlockNumber> {
        if u64::from(ptr) >= self.blocks_count {
            return Err(Ext2Error::Corruption {
                block: u64::from(ptr),
                detail: format!("{detail} beyond volume end ({} blocks)", self.blocks_count),
            });
        }
        Ok(BlockNumber(u64::from(ptr)))
    }

    /// Map `logical` to a physical block or a hole.
    pub fn resolve(&self, logical: u64) -> Result<BlockMapping> {
        let path = BlockPath::new(logical, self.addrs_per_block)?;
        let mut ptr = self.ptrs[path.root_slot()];
        trace!(
            logical,
            depth = path.depth(),
            root_slot = path.root_slot(),
            ptr,
            "resolve"
        );

        for &digit in path.digits() {
            if ptr == 0 {
                return Ok(BlockMapping::Hole);
            }
            let index_block = self.check_pointer(ptr, "index block pointer")?;
            let buf = self.reader.read_block(index_block)?;
            let at = usize::try_from(digit).unwrap_or(usize::MAX).saturating_mul(4);
            ptr = read_le_u32(buf.as_slice(), at).map_err(|err| Ext2Error::Corruption {
                block: index_block.0,
                detail: format!("short index block: {err}"),
            })?;
            trace!(index_block = index_block.0, digit, next = ptr, "index step");
        }

        if ptr == 0 {
            return Ok(BlockMapping::Hole);
        }
        Ok(BlockMapping::Mapped(self.check_pointer(ptr, "data block pointer")?))
    }

    /// Map every logical block covered by the inode's size, in order.
    ///
    /// Lazy: each item resolves one block when pulled.
    pub fn data_blocks(&self) -> impl Iterator<Item = Result<BlockMapping>> + '_ {
        (0..self.logical_block_count()).map(|logical| self.resolve(logical))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use e2fs_block::BlockBuf;
    use e2fs_types::{EXT2_SUPER_MAGIC, S_IFREG};
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use std::collections::HashMap;

    /// Serves index blocks from a map and records every read.
    #[derive(Debug)]
    struct CountingReader {
        block_size: u32,
        blocks: HashMap<u64, Vec<u8>>,
        fill: Option<u32>,
        reads: Mutex<Vec<BlockNumber>>,
    }

    impl CountingReader {
        fn new(block_size: u32) -> Self {
            Self {
                block_size,
                blocks: HashMap::new(),
                fill: None,
                reads: Mutex::new(Vec::new()),
            }
        }

        /// Every unknown block reads as index entries `fill, fill, ...`.
        fn filled(block_size: u32, fill: u32) -> Self {
            Self {
                fill: Some(fill),
                ..Self::new(block_size)
            }
        }

        fn set_entry(&mut self, block: u64, index: usize, value: u32) {
            let size = self.block_size as usize;
            let data = self.blocks.entry(block).or_insert_with(|| vec![0; size]);
            data[index * 4..index * 4 + 4].copy_from_slice(&value.to_le_bytes());
        }

        fn reads(&self) -> Vec<BlockNumber> {
            self.reads.lock().clone()
        }
    }

    impl BlockReader for CountingReader {
        fn block_size(&self) -> u32 {
            self.block_size
        }

        fn block_count(&self) -> u64 {
            u64::from(u32::MAX)
        }

        fn read_block(&self, block: BlockNumber) -> Result<BlockBuf> {
            self.reads.lock().push(block);
            if let Some(data) = self.blocks.get(&block.0) {
                return Ok(BlockBuf::new(data.clone()));
            }
            let fill = self.fill.unwrap_or(0).to_le_bytes();
            let data = fill.iter().copied().cycle().take(self.block_size as usize).collect();
            Ok(BlockBuf::new(data))
        }
    }

    fn superblock(log_block_size: u32, blocks_count: u32) -> Superblock {
        let mut sb = vec![0_u8; 1024];
        sb[0x00..0x04].copy_from_slice(&64_u32.to_le_bytes());
        sb[0x04..0x08].copy_from_slice(&blocks_count.to_le_bytes());
        sb[0x18..0x1C].copy_from_slice(&log_block_size.to_le_bytes());
        sb[0x1C..0x20].copy_from_slice(&log_block_size.to_le_bytes());
        sb[0x20..0x24].copy_from_slice(&8192_u32.to_le_bytes());
        sb[0x24..0x28].copy_from_slice(&8192_u32.to_le_bytes());
        sb[0x28..0x2C].copy_from_slice(&64_u32.to_le_bytes());
        sb[0x38..0x3A].copy_from_slice(&EXT2_SUPER_MAGIC.to_le_bytes());
        Superblock::decode(&sb).expect("superblock")
    }

    fn inode(ptrs: [u32; EXT2_N_BLOCKS], size: u32) -> Inode {
        let mut raw = vec![0_u8; 128];
        raw[0x00..0x02].copy_from_slice(&(S_IFREG | 0o644).to_le_bytes());
        raw[0x04..0x08].copy_from_slice(&size.to_le_bytes());
        for (i, p) in ptrs.iter().enumerate() {
            raw[0x28 + i * 4..0x2C + i * 4].copy_from_slice(&p.to_le_bytes());
        }
        Inode::decode(&raw).expect("inode")
    }

    fn direct_ptrs() -> [u32; EXT2_N_BLOCKS] {
        let mut ptrs = [0_u32; EXT2_N_BLOCKS];
        for (i, p) in ptrs.iter_mut().take(EXT2_NDIR_BLOCKS).enumerate() {
            *p = 100 + i as u32;
        }
        ptrs
    }

    #[test]
    fn path_decomposition_per_tier() {
        let a = 256;
        let p = BlockPath::new(11, a).unwrap();
        assert_eq!((p.root_slot(), p.depth(), p.digits()), (11, 0, &[][..]));

        let p = BlockPath::new(12, a).unwrap();
        assert_eq!((p.root_slot(), p.depth(), p.digits()), (12, 1, &[0][..]));

        let p = BlockPath::new(12 + 255, a).unwrap();
        assert_eq!(p.digits(), &[255]);

        let p = BlockPath::new(12 + 256 + 256 * 3 + 7, a).unwrap();
        assert_eq!((p.root_slot(), p.depth(), p.digits()), (13, 2, &[3, 7][..]));

        let p = BlockPath::new(12 + 256 + 65536 + 65536 * 2 + 256 * 5 + 9, a).unwrap();
        assert_eq!((p.root_slot(), p.depth(), p.digits()), (14, 3, &[2, 5, 9][..]));
    }

    #[test]
    fn index_past_triple_tier_is_out_of_range() {
        let cap = max_logical_blocks(256);
        assert_eq!(cap, 12 + 256 + 65536 + 16_777_216);
        assert!(BlockPath::new(cap - 1, 256).is_ok());
        let err = BlockPath::new(cap, 256).unwrap_err();
        assert!(matches!(
            err,
            Ext2Error::BlockIndexOutOfRange { index, capacity } if index == cap && capacity == cap
        ));
    }

    #[test]
    fn direct_blocks_need_no_reads() {
        let sb = superblock(0, 8192);
        let reader = CountingReader::new(1024);
        let ino = inode(direct_ptrs(), 12 * 1024);
        let map = BlockMap::new(&reader, &sb, &ino).unwrap();
        assert_eq!(map.resolve(0).unwrap(), BlockMapping::Mapped(BlockNumber(100)));
        assert_eq!(map.resolve(11).unwrap(), BlockMapping::Mapped(BlockNumber(111)));
        assert!(reader.reads().is_empty());
    }

    #[test]
    fn single_indirect_reads_one_index_block() {
        // 4 KiB blocks -> 1024 addresses per block.
        let sb = superblock(2, 100_000);
        assert_eq!(sb.addresses_per_block(), 1024);
        let mut reader = CountingReader::new(4096);
        reader.set_entry(500, 1, 7777);
        let mut ptrs = direct_ptrs();
        ptrs[EXT2_IND_BLOCK] = 500;
        let ino = inode(ptrs, 64 * 4096);
        let map = BlockMap::new(&reader, &sb, &ino).unwrap();

        assert_eq!(map.resolve(13).unwrap(), BlockMapping::Mapped(BlockNumber(7777)));
        assert_eq!(reader.reads(), vec![BlockNumber(500)]);
    }

    #[test]
    fn double_and_triple_read_per_level() {
        let sb = superblock(0, 50_000);
        let mut reader = CountingReader::new(1024);
        let mut ptrs = direct_ptrs();
        ptrs[EXT2_DIND_BLOCK] = 600;
        ptrs[EXT2_TIND_BLOCK] = 900;
        reader.set_entry(600, 1, 700);
        reader.set_entry(700, 3, 8000);
        reader.set_entry(900, 0, 901);
        reader.set_entry(901, 2, 902);
        reader.set_entry(902, 4, 9000);
        let ino = inode(ptrs, 0);
        let map = BlockMap::new(&reader, &sb, &ino).unwrap();

        let dind = 12 + 256 + 256 + 3;
        assert_eq!(map.resolve(dind).unwrap(), BlockMapping::Mapped(BlockNumber(8000)));
        assert_eq!(reader.reads(), vec![BlockNumber(600), BlockNumber(700)]);

        reader.reads.lock().clear();
        let tind = 12 + 256 + 65536 + 2 * 256 + 4;
        assert_eq!(map.resolve(tind).unwrap(), BlockMapping::Mapped(BlockNumber(9000)));
        assert_eq!(
            reader.reads(),
            vec![BlockNumber(900), BlockNumber(901), BlockNumber(902)]
        );
    }

    #[test]
    fn zero_pointer_short_circuits_to_hole() {
        let sb = superblock(0, 8192);
        let mut reader = CountingReader::new(1024);
        let mut ptrs = direct_ptrs();
        ptrs[3] = 0;
        ptrs[EXT2_IND_BLOCK] = 500;
        // entry 0 of block 500 stays zero
        reader.set_entry(500, 1, 4000);
        let ino = inode(ptrs, 0);
        let map = BlockMap::new(&reader, &sb, &ino).unwrap();

        assert_eq!(map.resolve(3).unwrap(), BlockMapping::Hole);
        assert!(reader.reads().is_empty());

        // Root pointer zero: no reads.
        assert_eq!(map.resolve(12 + 256 + 5).unwrap(), BlockMapping::Hole);
        assert!(reader.reads().is_empty());

        // Zero entry inside the index block: one read.
        assert_eq!(map.resolve(12).unwrap(), BlockMapping::Hole);
        assert_eq!(reader.reads(), vec![BlockNumber(500)]);
    }

    #[test]
    fn pointer_beyond_volume_is_corruption() {
        let sb = superblock(0, 1000);
        let mut reader = CountingReader::new(1024);
        let mut ptrs = direct_ptrs();
        ptrs[0] = 5000;
        ptrs[EXT2_IND_BLOCK] = 1000;
        reader.set_entry(1000, 0, 1);
        let ino = inode(ptrs, 0);
        let map = BlockMap::new(&reader, &sb, &ino).unwrap();

        let err = map.resolve(0).unwrap_err();
        assert!(matches!(err, Ext2Error::Corruption { block: 5000, .. }));
        let err = map.resolve(12).unwrap_err();
        assert!(matches!(err, Ext2Error::Corruption { block: 1000, .. }));
        assert!(reader.reads().is_empty());
    }

    #[test]
    fn short_index_block_is_corruption() {
        let sb = superblock(0, 8192);
        let mut reader = CountingReader::new(1024);
        reader.blocks.insert(500, vec![0xFF; 16]);
        let mut ptrs = direct_ptrs();
        ptrs[EXT2_IND_BLOCK] = 500;
        let ino = inode(ptrs, 0);
        let map = BlockMap::new(&reader, &sb, &ino).unwrap();

        // Entry 0 is readable but points past the volume.
        assert!(matches!(map.resolve(12), Err(Ext2Error::Corruption { block: 0xFFFF_FFFF, .. })));
        let err = map.resolve(12 + 100).unwrap_err();
        assert!(matches!(err, Ext2Error::Corruption { block: 500, .. }));
    }

    #[test]
    fn extent_inodes_are_rejected() {
        let sb = superblock(0, 8192);
        let reader = CountingReader::new(1024);
        let mut ino = inode(direct_ptrs(), 0);
        ino.flags |= e2fs_types::EXT2_EXTENTS_FL;
        let err = BlockMap::new(&reader, &sb, &ino).unwrap_err();
        assert!(matches!(err, Ext2Error::UnsupportedFeature(_)));
    }

    #[test]
    fn data_blocks_cover_file_size() {
        let sb = superblock(0, 8192);
        let mut reader = CountingReader::new(1024);
        let mut ptrs = direct_ptrs();
        ptrs[5] = 0;
        ptrs[EXT2_IND_BLOCK] = 500;
        reader.set_entry(500, 0, 600);
        reader.set_entry(500, 1, 601);
        let ino = inode(ptrs, 13 * 1024 + 1);
        let map = BlockMap::new(&reader, &sb, &ino).unwrap();

        assert_eq!(map.logical_block_count(), 14);
        let blocks: Vec<_> = map.data_blocks().collect::<Result<_>>().unwrap();
        assert_eq!(blocks.len(), 14);
        assert_eq!(blocks[0], BlockMapping::Mapped(BlockNumber(100)));
        assert_eq!(blocks[5], BlockMapping::Hole);
        assert_eq!(blocks[12], BlockMapping::Mapped(BlockNumber(600)));
        assert_eq!(blocks[13].block(), Some(BlockNumber(601)));
    }

    #[test]
    fn data_blocks_stop_at_first_error() {
        let sb = superblock(0, 1000);
        let reader = CountingReader::new(1024);
        let mut ptrs = direct_ptrs();
        ptrs[2] = 5000;
        let ino = inode(ptrs, 12 * 1024);
        let map = BlockMap::new(&reader, &sb, &ino).unwrap();

        let mut blocks = map.data_blocks();
        assert!(blocks.next().unwrap().is_ok());
        assert!(blocks.next().unwrap().is_ok());
        assert!(matches!(
            blocks.next(),
            Some(Err(Ext2Error::Corruption { block: 5000, .. }))
        ));
    }

    #[test]
    fn size_beyond_pointer_capacity_is_corrupt() {
        let sb = superblock(0, 8192);
        let reader = CountingReader::new(1024);
        let mut ino = inode(direct_ptrs(), u32::MAX);
        ino.size_high = u32::MAX;
        let err = BlockMap::new(&reader, &sb, &ino).unwrap_err();
        assert!(matches!(err, Ext2Error::CorruptInode(_)));

        // Exactly the addressable maximum is accepted.
        let max = max_logical_blocks(256) * 1024;
        ino.size_lo = max as u32;
        ino.size_high = (max >> 32) as u32;
        assert_eq!(ino.size(), max);
        let map = BlockMap::new(&reader, &sb, &ino).unwrap();
        assert_eq!(map.logical_block_count(), map.capacity());
        assert!(reader.reads().is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        #[test]
        fn reads_equal_tier_depth(logical in 0_u64..max_logical_blocks(256)) {
            let sb = superblock(0, 8192);
            let reader = CountingReader::filled(1024, 77);
            let mut ptrs = direct_ptrs();
            ptrs[EXT2_IND_BLOCK] = 50;
            ptrs[EXT2_DIND_BLOCK] = 51;
            ptrs[EXT2_TIND_BLOCK] = 52;
            let ino = inode(ptrs, 0);
            let map = BlockMap::new(&reader, &sb, &ino).unwrap();

            let mapping = map.resolve(logical).unwrap();
            let depth = BlockPath::new(logical, 256).unwrap().depth();
            prop_assert_eq!(reader.reads().len(), depth);
            if depth == 0 {
                prop_assert_eq!(mapping, BlockMapping::Mapped(BlockNumber(100 + logical)));
            } else {
                prop_assert_eq!(mapping, BlockMapping::Mapped(BlockNumber(77)));
            }
        }
    }
}
