//! Inode record codec.
//!
//! The first 128 bytes follow the legacy layout. Anything past that, up to
//! the superblock's inode size, is carried as an opaque extension and
//! written back unchanged.

use e2fs_error::{Ext2Error, Result};
use e2fs_types::{
    EXT2_APPEND_FL, EXT2_EXTENTS_FL, EXT2_FAST_SYMLINK_MAX, EXT2_GOOD_OLD_INODE_SIZE,
    EXT2_IMMUTABLE_FL, EXT2_INDEX_FL, EXT2_LINK_MAX, EXT2_N_BLOCKS, ParseError, S_IFBLK, S_IFCHR,
    S_IFDIR, S_IFIFO, S_IFLNK, S_IFMT, S_IFREG, S_IFSOCK, read_le_u16, read_le_u32, write_bytes,
    write_le_u16, write_le_u32,
};
use serde::{Deserialize, Serialize};

const LEGACY_SIZE: usize = EXT2_GOOD_OLD_INODE_SIZE as usize;

fn corrupt(err: ParseError) -> Ext2Error {
    Ext2Error::CorruptInode(err.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inode {
    pub mode: u16,
    pub uid_lo: u16,
    pub size_lo: u32,

    // ── Timestamps (seconds) ─────────────────────────────────────────────
    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub dtime: u32,

    pub gid_lo: u16,
    pub links_count: u16,
    /// 512-byte sectors, low half.
    pub blocks_lo: u32,
    pub flags: u32,
    pub osd1: u32,
    /// 12 direct, then single, double and triple indirect.
    pub block: [u32; EXT2_N_BLOCKS],
    pub generation: u32,
    pub file_acl_lo: u32,
    /// `i_dir_acl` on old volumes; high 32 bits of the size for regular files.
    pub size_high: u32,
    pub faddr: u32,

    // ── OS-dependent 2 (Linux layout) ────────────────────────────────────
    pub blocks_hi: u16,
    pub file_acl_hi: u16,
    pub uid_hi: u16,
    pub gid_hi: u16,
    pub reserved2: u32,

    /// Bytes past the 128-byte layout.
    pub extra: Vec<u8>,
}

impl Inode {
    /// Decode one inode record. `bytes` is exactly one record (`inode_size` bytes).
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < LEGACY_SIZE {
            return Err(corrupt(ParseError::InsufficientData {
                needed: LEGACY_SIZE,
                offset: 0,
                actual: bytes.len(),
            }));
        }

        let mut block = [0_u32; EXT2_N_BLOCKS];
        for (i, ptr) in block.iter_mut().enumerate() {
            *ptr = read_le_u32(bytes, 0x28 + i * 4).map_err(corrupt)?;
        }

        Ok(Self {
            mode: read_le_u16(bytes, 0x00).map_err(corrupt)?,
            uid_lo: read_le_u16(bytes, 0x02).map_err(corrupt)?,
            size_lo: read_le_u32(bytes, 0x04).map_err(corrupt)?,
            atime: read_le_u32(bytes, 0x08).map_err(corrupt)?,
            ctime: read_le_u32(bytes, 0x0C).map_err(corrupt)?,
            mtime: read_le_u32(bytes, 0x10).map_err(corrupt)?,
            dtime: read_le_u32(bytes, 0x14).map_err(corrupt)?,
            gid_lo: read_le_u16(bytes, 0x18).map_err(corrupt)?,
            links_count: read_le_u16(bytes, 0x1A).map_err(corrupt)?,
            blocks_lo: read_le_u32(bytes, 0x1C).map_err(corrupt)?,
            flags: read_le_u32(bytes, 0x20).map_err(corrupt)?,
            osd1: read_le_u32(bytes, 0x24).map_err(corrupt)?,
            block,
            generation: read_le_u32(bytes, 0x64).map_err(corrupt)?,
            file_acl_lo: read_le_u32(bytes, 0x68).map_err(corrupt)?,
            size_high: read_le_u32(bytes, 0x6C).map_err(corrupt)?,
            faddr: read_le_u32(bytes, 0x70).map_err(corrupt)?,
            blocks_hi: read_le_u16(bytes, 0x74).map_err(corrupt)?,
            file_acl_hi: read_le_u16(bytes, 0x76).map_err(corrupt)?,
            uid_hi: read_le_u16(bytes, 0x78).map_err(corrupt)?,
            gid_hi: read_le_u16(bytes, 0x7A).map_err(corrupt)?,
            reserved2: read_le_u32(bytes, 0x7C).map_err(corrupt)?,
            extra: bytes[LEGACY_SIZE..].to_vec(),
        })
    }

    /// On-disk record length (`128 + extra.len()`).
    #[must_use]
    pub fn record_len(&self) -> usize {
        LEGACY_SIZE + self.extra.len()
    }

    /// Serialize into a fresh record of `record_len()` bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = vec![0_u8; self.record_len()];
        self.encode_into(&mut out)?;
        Ok(out)
    }

    /// Serialize into the first `record_len()` bytes of `out`.
    pub fn encode_into(&self, out: &mut [u8]) -> Result<()> {
        if out.len() < self.record_len() {
            return Err(corrupt(ParseError::InsufficientData {
                needed: self.record_len(),
                offset: 0,
                actual: out.len(),
            }));
        }
        self.write_fields(out).map_err(corrupt)
    }

    fn write_fields(&self, out: &mut [u8]) -> std::result::Result<(), ParseError> {
        write_le_u16(out, 0x00, self.mode)?;
        write_le_u16(out, 0x02, self.uid_lo)?;
        write_le_u32(out, 0x04, self.size_lo)?;
        write_le_u32(out, 0x08, self.atime)?;
        write_le_u32(out, 0x0C, self.ctime)?;
        write_le_u32(out, 0x10, self.mtime)?;
        write_le_u32(out, 0x14, self.dtime)?;
        write_le_u16(out, 0x18, self.gid_lo)?;
        write_le_u16(out, 0x1A, self.links_count)?;
        write_le_u32(out, 0x1C, self.blocks_lo)?;
        write_le_u32(out, 0x20, self.flags)?;
        write_le_u32(out, 0x24, self.osd1)?;
        for (i, ptr) in self.block.iter().enumerate() {
            write_le_u32(out, 0x28 + i * 4, *ptr)?;
        }
        write_le_u32(out, 0x64, self.generation)?;
        write_le_u32(out, 0x68, self.file_acl_lo)?;
        write_le_u32(out, 0x6C, self.size_high)?;
        write_le_u32(out, 0x70, self.faddr)?;
        write_le_u16(out, 0x74, self.blocks_hi)?;
        write_le_u16(out, 0x76, self.file_acl_hi)?;
        write_le_u16(out, 0x78, self.uid_hi)?;
        write_le_u16(out, 0x7A, self.gid_hi)?;
        write_le_u32(out, 0x7C, self.reserved2)?;
        write_bytes(out, LEGACY_SIZE, &self.extra)
    }

    // ── Combined fields ─────────────────────────────────────────────────

    #[must_use]
    pub fn uid(&self) -> u32 {
        u32::from(self.uid_lo) | (u32::from(self.uid_hi) << 16)
    }

    #[must_use]
    pub fn gid(&self) -> u32 {
        u32::from(self.gid_lo) | (u32::from(self.gid_hi) << 16)
    }

    /// File size in bytes. Only regular files use the high word.
    #[must_use]
    pub fn size(&self) -> u64 {
        if self.is_regular() {
            u64::from(self.size_lo) | (u64::from(self.size_high) << 32)
        } else {
            u64::from(self.size_lo)
        }
    }

    /// Allocated 512-byte sectors.
    #[must_use]
    pub fn blocks(&self) -> u64 {
        u64::from(self.blocks_lo) | (u64::from(self.blocks_hi) << 32)
    }

    #[must_use]
    pub fn file_acl(&self) -> u64 {
        u64::from(self.file_acl_lo) | (u64::from(self.file_acl_hi) << 32)
    }

    #[must_use]
    pub fn block_ptrs(&self) -> &[u32; EXT2_N_BLOCKS] {
        &self.block
    }

    /// Deleted inodes carry a non-zero deletion time.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.dtime != 0
    }

    /// Whether another hard link may be added.
    #[must_use]
    pub fn can_add_link(&self) -> bool {
        self.links_count < EXT2_LINK_MAX
    }

    // ── Flags ────────────────────────────────────────────────────────────

    #[must_use]
    pub fn has_flag(&self, flag: u32) -> bool {
        (self.flags & flag) != 0
    }

    #[must_use]
    pub fn is_immutable(&self) -> bool {
        self.has_flag(EXT2_IMMUTABLE_FL)
    }

    #[must_use]
    pub fn is_append_only(&self) -> bool {
        self.has_flag(EXT2_APPEND_FL)
    }

    /// Hash-indexed directory.
    #[must_use]
    pub fn has_htree_index(&self) -> bool {
        self.has_flag(EXT2_INDEX_FL)
    }

    /// Extent-mapped inode; its `block` array is not a pointer tree.
    #[must_use]
    pub fn uses_extents(&self) -> bool {
        self.has_flag(EXT2_EXTENTS_FL)
    }

    // ── File type detection ─────────────────────────────────────────────

    #[must_use]
    pub fn file_type_mode(&self) -> u16 {
        self.mode & S_IFMT
    }

    #[must_use]
    pub fn is_regular(&self) -> bool {
        self.file_type_mode() == S_IFREG
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.file_type_mode() == S_IFDIR
    }

    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.file_type_mode() == S_IFLNK
    }

    #[must_use]
    pub fn is_chrdev(&self) -> bool {
        self.file_type_mode() == S_IFCHR
    }

    #[must_use]
    pub fn is_blkdev(&self) -> bool {
        self.file_type_mode() == S_IFBLK
    }

    #[must_use]
    pub fn is_fifo(&self) -> bool {
        self.file_type_mode() == S_IFIFO
    }

    #[must_use]
    pub fn is_socket(&self) -> bool {
        self.file_type_mode() == S_IFSOCK
    }

    /// Permission bits (lower 12 bits of mode).
    #[must_use]
    pub fn permission_bits(&self) -> u16 {
        self.mode & 0o7777
    }

    // ── Symlink helpers ─────────────────────────────────────────────────

    /// A fast symlink keeps its target in the `block` array and owns no data
    /// blocks beyond an optional extended attribute block.
    #[must_use]
    pub fn is_fast_symlink(&self, block_size: u32) -> bool {
        if !self.is_symlink() || self.uses_extents() {
            return false;
        }
        let ea_sectors = if self.file_acl() != 0 {
            u64::from(block_size / 512)
        } else {
            0
        };
        self.blocks() == ea_sectors && self.size() <= EXT2_FAST_SYMLINK_MAX as u64
    }

    /// Target of a fast symlink, read from the `block` array bytes.
    #[must_use]
    pub fn fast_symlink_target(&self, block_size: u32) -> Option<Vec<u8>> {
        if !self.is_fast_symlink(block_size) {
            return None;
        }
        let len = usize::try_from(self.size()).ok()?;
        let bytes: Vec<u8> = self.block.iter().flat_map(|p| p.to_le_bytes()).collect();
        bytes.get(..len).map(<[u8]>::to_vec)
    }
}
