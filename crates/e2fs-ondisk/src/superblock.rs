//! Superblock codec.
//!
//! The superblock is a 1024-byte little-endian record at byte 1024 of the
//! volume. Every byte of the record is captured by a field so that
//! [`Superblock::encode`] reproduces the decoded region exactly.

use crate::features::{CompatFeatures, FeatureSet, FeatureTable, IncompatFeatures, RoCompatFeatures};
use e2fs_error::{Ext2Error, Result};
use e2fs_types::{
    BlockNumber, BlockSize, EXT2_GOOD_OLD_FIRST_INO, EXT2_GOOD_OLD_INODE_SIZE,
    EXT2_MAX_BLOCK_LOG_SIZE, EXT2_MIN_BLOCK_LOG_SIZE, EXT2_MIN_BLOCK_SIZE, EXT2_MIN_DESC_SIZE,
    EXT2_MIN_DESC_SIZE_64BIT, EXT2_NAME_LEN, EXT2_SUPER_MAGIC, EXT2_SUPERBLOCK_OFFSET,
    EXT2_SUPERBLOCK_SIZE, ParseError, block_size_from_log, read_fixed, read_le_u16, read_le_u32,
    read_le_u64, read_u8, trim_nul_padded, write_bytes, write_le_u16, write_le_u32,
    write_le_u64, write_u8,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

const LAST_MOUNTED_LEN: usize = 64;
const RESERVED_OFFSET: usize = 0x178;
const RESERVED_LEN: usize = EXT2_SUPERBLOCK_SIZE - RESERVED_OFFSET;
const JNL_BLOCKS: usize = 17;

fn corrupt(err: ParseError) -> Ext2Error {
    Ext2Error::CorruptSuperBlock(err.to_string())
}

fn invalid(field: &'static str, reason: &'static str) -> Ext2Error {
    corrupt(ParseError::InvalidField { field, reason })
}

// ── Typed views ─────────────────────────────────────────────────────────────

/// Revision level (`s_rev_level`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Revision {
    /// Fixed 128-byte inodes, first usable inode 11.
    Original,
    /// Inode size and first inode come from the superblock.
    Dynamic,
}

impl Revision {
    #[must_use]
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Original),
            1 => Some(Self::Dynamic),
            _ => None,
        }
    }

    #[must_use]
    pub fn raw(self) -> u32 {
        match self {
            Self::Original => 0,
            Self::Dynamic => 1,
        }
    }
}

/// Mount state bits (`s_state`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSystemState(pub u16);

impl FileSystemState {
    /// Cleanly unmounted.
    pub const VALID: Self = Self(0x0001);
    /// Errors detected.
    pub const ERROR: Self = Self(0x0002);
    /// Orphans being recovered.
    pub const ORPHAN: Self = Self(0x0004);

    #[must_use]
    pub fn contains(self, flag: Self) -> bool {
        (self.0 & flag.0) != 0
    }

    #[must_use]
    pub fn is_clean(self) -> bool {
        self.contains(Self::VALID) && !self.contains(Self::ERROR)
    }
}

/// Behaviour requested when errors are detected (`s_errors`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorBehavior {
    Continue,
    RemountReadOnly,
    Panic,
    Unknown(u16),
}

impl ErrorBehavior {
    #[must_use]
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            1 => Self::Continue,
            2 => Self::RemountReadOnly,
            3 => Self::Panic,
            other => Self::Unknown(other),
        }
    }
}

/// Operating system that created the volume (`s_creator_os`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreatorOs {
    Linux,
    Hurd,
    Masix,
    FreeBsd,
    Lites,
    Unknown(u32),
}

impl CreatorOs {
    #[must_use]
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Self::Linux,
            1 => Self::Hurd,
            2 => Self::Masix,
            3 => Self::FreeBsd,
            4 => Self::Lites,
            other => Self::Unknown(other),
        }
    }
}

// ── Superblock ──────────────────────────────────────────────────────────────

/// Decoded superblock.
///
/// Fields hold raw on-disk values. Derived quantities (block size, inode
/// size, descriptor size, ...) are methods, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Superblock {
    // ── Counts ───────────────────────────────────────────────────────────
    pub inodes_count: u32,
    pub blocks_count_lo: u32,
    pub r_blocks_count_lo: u32,
    pub free_blocks_count_lo: u32,
    pub free_inodes_count: u32,
    pub first_data_block: u32,

    // ── Geometry ─────────────────────────────────────────────────────────
    pub log_block_size: u32,
    pub log_frag_size: i32,
    pub blocks_per_group: u32,
    pub frags_per_group: u32,
    pub inodes_per_group: u32,

    // ── Mount bookkeeping ────────────────────────────────────────────────
    pub mtime: u32,
    pub wtime: u32,
    pub mnt_count: u16,
    pub max_mnt_count: i16,
    pub magic: u16,
    pub state: u16,
    pub errors: u16,
    pub minor_rev_level: u16,
    pub lastcheck: u32,
    pub checkinterval: u32,
    pub creator_os: u32,
    pub rev_level: u32,
    pub def_resuid: u16,
    pub def_resgid: u16,

    // ── Dynamic revision ─────────────────────────────────────────────────
    pub first_ino: u32,
    pub inode_size: u16,
    pub block_group_nr: u16,
    pub feature_compat: CompatFeatures,
    pub feature_incompat: IncompatFeatures,
    pub feature_ro_compat: RoCompatFeatures,
    pub uuid: [u8; 16],
    pub volume_name: [u8; 16],
    pub last_mounted: Vec<u8>,
    pub algorithm_usage_bitmap: u32,

    // ── Preallocation hints ──────────────────────────────────────────────
    pub prealloc_blocks: u8,
    pub prealloc_dir_blocks: u8,
    pub reserved_gdt_blocks: u16,

    // ── Journal ──────────────────────────────────────────────────────────
    pub journal_uuid: [u8; 16],
    pub journal_inum: u32,
    pub journal_dev: u32,
    pub last_orphan: u32,

    // ── Directory hashing ────────────────────────────────────────────────
    pub hash_seed: [u32; 4],
    pub def_hash_version: u8,
    pub jnl_backup_type: u8,
    pub desc_size: u16,
    pub default_mount_opts: u32,
    pub first_meta_bg: u32,
    pub mkfs_time: u32,
    pub jnl_blocks: [u32; JNL_BLOCKS],

    // ── 64-bit support ───────────────────────────────────────────────────
    pub blocks_count_hi: u32,
    pub r_blocks_count_hi: u32,
    pub free_blocks_count_hi: u32,
    pub min_extra_isize: u16,
    pub want_extra_isize: u16,
    pub flags: u32,
    pub raid_stride: u16,
    pub mmp_interval: u16,
    pub mmp_block: u64,
    pub raid_stripe_width: u32,
    pub log_groups_per_flex: u8,
    pub reserved_char_pad: u8,
    pub reserved_pad: u16,

    /// Opaque tail (0x178..0x400), re-emitted verbatim.
    pub reserved: Vec<u8>,
}

impl Superblock {
    /// Decode and run the supported-feature gate.
    pub fn decode(region: &[u8]) -> Result<Self> {
        Self::decode_with_table(region, &FeatureTable::SUPPORTED)
    }

    /// Decode and gate against a caller-supplied feature table.
    pub fn decode_with_table(region: &[u8], table: &FeatureTable) -> Result<Self> {
        let sb = Self::decode_unchecked(region)?;
        table.check(sb.feature_set()).ensure_mountable()?;
        Ok(sb)
    }

    /// Decode with structural checks only; feature bits are not gated.
    #[allow(clippy::too_many_lines)]
    pub fn decode_unchecked(region: &[u8]) -> Result<Self> {
        if region.len() < EXT2_SUPERBLOCK_SIZE {
            return Err(corrupt(ParseError::InsufficientData {
                needed: EXT2_SUPERBLOCK_SIZE,
                offset: 0,
                actual: region.len(),
            }));
        }
        let region = &region[..EXT2_SUPERBLOCK_SIZE];

        let magic = read_le_u16(region, 0x38).map_err(corrupt)?;
        if magic != EXT2_SUPER_MAGIC {
            return Err(corrupt(ParseError::InvalidMagic {
                expected: u64::from(EXT2_SUPER_MAGIC),
                actual: u64::from(magic),
            }));
        }

        let rev_level = read_le_u32(region, 0x4C).map_err(corrupt)?;
        let Some(revision) = Revision::from_raw(rev_level) else {
            return Err(Ext2Error::UnsupportedFeature(format!(
                "revision level {rev_level}"
            )));
        };

        let log_block_size = read_le_u32(region, 0x18).map_err(corrupt)?;
        if log_block_size > EXT2_MAX_BLOCK_LOG_SIZE - EXT2_MIN_BLOCK_LOG_SIZE {
            return Err(invalid("s_log_block_size", "block size above 64 KiB"));
        }
        let block_size = BlockSize::from_log(log_block_size).map_err(corrupt)?;

        let log_frag_size = i32::from_le_bytes(read_fixed::<4>(region, 0x1C).map_err(corrupt)?);
        let frag_ok = u32::try_from(log_frag_size)
            .ok()
            .and_then(block_size_from_log)
            .is_some();
        if !frag_ok {
            return Err(invalid("s_log_frag_size", "negative or overflowing shift"));
        }

        let blocks_per_group = read_le_u32(region, 0x20).map_err(corrupt)?;
        if blocks_per_group == 0 {
            return Err(invalid("s_blocks_per_group", "cannot be zero"));
        }
        let inodes_per_group = read_le_u32(region, 0x28).map_err(corrupt)?;
        if inodes_per_group == 0 {
            return Err(invalid("s_inodes_per_group", "cannot be zero"));
        }

        let inode_size = read_le_u16(region, 0x58).map_err(corrupt)?;
        if revision == Revision::Dynamic {
            if inode_size < EXT2_GOOD_OLD_INODE_SIZE {
                return Err(invalid("s_inode_size", "must be >= 128"));
            }
            if !inode_size.is_power_of_two() {
                return Err(invalid("s_inode_size", "must be a power of two"));
            }
            if u32::from(inode_size) > block_size.get() {
                return Err(invalid("s_inode_size", "inode_size exceeds block_size"));
            }
        }

        let mut jnl_blocks = [0_u32; JNL_BLOCKS];
        for (i, slot) in jnl_blocks.iter_mut().enumerate() {
            *slot = read_le_u32(region, 0x10C + i * 4).map_err(corrupt)?;
        }

        let sb = Self {
            inodes_count: read_le_u32(region, 0x00).map_err(corrupt)?,
            blocks_count_lo: read_le_u32(region, 0x04).map_err(corrupt)?,
            r_blocks_count_lo: read_le_u32(region, 0x08).map_err(corrupt)?,
            free_blocks_count_lo: read_le_u32(region, 0x0C).map_err(corrupt)?,
            free_inodes_count: read_le_u32(region, 0x10).map_err(corrupt)?,
            first_data_block: read_le_u32(region, 0x14).map_err(corrupt)?,

            log_block_size,
            log_frag_size,
            blocks_per_group,
            frags_per_group: read_le_u32(region, 0x24).map_err(corrupt)?,
            inodes_per_group,

            mtime: read_le_u32(region, 0x2C).map_err(corrupt)?,
            wtime: read_le_u32(region, 0x30).map_err(corrupt)?,
            mnt_count: read_le_u16(region, 0x34).map_err(corrupt)?,
            max_mnt_count: i16::from_le_bytes(read_fixed::<2>(region, 0x36).map_err(corrupt)?),
            magic,
            state: read_le_u16(region, 0x3A).map_err(corrupt)?,
            errors: read_le_u16(region, 0x3C).map_err(corrupt)?,
            minor_rev_level: read_le_u16(region, 0x3E).map_err(corrupt)?,
            lastcheck: read_le_u32(region, 0x40).map_err(corrupt)?,
            checkinterval: read_le_u32(region, 0x44).map_err(corrupt)?,
            creator_os: read_le_u32(region, 0x48).map_err(corrupt)?,
            rev_level,
            def_resuid: read_le_u16(region, 0x50).map_err(corrupt)?,
            def_resgid: read_le_u16(region, 0x52).map_err(corrupt)?,

            first_ino: read_le_u32(region, 0x54).map_err(corrupt)?,
            inode_size,
            block_group_nr: read_le_u16(region, 0x5A).map_err(corrupt)?,
            feature_compat: CompatFeatures(read_le_u32(region, 0x5C).map_err(corrupt)?),
            feature_incompat: IncompatFeatures(read_le_u32(region, 0x60).map_err(corrupt)?),
            feature_ro_compat: RoCompatFeatures(read_le_u32(region, 0x64).map_err(corrupt)?),
            uuid: read_fixed::<16>(region, 0x68).map_err(corrupt)?,
            volume_name: read_fixed::<16>(region, 0x78).map_err(corrupt)?,
            last_mounted: region[0x88..0x88 + LAST_MOUNTED_LEN].to_vec(),
            algorithm_usage_bitmap: read_le_u32(region, 0xC8).map_err(corrupt)?,

            prealloc_blocks: read_u8(region, 0xCC).map_err(corrupt)?,
            prealloc_dir_blocks: read_u8(region, 0xCD).map_err(corrupt)?,
            reserved_gdt_blocks: read_le_u16(region, 0xCE).map_err(corrupt)?,

            journal_uuid: read_fixed::<16>(region, 0xD0).map_err(corrupt)?,
            journal_inum: read_le_u32(region, 0xE0).map_err(corrupt)?,
            journal_dev: read_le_u32(region, 0xE4).map_err(corrupt)?,
            last_orphan: read_le_u32(region, 0xE8).map_err(corrupt)?,

            hash_seed: [
                read_le_u32(region, 0xEC).map_err(corrupt)?,
                read_le_u32(region, 0xF0).map_err(corrupt)?,
                read_le_u32(region, 0xF4).map_err(corrupt)?,
                read_le_u32(region, 0xF8).map_err(corrupt)?,
            ],
            def_hash_version: read_u8(region, 0xFC).map_err(corrupt)?,
            jnl_backup_type: read_u8(region, 0xFD).map_err(corrupt)?,
            desc_size: read_le_u16(region, 0xFE).map_err(corrupt)?,
            default_mount_opts: read_le_u32(region, 0x100).map_err(corrupt)?,
            first_meta_bg: read_le_u32(region, 0x104).map_err(corrupt)?,
            mkfs_time: read_le_u32(region, 0x108).map_err(corrupt)?,
            jnl_blocks,

            blocks_count_hi: read_le_u32(region, 0x150).map_err(corrupt)?,
            r_blocks_count_hi: read_le_u32(region, 0x154).map_err(corrupt)?,
            free_blocks_count_hi: read_le_u32(region, 0x158).map_err(corrupt)?,
            min_extra_isize: read_le_u16(region, 0x15C).map_err(corrupt)?,
            want_extra_isize: read_le_u16(region, 0x15E).map_err(corrupt)?,
            flags: read_le_u32(region, 0x160).map_err(corrupt)?,
            raid_stride: read_le_u16(region, 0x164).map_err(corrupt)?,
            mmp_interval: read_le_u16(region, 0x166).map_err(corrupt)?,
            mmp_block: read_le_u64(region, 0x168).map_err(corrupt)?,
            raid_stripe_width: read_le_u32(region, 0x170).map_err(corrupt)?,
            log_groups_per_flex: read_u8(region, 0x174).map_err(corrupt)?,
            reserved_char_pad: read_u8(region, 0x175).map_err(corrupt)?,
            reserved_pad: read_le_u16(region, 0x176).map_err(corrupt)?,

            reserved: region[RESERVED_OFFSET..].to_vec(),
        };

        debug!(
            block_size = sb.block_size(),
            inode_size = sb.inode_size(),
            blocks = sb.blocks_count(),
            groups = sb.group_count(),
            rev = rev_level,
            features = %sb.feature_set(),
            "decoded superblock"
        );
        Ok(sb)
    }

    /// Decode the superblock from a full in-memory volume image.
    pub fn decode_from_image(image: &[u8]) -> Result<Self> {
        let end = EXT2_SUPERBLOCK_OFFSET + EXT2_SUPERBLOCK_SIZE;
        if image.len() < end {
            return Err(corrupt(ParseError::InsufficientData {
                needed: EXT2_SUPERBLOCK_SIZE,
                offset: EXT2_SUPERBLOCK_OFFSET,
                actual: image.len().saturating_sub(EXT2_SUPERBLOCK_OFFSET),
            }));
        }
        Self::decode(&image[EXT2_SUPERBLOCK_OFFSET..end])
    }

    /// Serialize into a fresh 1024-byte region.
    pub fn encode(&self) -> Result<[u8; EXT2_SUPERBLOCK_SIZE]> {
        let mut out = [0_u8; EXT2_SUPERBLOCK_SIZE];
        self.encode_into(&mut out)?;
        Ok(out)
    }

    /// Serialize into the first 1024 bytes of `out`.
    pub fn encode_into(&self, out: &mut [u8]) -> Result<()> {
        if self.last_mounted.len() != LAST_MOUNTED_LEN {
            return Err(invalid("s_last_mounted", "must be 64 bytes"));
        }
        if self.reserved.len() != RESERVED_LEN {
            return Err(invalid("s_reserved", "must be 648 bytes"));
        }
        if out.len() < EXT2_SUPERBLOCK_SIZE {
            return Err(corrupt(ParseError::InsufficientData {
                needed: EXT2_SUPERBLOCK_SIZE,
                offset: 0,
                actual: out.len(),
            }));
        }
        self.write_fields(out).map_err(corrupt)
    }

    fn write_fields(&self, out: &mut [u8]) -> std::result::Result<(), ParseError> {
        write_le_u32(out, 0x00, self.inodes_count)?;
        write_le_u32(out, 0x04, self.blocks_count_lo)?;
        write_le_u32(out, 0x08, self.r_blocks_count_lo)?;
        write_le_u32(out, 0x0C, self.free_blocks_count_lo)?;
        write_le_u32(out, 0x10, self.free_inodes_count)?;
        write_le_u32(out, 0x14, self.first_data_block)?;
        write_le_u32(out, 0x18, self.log_block_size)?;
        write_bytes(out, 0x1C, &self.log_frag_size.to_le_bytes())?;
        write_le_u32(out, 0x20, self.blocks_per_group)?;
        write_le_u32(out, 0x24, self.frags_per_group)?;
        write_le_u32(out, 0x28, self.inodes_per_group)?;
        write_le_u32(out, 0x2C, self.mtime)?;
        write_le_u32(out, 0x30, self.wtime)?;
        write_le_u16(out, 0x34, self.mnt_count)?;
        write_bytes(out, 0x36, &self.max_mnt_count.to_le_bytes())?;
        write_le_u16(out, 0x38, self.magic)?;
        write_le_u16(out, 0x3A, self.state)?;
        write_le_u16(out, 0x3C, self.errors)?;
        write_le_u16(out, 0x3E, self.minor_rev_level)?;
        write_le_u32(out, 0x40, self.lastcheck)?;
        write_le_u32(out, 0x44, self.checkinterval)?;
        write_le_u32(out, 0x48, self.creator_os)?;
        write_le_u32(out, 0x4C, self.rev_level)?;
        write_le_u16(out, 0x50, self.def_resuid)?;
        write_le_u16(out, 0x52, self.def_resgid)?;

        write_le_u32(out, 0x54, self.first_ino)?;
        write_le_u16(out, 0x58, self.inode_size)?;
        write_le_u16(out, 0x5A, self.block_group_nr)?;
        write_le_u32(out, 0x5C, self.feature_compat.0)?;
        write_le_u32(out, 0x60, self.feature_incompat.0)?;
        write_le_u32(out, 0x64, self.feature_ro_compat.0)?;
        write_bytes(out, 0x68, &self.uuid)?;
        write_bytes(out, 0x78, &self.volume_name)?;
        write_bytes(out, 0x88, &self.last_mounted)?;
        write_le_u32(out, 0xC8, self.algorithm_usage_bitmap)?;

        write_u8(out, 0xCC, self.prealloc_blocks)?;
        write_u8(out, 0xCD, self.prealloc_dir_blocks)?;
        write_le_u16(out, 0xCE, self.reserved_gdt_blocks)?;

        write_bytes(out, 0xD0, &self.journal_uuid)?;
        write_le_u32(out, 0xE0, self.journal_inum)?;
        write_le_u32(out, 0xE4, self.journal_dev)?;
        write_le_u32(out, 0xE8, self.last_orphan)?;

        for (i, seed) in self.hash_seed.iter().enumerate() {
            write_le_u32(out, 0xEC + i * 4, *seed)?;
        }
        write_u8(out, 0xFC, self.def_hash_version)?;
        write_u8(out, 0xFD, self.jnl_backup_type)?;
        write_le_u16(out, 0xFE, self.desc_size)?;
        write_le_u32(out, 0x100, self.default_mount_opts)?;
        write_le_u32(out, 0x104, self.first_meta_bg)?;
        write_le_u32(out, 0x108, self.mkfs_time)?;
        for (i, blk) in self.jnl_blocks.iter().enumerate() {
            write_le_u32(out, 0x10C + i * 4, *blk)?;
        }

        write_le_u32(out, 0x150, self.blocks_count_hi)?;
        write_le_u32(out, 0x154, self.r_blocks_count_hi)?;
        write_le_u32(out, 0x158, self.free_blocks_count_hi)?;
        write_le_u16(out, 0x15C, self.min_extra_isize)?;
        write_le_u16(out, 0x15E, self.want_extra_isize)?;
        write_le_u32(out, 0x160, self.flags)?;
        write_le_u16(out, 0x164, self.raid_stride)?;
        write_le_u16(out, 0x166, self.mmp_interval)?;
        write_le_u64(out, 0x168, self.mmp_block)?;
        write_le_u32(out, 0x170, self.raid_stripe_width)?;
        write_u8(out, 0x174, self.log_groups_per_flex)?;
        write_u8(out, 0x175, self.reserved_char_pad)?;
        write_le_u16(out, 0x176, self.reserved_pad)?;

        write_bytes(out, RESERVED_OFFSET, &self.reserved)
    }

    // ── Feature queries ──────────────────────────────────────────────────

    #[must_use]
    pub fn feature_set(&self) -> FeatureSet {
        FeatureSet {
            compat: self.feature_compat,
            incompat: self.feature_incompat,
            ro_compat: self.feature_ro_compat,
        }
    }

    #[must_use]
    pub fn has_compat(&self, mask: CompatFeatures) -> bool {
        self.feature_compat.contains(mask)
    }

    #[must_use]
    pub fn has_incompat(&self, mask: IncompatFeatures) -> bool {
        self.feature_incompat.contains(mask)
    }

    #[must_use]
    pub fn has_ro_compat(&self, mask: RoCompatFeatures) -> bool {
        self.feature_ro_compat.contains(mask)
    }

    #[must_use]
    pub fn is_64bit(&self) -> bool {
        self.has_incompat(IncompatFeatures::BIT64)
    }

    // ── Derived geometry ─────────────────────────────────────────────────

    #[must_use]
    pub fn revision(&self) -> Revision {
        Revision::from_raw(self.rev_level).unwrap_or(Revision::Dynamic)
    }

    /// `log2(block_size)`.
    ///
    /// Decoding rejects exponents above 6; the accessor saturates there.
    #[must_use]
    pub fn block_size_bits(&self) -> u32 {
        EXT2_MIN_BLOCK_LOG_SIZE
            + self
                .log_block_size
                .min(EXT2_MAX_BLOCK_LOG_SIZE - EXT2_MIN_BLOCK_LOG_SIZE)
    }

    /// `1024 << s_log_block_size`.
    #[must_use]
    pub fn block_size(&self) -> u32 {
        1_u32 << self.block_size_bits()
    }

    /// `1024 << s_log_frag_size`.
    #[must_use]
    pub fn fragment_size(&self) -> u32 {
        u32::try_from(self.log_frag_size)
            .ok()
            .and_then(block_size_from_log)
            .unwrap_or(EXT2_MIN_BLOCK_SIZE)
    }

    /// 0 when fragments are larger than blocks.
    #[must_use]
    pub fn fragments_per_block(&self) -> u32 {
        self.block_size() / self.fragment_size()
    }

    /// 128 on revision 0, otherwise the stored value.
    #[must_use]
    pub fn inode_size(&self) -> u16 {
        match self.revision() {
            Revision::Original => EXT2_GOOD_OLD_INODE_SIZE,
            Revision::Dynamic => self.inode_size,
        }
    }

    /// 11 on revision 0, otherwise the stored value.
    #[must_use]
    pub fn first_inode_index(&self) -> u32 {
        match self.revision() {
            Revision::Original => EXT2_GOOD_OLD_FIRST_INO,
            Revision::Dynamic => self.first_ino,
        }
    }

    #[must_use]
    pub fn inodes_per_block(&self) -> u32 {
        self.block_size() / u32::from(self.inode_size().max(1))
    }

    /// Block pointers per index block.
    #[must_use]
    pub fn addresses_per_block(&self) -> u32 {
        self.block_size() / 4
    }

    /// 32 without the 64-bit feature; otherwise the stored size, at least 64.
    #[must_use]
    pub fn group_descriptor_size(&self) -> u16 {
        if self.is_64bit() {
            self.desc_size.max(EXT2_MIN_DESC_SIZE_64BIT)
        } else {
            EXT2_MIN_DESC_SIZE
        }
    }

    #[must_use]
    pub fn group_descriptors_per_block(&self) -> u32 {
        self.block_size() / u32::from(self.group_descriptor_size())
    }

    // ── Counts ───────────────────────────────────────────────────────────

    fn wide(&self, lo: u32, hi: u32) -> u64 {
        if self.is_64bit() {
            u64::from(lo) | (u64::from(hi) << 32)
        } else {
            u64::from(lo)
        }
    }

    #[must_use]
    pub fn blocks_count(&self) -> u64 {
        self.wide(self.blocks_count_lo, self.blocks_count_hi)
    }

    #[must_use]
    pub fn reserved_blocks_count(&self) -> u64 {
        self.wide(self.r_blocks_count_lo, self.r_blocks_count_hi)
    }

    #[must_use]
    pub fn free_blocks_count(&self) -> u64 {
        self.wide(self.free_blocks_count_lo, self.free_blocks_count_hi)
    }

    /// `ceil(blocks_count / blocks_per_group)`.
    #[must_use]
    pub fn group_count(&self) -> u32 {
        if self.blocks_per_group == 0 {
            return 0;
        }
        let groups = self
            .blocks_count()
            .div_ceil(u64::from(self.blocks_per_group));
        u32::try_from(groups).unwrap_or(u32::MAX)
    }

    /// First block of the group descriptor table (the block after the superblock's).
    #[must_use]
    pub fn group_descriptor_table_block(&self) -> BlockNumber {
        BlockNumber(u64::from(self.first_data_block) + 1)
    }

    /// Number of blocks spanned by the group descriptor table.
    #[must_use]
    pub fn group_descriptor_table_blocks(&self) -> u32 {
        self.group_count()
            .div_ceil(self.group_descriptors_per_block().max(1))
    }

    #[must_use]
    pub fn max_name_len(&self) -> usize {
        EXT2_NAME_LEN
    }

    // ── Identity & state ─────────────────────────────────────────────────

    #[must_use]
    pub fn volume_name(&self) -> String {
        trim_nul_padded(&self.volume_name)
    }

    #[must_use]
    pub fn last_mounted(&self) -> String {
        trim_nul_padded(&self.last_mounted)
    }

    #[must_use]
    pub fn fs_state(&self) -> FileSystemState {
        FileSystemState(self.state)
    }

    #[must_use]
    pub fn error_behavior(&self) -> ErrorBehavior {
        ErrorBehavior::from_raw(self.errors)
    }

    #[must_use]
    pub fn creator(&self) -> CreatorOs {
        CreatorOs::from_raw(self.creator_os)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Minimal revision-0 superblock with 1 KiB blocks.
    fn make_sb() -> [u8; EXT2_SUPERBLOCK_SIZE] {
        let mut sb = [0_u8; EXT2_SUPERBLOCK_SIZE];
        sb[0x38..0x3A].copy_from_slice(&EXT2_SUPER_MAGIC.to_le_bytes());
        sb[0x00..0x04].copy_from_slice(&64_u32.to_le_bytes()); // inodes_count
        sb[0x04..0x08].copy_from_slice(&1024_u32.to_le_bytes()); // blocks_count
        sb[0x14..0x18].copy_from_slice(&1_u32.to_le_bytes()); // first_data_block
        sb[0x20..0x24].copy_from_slice(&8192_u32.to_le_bytes()); // blocks_per_group
        sb[0x24..0x28].copy_from_slice(&8192_u32.to_le_bytes()); // frags_per_group
        sb[0x28..0x2C].copy_from_slice(&64_u32.to_le_bytes()); // inodes_per_group
        sb[0x3A..0x3C].copy_from_slice(&1_u16.to_le_bytes()); // state
        sb[0x3C..0x3E].copy_from_slice(&1_u16.to_le_bytes()); // errors
        sb[0x78..0x7C].copy_from_slice(b"e2fs");
        sb
    }

    fn make_dynamic_sb(log_block_size: u32, inode_size: u16) -> [u8; EXT2_SUPERBLOCK_SIZE] {
        let mut sb = make_sb();
        sb[0x18..0x1C].copy_from_slice(&log_block_size.to_le_bytes());
        sb[0x1C..0x20].copy_from_slice(&log_block_size.to_le_bytes());
        sb[0x4C..0x50].copy_from_slice(&1_u32.to_le_bytes());
        sb[0x54..0x58].copy_from_slice(&11_u32.to_le_bytes());
        sb[0x58..0x5A].copy_from_slice(&inode_size.to_le_bytes());
        sb
    }

    #[test]
    fn original_revision_uses_fixed_inode_geometry() {
        let mut raw = make_sb();
        // Stored values are ignored on revision 0.
        raw[0x54..0x58].copy_from_slice(&99_u32.to_le_bytes());
        raw[0x58..0x5A].copy_from_slice(&512_u16.to_le_bytes());

        let sb = Superblock::decode(&raw).expect("decode");
        assert_eq!(sb.revision(), Revision::Original);
        assert_eq!(sb.block_size(), 1024);
        assert_eq!(sb.block_size_bits(), 10);
        assert_eq!(sb.inode_size(), 128);
        assert_eq!(sb.first_inode_index(), 11);
        assert_eq!(sb.inodes_per_block(), 8);
        assert_eq!(sb.volume_name(), "e2fs");
        assert!(sb.fs_state().is_clean());
        assert_eq!(sb.error_behavior(), ErrorBehavior::Continue);
        assert_eq!(sb.creator(), CreatorOs::Linux);
    }

    #[test]
    fn four_kib_blocks_hold_1024_addresses() {
        let sb = Superblock::decode(&make_dynamic_sb(2, 256)).expect("decode");
        assert_eq!(sb.block_size(), 4096);
        assert_eq!(sb.addresses_per_block(), 1024);
        assert_eq!(sb.fragment_size(), 4096);
        assert_eq!(sb.fragments_per_block(), 1);
        assert_eq!(sb.inode_size(), 256);
        assert_eq!(sb.inodes_per_block(), 16);
    }

    #[test]
    fn descriptor_size_follows_64bit_feature() {
        let mut raw = make_dynamic_sb(2, 256);
        assert_eq!(Superblock::decode(&raw).unwrap().group_descriptor_size(), 32);

        raw[0x60..0x64].copy_from_slice(&IncompatFeatures::BIT64.0.to_le_bytes());
        raw[0xFE..0x100].copy_from_slice(&64_u16.to_le_bytes());
        let sb = Superblock::decode(&raw).expect("decode");
        assert_eq!(sb.group_descriptor_size(), 64);
        assert_eq!(sb.group_descriptors_per_block(), 64);

        // A zero stored size still yields the 64-byte minimum.
        raw[0xFE..0x100].copy_from_slice(&0_u16.to_le_bytes());
        let sb = Superblock::decode(&raw).expect("decode");
        assert_eq!(sb.group_descriptor_size(), 64);
    }

    #[test]
    fn high_block_count_only_counts_with_64bit() {
        let mut raw = make_dynamic_sb(2, 256);
        raw[0x150..0x154].copy_from_slice(&1_u32.to_le_bytes());
        let sb = Superblock::decode(&raw).unwrap();
        assert_eq!(sb.blocks_count(), 1024);

        raw[0x60..0x64].copy_from_slice(&IncompatFeatures::BIT64.0.to_le_bytes());
        let sb = Superblock::decode(&raw).unwrap();
        assert_eq!(sb.blocks_count(), (1_u64 << 32) | 1024);
    }

    #[test]
    fn group_count_and_table_extent() {
        let mut raw = make_sb();
        raw[0x04..0x08].copy_from_slice(&20_000_u32.to_le_bytes());
        let sb = Superblock::decode(&raw).unwrap();
        assert_eq!(sb.group_count(), 3); // ceil(20000 / 8192)
        assert_eq!(sb.group_descriptor_table_block(), BlockNumber(2));
        assert_eq!(sb.group_descriptor_table_blocks(), 1);
    }

    #[test]
    fn bad_magic_is_corrupt_superblock() {
        let mut raw = make_sb();
        raw[0x38..0x3A].copy_from_slice(&0x1234_u16.to_le_bytes());
        let err = Superblock::decode(&raw).unwrap_err();
        assert!(matches!(err, Ext2Error::CorruptSuperBlock(_)));
        assert!(err.to_string().contains("0xef53"));
    }

    #[test]
    fn short_region_is_corrupt_superblock() {
        let raw = make_sb();
        let err = Superblock::decode(&raw[..512]).unwrap_err();
        assert!(matches!(err, Ext2Error::CorruptSuperBlock(_)));
    }

    #[test]
    fn structural_checks_reject_bad_geometry() {
        let cases: Vec<(usize, Vec<u8>)> = vec![
            (0x18, 7_u32.to_le_bytes().to_vec()),          // 128 KiB blocks
            (0x1C, (-1_i32).to_le_bytes().to_vec()),       // negative fragment log
            (0x1C, 40_i32.to_le_bytes().to_vec()),         // overflowing fragment log
            (0x20, 0_u32.to_le_bytes().to_vec()),          // zero blocks per group
            (0x28, 0_u32.to_le_bytes().to_vec()),          // zero inodes per group
        ];
        for (offset, bytes) in cases {
            let mut raw = make_sb();
            raw[offset..offset + bytes.len()].copy_from_slice(&bytes);
            let err = Superblock::decode(&raw).unwrap_err();
            assert!(
                matches!(err, Ext2Error::CorruptSuperBlock(_)),
                "offset {offset:#x}: {err}"
            );
        }
    }

    #[test]
    fn dynamic_inode_size_is_validated() {
        for inode_size in [0_u16, 64, 200, 2048] {
            let raw = make_dynamic_sb(0, inode_size);
            let err = Superblock::decode(&raw).unwrap_err();
            assert!(
                matches!(err, Ext2Error::CorruptSuperBlock(_)),
                "inode_size {inode_size}: {err}"
            );
        }
        assert!(Superblock::decode(&make_dynamic_sb(0, 1024)).is_ok());
    }

    #[test]
    fn future_revision_is_unsupported() {
        let mut raw = make_sb();
        raw[0x4C..0x50].copy_from_slice(&2_u32.to_le_bytes());
        let err = Superblock::decode(&raw).unwrap_err();
        assert!(matches!(err, Ext2Error::UnsupportedFeature(_)));
    }

    #[test]
    fn unknown_incompat_bit_blocks_decode_but_not_unchecked() {
        let mut raw = make_sb();
        raw[0x60..0x64].copy_from_slice(&(1_u32 << 30).to_le_bytes());
        let err = Superblock::decode(&raw).unwrap_err();
        assert!(matches!(err, Ext2Error::UnsupportedFeature(_)));

        let sb = Superblock::decode_unchecked(&raw).expect("diagnostic decode");
        assert_eq!(sb.feature_incompat.unknown_bits(), 1 << 30);
    }

    #[test]
    fn unknown_ro_compat_bit_still_decodes() {
        let mut raw = make_sb();
        raw[0x64..0x68].copy_from_slice(&(1_u32 << 30).to_le_bytes());
        let sb = Superblock::decode(&raw).expect("decode");
        let report = FeatureTable::SUPPORTED.check(sb.feature_set());
        assert!(report.requires_read_only());
    }

    #[test]
    fn decode_from_image_reads_offset_1024() {
        let mut image = vec![0_u8; 4096];
        image[1024..2048].copy_from_slice(&make_sb());
        let sb = Superblock::decode_from_image(&image).expect("decode");
        assert_eq!(sb.inodes_count, 64);

        let err = Superblock::decode_from_image(&image[..1500]).unwrap_err();
        assert!(matches!(err, Ext2Error::CorruptSuperBlock(_)));
    }

    #[test]
    fn encode_rejects_resized_blobs() {
        let mut sb = Superblock::decode(&make_sb()).unwrap();
        sb.reserved.pop();
        assert!(sb.encode().is_err());
    }

    #[test]
    fn serde_round_trip() {
        let sb = Superblock::decode(&make_dynamic_sb(1, 128)).unwrap();
        let json = serde_json::to_string(&sb).expect("serialize");
        let back: Superblock = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, sb);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn encode_reproduces_decoded_region(
            mut raw in proptest::collection::vec(any::<u8>(), EXT2_SUPERBLOCK_SIZE),
            log_block in 0_u32..=6,
            log_frag in 0_i32..=6,
            bpg in 1_u32..,
            ipg in 1_u32..,
            dynamic in any::<bool>(),
        ) {
            raw[0x38..0x3A].copy_from_slice(&EXT2_SUPER_MAGIC.to_le_bytes());
            raw[0x18..0x1C].copy_from_slice(&log_block.to_le_bytes());
            raw[0x1C..0x20].copy_from_slice(&log_frag.to_le_bytes());
            raw[0x20..0x24].copy_from_slice(&bpg.to_le_bytes());
            raw[0x28..0x2C].copy_from_slice(&ipg.to_le_bytes());
            raw[0x4C..0x50].copy_from_slice(&u32::from(dynamic).to_le_bytes());
            raw[0x58..0x5A].copy_from_slice(&128_u16.to_le_bytes());

            let sb = Superblock::decode_unchecked(&raw).expect("decode");
            prop_assert_eq!(sb.block_size(), 1024_u32 << log_block);
            prop_assert_eq!(sb.fragment_size(), 1024_u32 << log_frag);
            let encoded = sb.encode().expect("encode");
            prop_assert_eq!(&encoded[..], &raw[..]);
        }
    }
}
