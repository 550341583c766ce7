#![forbid(unsafe_code)]
//! Shared unit types, byte-level parse errors, and on-disk constants for the
//! ext2 family.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const EXT2_SUPERBLOCK_OFFSET: usize = 1024;
pub const EXT2_SUPERBLOCK_SIZE: usize = 1024;
pub const EXT2_SUPER_MAGIC: u16 = 0xEF53;

/// Smallest and largest block-size exponents (`1 << 10` .. `1 << 16`).
pub const EXT2_MIN_BLOCK_LOG_SIZE: u32 = 10;
pub const EXT2_MAX_BLOCK_LOG_SIZE: u32 = 16;
pub const EXT2_MIN_BLOCK_SIZE: u32 = 1 << EXT2_MIN_BLOCK_LOG_SIZE;
pub const EXT2_MAX_BLOCK_SIZE: u32 = 1 << EXT2_MAX_BLOCK_LOG_SIZE;

/// Inode record size used by revision 0 ("good old") filesystems.
pub const EXT2_GOOD_OLD_INODE_SIZE: u16 = 128;
/// First non-reserved inode on revision 0 filesystems.
pub const EXT2_GOOD_OLD_FIRST_INO: u32 = 11;

/// Group descriptor sizes.
pub const EXT2_MIN_DESC_SIZE: u16 = 32;
pub const EXT2_MIN_DESC_SIZE_64BIT: u16 = 64;

/// Block pointer layout of an inode (`i_block`).
pub const EXT2_NDIR_BLOCKS: usize = 12;
pub const EXT2_IND_BLOCK: usize = EXT2_NDIR_BLOCKS;
pub const EXT2_DIND_BLOCK: usize = EXT2_IND_BLOCK + 1;
pub const EXT2_TIND_BLOCK: usize = EXT2_DIND_BLOCK + 1;
pub const EXT2_N_BLOCKS: usize = EXT2_TIND_BLOCK + 1;

/// Maximum directory entry name length.
pub const EXT2_NAME_LEN: usize = 255;
/// Maximum hard link count.
pub const EXT2_LINK_MAX: u16 = 65_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockNumber(pub u64);

/// ext2 inode number (u32, 1-indexed; 0 never names an inode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InodeNumber(pub u32);

impl InodeNumber {
    /// Bad blocks inode.
    pub const BAD_BLOCKS: Self = Self(1);
    /// Root directory inode.
    pub const ROOT: Self = Self(2);
    /// ACL index inode.
    pub const ACL_INDEX: Self = Self(3);
    /// ACL data inode.
    pub const ACL_DATA: Self = Self(4);
    /// Boot loader inode.
    pub const BOOT_LOADER: Self = Self(5);
    /// Undelete directory inode.
    pub const UNDELETE_DIR: Self = Self(6);
    /// Reserved group descriptors inode (online resize).
    pub const RESIZE: Self = Self(7);
    /// Journal inode.
    pub const JOURNAL: Self = Self(8);
    /// First usable inode on revision 0 filesystems.
    pub const FIRST_USABLE: Self = Self(EXT2_GOOD_OLD_FIRST_INO);
}

/// Validated block size (must be a power of two in 1024..=65536).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockSize(u32);

impl BlockSize {
    /// Create a `BlockSize` if `value` is a power of two in [1024, 65536].
    pub fn new(value: u32) -> Result<Self, ParseError> {
        if !value.is_power_of_two() || !(EXT2_MIN_BLOCK_SIZE..=EXT2_MAX_BLOCK_SIZE).contains(&value)
        {
            return Err(ParseError::InvalidField {
                field: "block_size",
                reason: "must be power of two in 1024..=65536",
            });
        }
        Ok(Self(value))
    }

    /// Build a `BlockSize` from the superblock's `s_log_block_size` exponent.
    pub fn from_log(log_block_size: u32) -> Result<Self, ParseError> {
        let value = block_size_from_log(log_block_size).ok_or(ParseError::InvalidField {
            field: "s_log_block_size",
            reason: "invalid shift",
        })?;
        Self::new(value)
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }
}

/// Block group index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupNumber(pub u32);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid magic: expected {expected:#x}, got {actual:#x}")]
    InvalidMagic { expected: u64, actual: u64 },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("integer conversion failed: {field}")]
    IntegerConversion { field: &'static str },
}

// ── Little-endian field access ──────────────────────────────────────────────

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
pub fn ensure_slice_mut(data: &mut [u8], offset: usize, len: usize) -> Result<&mut [u8], ParseError> {
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
pub fn read_u8(data: &[u8], offset: usize) -> Result<u8, ParseError> {
    Ok(ensure_slice(data, offset, 1)?[0])
}

#[inline]
pub fn read_le_u16(data: &[u8], offset: usize) -> Result<u16, ParseError> {
    let bytes = ensure_slice(data, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn read_le_u64(data: &[u8], offset: usize) -> Result<u64, ParseError> {
    let bytes = ensure_slice(data, offset, 8)?;
    Ok(u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]))
}

#[inline]
pub fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N], ParseError> {
    let bytes = ensure_slice(data, offset, N)?;
    let mut out = [0_u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

#[inline]
pub fn write_u8(data: &mut [u8], offset: usize, value: u8) -> Result<(), ParseError> {
    ensure_slice_mut(data, offset, 1)?[0] = value;
    Ok(())
}

#[inline]
pub fn write_le_u16(data: &mut [u8], offset: usize, value: u16) -> Result<(), ParseError> {
    ensure_slice_mut(data, offset, 2)?.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

#[inline]
pub fn write_le_u32(data: &mut [u8], offset: usize, value: u32) -> Result<(), ParseError> {
    ensure_slice_mut(data, offset, 4)?.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

#[inline]
pub fn write_le_u64(data: &mut [u8], offset: usize, value: u64) -> Result<(), ParseError> {
    ensure_slice_mut(data, offset, 8)?.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// Copy `bytes` to `offset`; `bytes.len()` decides the width.
#[inline]
pub fn write_bytes(data: &mut [u8], offset: usize, bytes: &[u8]) -> Result<(), ParseError> {
    ensure_slice_mut(data, offset, bytes.len())?.copy_from_slice(bytes);
    Ok(())
}

#[must_use]
pub fn trim_nul_padded(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_owned()
}

/// `1024 << log_block_size`, or `None` when the shift overflows `u32`.
#[must_use]
pub fn block_size_from_log(log_block_size: u32) -> Option<u32> {
    let shift = EXT2_MIN_BLOCK_LOG_SIZE.checked_add(log_block_size)?;
    1_u32.checked_shl(shift)
}

/// Round `len` up to the 4-byte directory record alignment.
#[must_use]
pub fn align4(len: usize) -> usize {
    (len + 3) & !3
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for InodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BlockSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for GroupNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── POSIX file mode constants ────────────────────────────────────────────────

/// File type mask (upper 4 bits of mode).
pub const S_IFMT: u16 = 0o170_000;
/// Named pipe (FIFO).
pub const S_IFIFO: u16 = 0o010_000;
/// Character device.
pub const S_IFCHR: u16 = 0o020_000;
/// Directory.
pub const S_IFDIR: u16 = 0o040_000;
/// Block device.
pub const S_IFBLK: u16 = 0o060_000;
/// Regular file.
pub const S_IFREG: u16 = 0o100_000;
/// Symbolic link.
pub const S_IFLNK: u16 = 0o120_000;
/// Socket.
pub const S_IFSOCK: u16 = 0o140_000;

// ── ext2 inode flags (i_flags) ──────────────────────────────────────────────

/// Immutable file.
pub const EXT2_IMMUTABLE_FL: u32 = 0x0000_0010;
/// Append-only file.
pub const EXT2_APPEND_FL: u32 = 0x0000_0020;
/// Hash-indexed directory.
pub const EXT2_INDEX_FL: u32 = 0x0000_1000;
/// Inode uses extents instead of block pointers.
pub const EXT2_EXTENTS_FL: u32 = 0x0008_0000;

/// Maximum fast symlink target size (stored in the inode's `i_block` area).
pub const EXT2_FAST_SYMLINK_MAX: usize = EXT2_N_BLOCKS * 4;

// ── Checked arithmetic helpers ──────────────────────────────────────────────

impl BlockNumber {
    /// Add a block count, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, count: u64) -> Option<Self> {
        self.0.checked_add(count).map(Self)
    }
}

/// Compute the inode's block group from its inode number.
///
/// Inode numbers are 1-indexed; group assignment uses `(ino - 1) / inodes_per_group`.
#[must_use]
pub fn inode_to_group(ino: InodeNumber, inodes_per_group: u32) -> GroupNumber {
    GroupNumber(ino.0.saturating_sub(1) / inodes_per_group)
}

/// Compute the index of an inode within its block group.
#[must_use]
pub fn inode_index_in_group(ino: InodeNumber, inodes_per_group: u32) -> u32 {
    ino.0.saturating_sub(1) % inodes_per_group
}
