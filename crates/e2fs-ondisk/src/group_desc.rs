//! Block group descriptor table codec.

use crate::superblock::Superblock;
use e2fs_error::{Ext2Error, Result};
use e2fs_types::{
    BlockNumber, EXT2_MIN_DESC_SIZE, EXT2_MIN_DESC_SIZE_64BIT, GroupNumber, ParseError,
    read_fixed, read_le_u16, read_le_u32, write_bytes, write_le_u16, write_le_u32,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Offset of the first byte past the 64-byte layout's named fields.
const EXTENSION_OFFSET: usize = 0x34;

fn corrupt(err: ParseError) -> Ext2Error {
    Ext2Error::CorruptGroupDescriptor(err.to_string())
}

/// How to treat descriptor values that contradict the superblock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strictness {
    /// Log anomalies and keep going.
    #[default]
    Lenient,
    /// Reject the table on the first anomaly.
    Strict,
}

// ── Single descriptor ───────────────────────────────────────────────────────

/// One group descriptor, 32 bytes or `desc_size` bytes with the 64-bit feature.
///
/// High halves are zero for 32-byte descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDescriptor {
    pub block_bitmap_lo: u32,
    pub inode_bitmap_lo: u32,
    pub inode_table_lo: u32,
    pub free_blocks_count_lo: u16,
    pub free_inodes_count_lo: u16,
    pub used_dirs_count_lo: u16,
    pub flags: u16,
    pub reserved: [u8; 8],
    pub itable_unused_lo: u16,
    pub checksum: u16,

    // ── 64-bit layout ────────────────────────────────────────────────────
    pub block_bitmap_hi: u32,
    pub inode_bitmap_hi: u32,
    pub inode_table_hi: u32,
    pub free_blocks_count_hi: u16,
    pub free_inodes_count_hi: u16,
    pub used_dirs_count_hi: u16,
    pub itable_unused_hi: u16,
    /// Bytes from 0x34 to the descriptor size, kept verbatim.
    pub extension: Vec<u8>,

    /// On-disk record size this descriptor was decoded with.
    pub desc_size: u16,
}

impl GroupDescriptor {
    /// Decode one descriptor of `desc_size` bytes from the start of `bytes`.
    pub fn decode(bytes: &[u8], desc_size: u16) -> Result<Self> {
        let size = usize::from(desc_size);
        if desc_size != EXT2_MIN_DESC_SIZE && desc_size < EXT2_MIN_DESC_SIZE_64BIT {
            return Err(corrupt(ParseError::InvalidField {
                field: "s_desc_size",
                reason: "descriptor size must be 32 or >= 64",
            }));
        }
        if bytes.len() < size {
            return Err(corrupt(ParseError::InsufficientData {
                needed: size,
                offset: 0,
                actual: bytes.len(),
            }));
        }

        let mut desc = Self {
            block_bitmap_lo: read_le_u32(bytes, 0x00).map_err(corrupt)?,
            inode_bitmap_lo: read_le_u32(bytes, 0x04).map_err(corrupt)?,
            inode_table_lo: read_le_u32(bytes, 0x08).map_err(corrupt)?,
            free_blocks_count_lo: read_le_u16(bytes, 0x0C).map_err(corrupt)?,
            free_inodes_count_lo: read_le_u16(bytes, 0x0E).map_err(corrupt)?,
            used_dirs_count_lo: read_le_u16(bytes, 0x10).map_err(corrupt)?,
            flags: read_le_u16(bytes, 0x12).map_err(corrupt)?,
            reserved: read_fixed::<8>(bytes, 0x14).map_err(corrupt)?,
            itable_unused_lo: read_le_u16(bytes, 0x1C).map_err(corrupt)?,
            checksum: read_le_u16(bytes, 0x1E).map_err(corrupt)?,
            block_bitmap_hi: 0,
            inode_bitmap_hi: 0,
            inode_table_hi: 0,
            free_blocks_count_hi: 0,
            free_inodes_count_hi: 0,
            used_dirs_count_hi: 0,
            itable_unused_hi: 0,
            extension: Vec::new(),
            desc_size,
        };

        if desc_size >= EXT2_MIN_DESC_SIZE_64BIT {
            desc.block_bitmap_hi = read_le_u32(bytes, 0x20).map_err(corrupt)?;
            desc.inode_bitmap_hi = read_le_u32(bytes, 0x24).map_err(corrupt)?;
            desc.inode_table_hi = read_le_u32(bytes, 0x28).map_err(corrupt)?;
            desc.free_blocks_count_hi = read_le_u16(bytes, 0x2C).map_err(corrupt)?;
            desc.free_inodes_count_hi = read_le_u16(bytes, 0x2E).map_err(corrupt)?;
            desc.used_dirs_count_hi = read_le_u16(bytes, 0x30).map_err(corrupt)?;
            desc.itable_unused_hi = read_le_u16(bytes, 0x32).map_err(corrupt)?;
            desc.extension = bytes[EXTENSION_OFFSET..size].to_vec();
        }

        Ok(desc)
    }

    /// Serialize into the first `desc_size` bytes of `out`.
    pub fn encode_into(&self, out: &mut [u8]) -> Result<()> {
        let size = usize::from(self.desc_size);
        if out.len() < size {
            return Err(corrupt(ParseError::InsufficientData {
                needed: size,
                offset: 0,
                actual: out.len(),
            }));
        }
        if self.desc_size >= EXT2_MIN_DESC_SIZE_64BIT
            && self.extension.len() != size - EXTENSION_OFFSET
        {
            return Err(corrupt(ParseError::InvalidField {
                field: "extension",
                reason: "length does not match descriptor size",
            }));
        }
        self.write_fields(out).map_err(corrupt)
    }

    fn write_fields(&self, out: &mut [u8]) -> std::result::Result<(), ParseError> {
        write_le_u32(out, 0x00, self.block_bitmap_lo)?;
        write_le_u32(out, 0x04, self.inode_bitmap_lo)?;
        write_le_u32(out, 0x08, self.inode_table_lo)?;
        write_le_u16(out, 0x0C, self.free_blocks_count_lo)?;
        write_le_u16(out, 0x0E, self.free_inodes_count_lo)?;
        write_le_u16(out, 0x10, self.used_dirs_count_lo)?;
        write_le_u16(out, 0x12, self.flags)?;
        write_bytes(out, 0x14, &self.reserved)?;
        write_le_u16(out, 0x1C, self.itable_unused_lo)?;
        write_le_u16(out, 0x1E, self.checksum)?;
        if self.desc_size >= EXT2_MIN_DESC_SIZE_64BIT {
            write_le_u32(out, 0x20, self.block_bitmap_hi)?;
            write_le_u32(out, 0x24, self.inode_bitmap_hi)?;
            write_le_u32(out, 0x28, self.inode_table_hi)?;
            write_le_u16(out, 0x2C, self.free_blocks_count_hi)?;
            write_le_u16(out, 0x2E, self.free_inodes_count_hi)?;
            write_le_u16(out, 0x30, self.used_dirs_count_hi)?;
            write_le_u16(out, 0x32, self.itable_unused_hi)?;
            write_bytes(out, EXTENSION_OFFSET, &self.extension)?;
        }
        Ok(())
    }

    /// Serialize into a fresh `desc_size`-byte buffer.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = vec![0_u8; usize::from(self.desc_size)];
        self.encode_into(&mut out)?;
        Ok(out)
    }

    #[must_use]
    pub fn block_bitmap(&self) -> BlockNumber {
        BlockNumber(u64::from(self.block_bitmap_lo) | (u64::from(self.block_bitmap_hi) << 32))
    }

    #[must_use]
    pub fn inode_bitmap(&self) -> BlockNumber {
        BlockNumber(u64::from(self.inode_bitmap_lo) | (u64::from(self.inode_bitmap_hi) << 32))
    }

    #[must_use]
    pub fn inode_table(&self) -> BlockNumber {
        BlockNumber(u64::from(self.inode_table_lo) | (u64::from(self.inode_table_hi) << 32))
    }

    #[must_use]
    pub fn free_blocks_count(&self) -> u32 {
        u32::from(self.free_blocks_count_lo) | (u32::from(self.free_blocks_count_hi) << 16)
    }

    #[must_use]
    pub fn free_inodes_count(&self) -> u32 {
        u32::from(self.free_inodes_count_lo) | (u32::from(self.free_inodes_count_hi) << 16)
    }

    #[must_use]
    pub fn used_dirs_count(&self) -> u32 {
        u32::from(self.used_dirs_count_lo) | (u32::from(self.used_dirs_count_hi) << 16)
    }

    #[must_use]
    pub fn itable_unused(&self) -> u32 {
        u32::from(self.itable_unused_lo) | (u32::from(self.itable_unused_hi) << 16)
    }
}

// ── Anomalies ───────────────────────────────────────────────────────────────

/// A descriptor value that contradicts the superblock geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupAnomaly {
    FreeBlocksExceedCapacity {
        group: GroupNumber,
        free: u32,
        capacity: u32,
    },
    FreeInodesExceedCapacity {
        group: GroupNumber,
        free: u32,
        capacity: u32,
    },
    UsedDirsExceedCapacity {
        group: GroupNumber,
        used: u32,
        capacity: u32,
    },
    LocationOutOfRange {
        group: GroupNumber,
        field: &'static str,
        block: BlockNumber,
        blocks_count: u64,
    },
}

impl fmt::Display for GroupAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FreeBlocksExceedCapacity {
                group,
                free,
                capacity,
            } => write!(
                f,
                "group {group}: free blocks {free} exceed blocks per group {capacity}"
            ),
            Self::FreeInodesExceedCapacity {
                group,
                free,
                capacity,
            } => write!(
                f,
                "group {group}: free inodes {free} exceed inodes per group {capacity}"
            ),
            Self::UsedDirsExceedCapacity {
                group,
                used,
                capacity,
            } => write!(
                f,
                "group {group}: used directories {used} exceed inodes per group {capacity}"
            ),
            Self::LocationOutOfRange {
                group,
                field,
                block,
                blocks_count,
            } => write!(
                f,
                "group {group}: {field} at block {block} is outside the volume ({blocks_count} blocks)"
            ),
        }
    }
}

fn anomalies_of(sb: &Superblock, group: GroupNumber, desc: &GroupDescriptor) -> Vec<GroupAnomaly> {
    let mut out = Vec::new();
    if desc.free_blocks_count() > sb.blocks_per_group {
        out.push(GroupAnomaly::FreeBlocksExceedCapacity {
            group,
            free: desc.free_blocks_count(),
            capacity: sb.blocks_per_group,
        });
    }
    if desc.free_inodes_count() > sb.inodes_per_group {
        out.push(GroupAnomaly::FreeInodesExceedCapacity {
            group,
            free: desc.free_inodes_count(),
            capacity: sb.inodes_per_group,
        });
    }
    if desc.used_dirs_count() > sb.inodes_per_group {
        out.push(GroupAnomaly::UsedDirsExceedCapacity {
            group,
            used: desc.used_dirs_count(),
            capacity: sb.inodes_per_group,
        });
    }
    let blocks_count = sb.blocks_count();
    for (field, block) in [
        ("block_bitmap", desc.block_bitmap()),
        ("inode_bitmap", desc.inode_bitmap()),
        ("inode_table", desc.inode_table()),
    ] {
        if block.0 >= blocks_count {
            out.push(GroupAnomaly::LocationOutOfRange {
                group,
                field,
                block,
                blocks_count,
            });
        }
    }
    out
}

// ── Table ───────────────────────────────────────────────────────────────────

/// The decoded group descriptor table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDescriptorTable {
    descriptors: Vec<GroupDescriptor>,
    desc_size: u16,
    anomalies: Vec<GroupAnomaly>,
}

impl GroupDescriptorTable {
    /// Bytes occupied by the descriptors themselves.
    #[must_use]
    pub fn byte_len(sb: &Superblock) -> usize {
        usize::try_from(sb.group_count())
            .unwrap_or(usize::MAX)
            .saturating_mul(usize::from(sb.group_descriptor_size()))
    }

    /// Decode `sb.group_count()` descriptors from the start of `bytes`.
    ///
    /// `bytes` usually holds the `group_descriptor_table_blocks()` blocks
    /// that follow the superblock's block.
    pub fn decode(sb: &Superblock, bytes: &[u8], strictness: Strictness) -> Result<Self> {
        let count = sb.group_count();
        if count == 0 {
            return Err(Ext2Error::CorruptGroupDescriptor(
                "volume has zero block groups".to_owned(),
            ));
        }
        let inode_slots = u64::from(count) * u64::from(sb.inodes_per_group);
        if inode_slots < u64::from(sb.inodes_count) {
            return Err(Ext2Error::CorruptGroupDescriptor(format!(
                "{count} groups of {} inodes cannot hold {} inodes",
                sb.inodes_per_group, sb.inodes_count
            )));
        }

        let desc_size = sb.group_descriptor_size();
        let needed = Self::byte_len(sb);
        if bytes.len() < needed {
            return Err(corrupt(ParseError::InsufficientData {
                needed,
                offset: 0,
                actual: bytes.len(),
            }));
        }

        let mut descriptors = Vec::with_capacity(needed / usize::from(desc_size));
        let mut anomalies = Vec::new();
        for (index, chunk) in bytes[..needed]
            .chunks_exact(usize::from(desc_size))
            .enumerate()
        {
            let group = GroupNumber(u32::try_from(index).unwrap_or(u32::MAX));
            let desc = GroupDescriptor::decode(chunk, desc_size)?;
            for anomaly in anomalies_of(sb, group, &desc) {
                if strictness == Strictness::Strict {
                    return Err(Ext2Error::CorruptGroupDescriptor(anomaly.to_string()));
                }
                warn!(group = group.0, %anomaly, "group descriptor anomaly");
                anomalies.push(anomaly);
            }
            descriptors.push(desc);
        }

        debug!(
            groups = count,
            desc_size,
            anomalies = anomalies.len(),
            "decoded group descriptor table"
        );
        Ok(Self {
            descriptors,
            desc_size,
            anomalies,
        })
    }

    /// Rewrite every descriptor into `out` at its table offset.
    ///
    /// Bytes past the last descriptor are left untouched.
    pub fn encode_into(&self, out: &mut [u8]) -> Result<()> {
        let size = usize::from(self.desc_size);
        let needed = self.descriptors.len().saturating_mul(size);
        if out.len() < needed {
            return Err(corrupt(ParseError::InsufficientData {
                needed,
                offset: 0,
                actual: out.len(),
            }));
        }
        for (desc, chunk) in self.descriptors.iter().zip(out.chunks_exact_mut(size)) {
            desc.encode_into(chunk)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn get(&self, group: GroupNumber) -> Option<&GroupDescriptor> {
        self.descriptors.get(usize::try_from(group.0).ok()?)
    }

    #[must_use]
    pub fn get_mut(&mut self, group: GroupNumber) -> Option<&mut GroupDescriptor> {
        self.descriptors.get_mut(usize::try_from(group.0).ok()?)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GroupDescriptor> {
        self.descriptors.iter()
    }

    #[must_use]
    pub fn desc_size(&self) -> u16 {
        self.desc_size
    }

    /// Anomalies tolerated under [`Strictness::Lenient`].
    #[must_use]
    pub fn anomalies(&self) -> &[GroupAnomaly] {
        &self.anomalies
    }

    /// Sum of the per-group free block counters.
    #[must_use]
    pub fn total_free_blocks(&self) -> u64 {
        self.descriptors
            .iter()
            .map(|d| u64::from(d.free_blocks_count()))
            .sum()
    }

    /// Sum of the per-group free inode counters.
    #[must_use]
    pub fn total_free_inodes(&self) -> u64 {
        self.descriptors
            .iter()
            .map(|d| u64::from(d.free_inodes_count()))
            .sum()
    }
}
