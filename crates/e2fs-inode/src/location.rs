use e2fs_block::BlockReader;
use e2fs_error::{Ext2Error, Result};
use e2fs_ondisk::{GroupDescriptorTable, Inode, Superblock};
use e2fs_types::{BlockNumber, GroupNumber, InodeNumber, inode_index_in_group, inode_to_group};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Where an inode record lives on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeLocation {
    pub group: GroupNumber,
    /// Index within the group's inode table.
    pub index: u32,
    /// Inode table block holding the record.
    pub block: BlockNumber,
    /// Byte offset of the record inside `block`.
    pub offset: usize,
}

/// Compute the table block and offset of `ino`.
pub fn locate_inode(
    sb: &Superblock,
    gdt: &GroupDescriptorTable,
    ino: InodeNumber,
) -> Result<InodeLocation> {
    if ino.0 == 0 || ino.0 > sb.inodes_count {
        return Err(Ext2Error::InodeOutOfRange {
            ino: ino.0,
            max: sb.inodes_count,
        });
    }

    let group = inode_to_group(ino, sb.inodes_per_group);
    let index = inode_index_in_group(ino, sb.inodes_per_group);
    let desc = gdt.get(group).ok_or_else(|| {
        Ext2Error::CorruptGroupDescriptor(format!("no descriptor for group {group}"))
    })?;

    let block_size = u64::from(sb.block_size());
    let byte_in_table = u64::from(index) * u64::from(sb.inode_size());
    let table = desc.inode_table();
    let block = table
        .checked_add(byte_in_table / block_size)
        .filter(|b| b.0 < sb.blocks_count())
        .ok_or_else(|| Ext2Error::Corruption {
            block: table.0,
            detail: format!("inode table of group {group} runs past the volume end"),
        })?;
    let offset = usize::try_from(byte_in_table % block_size)
        .map_err(|_| Ext2Error::CorruptInode("inode offset does not fit usize".to_owned()))?;

    Ok(InodeLocation {
        group,
        index,
        block,
        offset,
    })
}

/// Fetch and decode inode `ino`.
pub fn read_inode<R: BlockReader + ?Sized>(
    reader: &R,
    sb: &Superblock,
    gdt: &GroupDescriptorTable,
    ino: InodeNumber,
) -> Result<Inode> {
    let loc = locate_inode(sb, gdt, ino)?;
    let buf = reader.read_block(loc.block)?;
    let record = buf
        .as_slice()
        .get(loc.offset..loc.offset + usize::from(sb.inode_size()))
        .ok_or_else(|| Ext2Error::Corruption {
            block: loc.block.0,
            detail: format!("inode {ino} record cut short by a {}-byte block", buf.len()),
        })?;
    let inode = Inode::decode(record)?;
    debug!(
        ino = ino.0,
        group = loc.group.0,
        block = loc.block.0,
        offset = loc.offset,
        mode = inode.mode,
        "read inode"
    );
    Ok(inode)
}
