#![forbid(unsafe_code)]
//! Directory block editing.
//!
//! Linear scan, lookup, entry creation and deletion inside a single
//! directory data block, and `.`/`..` initialization. Record layout and
//! validation come from [`e2fs_ondisk::DirEntry`]; this crate only manages
//! how `rec_len` spans are split and merged.

use e2fs_error::{Ext2Error, Result};
use e2fs_ondisk::{DIR_ENTRY_HEADER_LEN, DirEntry, FileType};
use e2fs_types::EXT2_NAME_LEN;
use tracing::trace;

/// Reject names the on-disk format cannot hold or the path layer would split.
pub fn validate_name(name: &[u8]) -> Result<()> {
    if name.is_empty() {
        return Err(Ext2Error::InvalidName(
            "directory entry name cannot be empty".to_owned(),
        ));
    }
    if name.len() > EXT2_NAME_LEN {
        return Err(Ext2Error::NameTooLong);
    }
    if name.iter().any(|&b| b == 0 || b == b'/') {
        return Err(Ext2Error::InvalidName(format!(
            "{:?} contains NUL or '/'",
            String::from_utf8_lossy(name)
        )));
    }
    Ok(())
}

/// Every record of the block with its byte offset.
fn scan(block: &[u8]) -> Result<Vec<(usize, DirEntry)>> {
    let mut out = Vec::new();
    let mut off = 0_usize;
    while off < block.len() {
        let entry = DirEntry::decode_at(block, off)?;
        let next = off + entry.rec_len as usize;
        out.push((off, entry));
        off = next;
    }
    Ok(out)
}

fn write_entry(
    block: &mut [u8],
    offset: usize,
    ino: u32,
    rec_len: usize,
    file_type: FileType,
    name: &[u8],
) -> Result<()> {
    let mut entry = DirEntry::new(ino, name, file_type)?;
    entry.rec_len = u32::try_from(rec_len).map_err(|_| Ext2Error::CorruptDirectoryEntry {
        offset,
        detail: format!("rec_len {rec_len} exceeds the record span limit"),
    })?;
    entry.write_at(block, offset)?;
    block[offset + DIR_ENTRY_HEADER_LEN + name.len()..offset + rec_len].fill(0);
    Ok(())
}

fn set_rec_len(block: &mut [u8], offset: usize, rec_len: usize) -> Result<()> {
    let mut entry = DirEntry::decode_at(block, offset)?;
    entry.rec_len = u32::try_from(rec_len).map_err(|_| Ext2Error::CorruptDirectoryEntry {
        offset,
        detail: format!("rec_len {rec_len} exceeds the record span limit"),
    })?;
    entry.write_at(block, offset)
}

/// Find a live entry by name.
pub fn lookup_in_block(block: &[u8], name: &[u8]) -> Result<Option<DirEntry>> {
    Ok(scan(block)?
        .into_iter()
        .map(|(_, e)| e)
        .find(|e| !e.is_unused() && e.name == name))
}

/// Add an entry to one directory block.
///
/// Reuses an unused slot (`inode == 0`) that is large enough, otherwise
/// splits the slack off the end of a live record. Returns the byte offset
/// of the new record, or `NoSpace` when neither fits.
pub fn add_entry(block: &mut [u8], ino: u32, name: &[u8], file_type: FileType) -> Result<usize> {
    if ino == 0 {
        return Err(Ext2Error::InvalidName(
            "directory entry cannot point at inode 0".to_owned(),
        ));
    }
    validate_name(name)?;

    let need = DirEntry::min_rec_len(name.len());
    if need > block.len() {
        return Err(Ext2Error::NoSpace);
    }

    for (off, entry) in scan(block)? {
        let rec_len = entry.rec_len as usize;
        if entry.is_unused() {
            if rec_len >= need {
                write_entry(block, off, ino, rec_len, file_type, name)?;
                trace!(ino, offset = off, rec_len, "add_entry reused slot");
                return Ok(off);
            }
            continue;
        }

        let actual = entry.actual_size();
        let slack = entry.slack();
        if slack >= need {
            set_rec_len(block, off, actual)?;
            let new_off = off + actual;
            write_entry(block, new_off, ino, slack, file_type, name)?;
            trace!(ino, offset = new_off, rec_len = slack, "add_entry split slot");
            return Ok(new_off);
        }
    }

    Err(Ext2Error::NoSpace)
}

/// Remove a live entry by name.
///
/// The nearest preceding live record grows to the end of the removed one,
/// swallowing any unused slots in between. With no live record before it the
/// removed record is marked unused instead. Returns `false` when no live
/// entry has that name.
pub fn remove_entry(block: &mut [u8], name: &[u8]) -> Result<bool> {
    validate_name(name)?;

    let mut prev_live: Option<usize> = None;
    for (off, entry) in scan(block)? {
        let end = off + entry.rec_len as usize;
        if entry.is_unused() {
            continue;
        }
        if entry.name == name {
            if let Some(prev_off) = prev_live {
                set_rec_len(block, prev_off, end - prev_off)?;
            }
            block[off..off + 4].fill(0);
            block[off + 6] = 0;
            block[off + 7] = 0;
            trace!(ino = entry.inode, offset = off, merged_into = prev_live, "remove_entry");
            return Ok(true);
        }
        prev_live = Some(off);
    }

    Ok(false)
}

/// Initialize an empty directory block with `.` and `..` entries.
pub fn init_dir_block(block: &mut [u8], self_ino: u32, parent_ino: u32) -> Result<()> {
    let dot_len = DirEntry::min_rec_len(1);
    if block.len() < dot_len + DirEntry::min_rec_len(2) {
        return Err(Ext2Error::NoSpace);
    }
    block.fill(0);

    let dotdot_len = block.len() - dot_len;
    write_entry(block, 0, self_ino, dot_len, FileType::Dir, b".")?;
    write_entry(block, dot_len, parent_ino, dotdot_len, FileType::Dir, b"..")?;
    Ok(())
}

/// Whether the block holds nothing but `.`, `..` and unused records.
pub fn is_empty_dir_block(block: &[u8]) -> Result<bool> {
    Ok(scan(block)?
        .iter()
        .all(|(_, e)| e.is_unused() || e.is_dot() || e.is_dotdot()))
}
