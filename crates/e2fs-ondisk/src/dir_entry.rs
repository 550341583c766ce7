//! Directory entry records (`ext2_dir_entry_2`).

use e2fs_error::{Ext2Error, Result};
use e2fs_types::{EXT2_MAX_BLOCK_SIZE, align4, read_le_u16, read_le_u32, read_u8};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Fixed header: inode (4), rec_len (2), name_len (1), file type (1).
pub const DIR_ENTRY_HEADER_LEN: usize = 8;

/// Largest record span; stored on disk as 65535 in 64 KiB blocks.
const MAX_REC_SPAN: u32 = 65_536;

fn corrupt(offset: usize, detail: impl Into<String>) -> Ext2Error {
    Ext2Error::CorruptDirectoryEntry {
        offset,
        detail: detail.into(),
    }
}

#[must_use]
fn rec_len_from_disk(raw: u16, block_size: usize) -> u32 {
    if block_size >= MAX_REC_SPAN as usize && (raw == 0 || raw == u16::MAX) {
        MAX_REC_SPAN
    } else {
        u32::from(raw)
    }
}

fn rec_len_to_disk(span: u32, offset: usize) -> Result<u16> {
    match span {
        MAX_REC_SPAN => Ok(u16::MAX),
        _ => u16::try_from(span)
            .map_err(|_| corrupt(offset, format!("rec_len {span} exceeds {MAX_REC_SPAN}"))),
    }
}

// ── File type tag ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum FileType {
    Unknown = 0,
    RegFile = 1,
    Dir = 2,
    Chrdev = 3,
    Blkdev = 4,
    Fifo = 5,
    Sock = 6,
    Symlink = 7,
}

impl FileType {
    #[must_use]
    pub fn from_raw(val: u8) -> Self {
        match val {
            1 => Self::RegFile,
            2 => Self::Dir,
            3 => Self::Chrdev,
            4 => Self::Blkdev,
            5 => Self::Fifo,
            6 => Self::Sock,
            7 => Self::Symlink,
            _ => Self::Unknown,
        }
    }

    /// Tag for an inode mode's `S_IFMT` bits.
    #[must_use]
    pub fn from_mode(mode: u16) -> Self {
        match mode & e2fs_types::S_IFMT {
            e2fs_types::S_IFREG => Self::RegFile,
            e2fs_types::S_IFDIR => Self::Dir,
            e2fs_types::S_IFCHR => Self::Chrdev,
            e2fs_types::S_IFBLK => Self::Blkdev,
            e2fs_types::S_IFIFO => Self::Fifo,
            e2fs_types::S_IFSOCK => Self::Sock,
            e2fs_types::S_IFLNK => Self::Symlink,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub fn raw(self) -> u8 {
        self as u8
    }
}

// ── Entry ───────────────────────────────────────────────────────────────────

/// One directory record. `inode == 0` marks an unused slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub inode: u32,
    /// Bytes spanned by this record, padding included.
    pub rec_len: u32,
    pub name_len: u8,
    /// Raw tag byte; unrecognized values are kept as read.
    pub file_type_raw: u8,
    pub name: Vec<u8>,
    /// Bytes between the name and the end of the record, kept as read.
    /// Empty means zero-filled.
    #[serde(default)]
    pub padding: Vec<u8>,
}

impl DirEntry {
    /// Build a record with the minimum record length for `name`.
    pub fn new(inode: u32, name: &[u8], file_type: FileType) -> Result<Self> {
        let name_len = u8::try_from(name.len()).map_err(|_| Ext2Error::NameTooLong)?;
        let rec_len = u32::try_from(Self::min_rec_len(name.len()))
            .map_err(|_| Ext2Error::NameTooLong)?;
        Ok(Self {
            inode,
            rec_len,
            name_len,
            file_type_raw: file_type.raw(),
            name: name.to_vec(),
            padding: Vec::new(),
        })
    }

    /// `round_up_to_4(name_len + 8)`.
    #[must_use]
    pub fn min_rec_len(name_len: usize) -> usize {
        align4(DIR_ENTRY_HEADER_LEN + name_len)
    }

    /// Bytes this entry needs on disk.
    #[must_use]
    pub fn actual_size(&self) -> usize {
        Self::min_rec_len(usize::from(self.name_len))
    }

    /// Bytes past `actual_size()` still covered by `rec_len`.
    #[must_use]
    pub fn slack(&self) -> usize {
        (self.rec_len as usize).saturating_sub(self.actual_size())
    }

    #[must_use]
    pub fn file_type(&self) -> FileType {
        FileType::from_raw(self.file_type_raw)
    }

    #[must_use]
    pub fn is_unused(&self) -> bool {
        self.inode == 0
    }

    #[must_use]
    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    #[must_use]
    pub fn is_dot(&self) -> bool {
        self.name == b"."
    }

    #[must_use]
    pub fn is_dotdot(&self) -> bool {
        self.name == b".."
    }

    /// Decode the record starting at `offset` of a directory block.
    pub fn decode_at(block: &[u8], offset: usize) -> Result<Self> {
        let remaining = block.len().saturating_sub(offset);
        if remaining < DIR_ENTRY_HEADER_LEN {
            return Err(corrupt(
                offset,
                format!("{remaining} trailing bytes cannot hold a record header"),
            ));
        }
        let err = |e: e2fs_types::ParseError| corrupt(offset, e.to_string());
        let inode = read_le_u32(block, offset).map_err(err)?;
        let rec_len = rec_len_from_disk(read_le_u16(block, offset + 4).map_err(err)?, block.len());
        let name_len = read_u8(block, offset + 6).map_err(err)?;
        let file_type_raw = read_u8(block, offset + 7).map_err(err)?;

        let span = rec_len as usize;
        if span % 4 != 0 {
            return Err(corrupt(offset, format!("rec_len {rec_len} is not a multiple of 4")));
        }
        if span < DIR_ENTRY_HEADER_LEN + usize::from(name_len) {
            return Err(corrupt(
                offset,
                format!("rec_len {rec_len} too small for name_len {name_len}"),
            ));
        }
        if span > remaining {
            return Err(corrupt(
                offset,
                format!("rec_len {rec_len} runs past the block end ({remaining} bytes left)"),
            ));
        }

        let name_start = offset + DIR_ENTRY_HEADER_LEN;
        let name_end = name_start + usize::from(name_len);
        Ok(Self {
            inode,
            rec_len,
            name_len,
            file_type_raw,
            name: block[name_start..name_end].to_vec(),
            padding: block[name_end..offset + span].to_vec(),
        })
    }

    /// Write header, name and `padding` at `offset`.
    ///
    /// `padding` is clipped to the record; span bytes it does not cover are
    /// left alone.
    pub fn write_at(&self, block: &mut [u8], offset: usize) -> Result<()> {
        if self.name.len() != usize::from(self.name_len) {
            return Err(corrupt(
                offset,
                format!(
                    "name_len {} disagrees with {} name bytes",
                    self.name_len,
                    self.name.len()
                ),
            ));
        }
        let span = self.rec_len as usize;
        if span % 4 != 0 || span < self.actual_size() {
            return Err(corrupt(
                offset,
                format!("rec_len {} invalid for name_len {}", self.rec_len, self.name_len),
            ));
        }
        let end = offset
            .checked_add(span)
            .filter(|end| *end <= block.len())
            .ok_or_else(|| corrupt(offset, format!("rec_len {} runs past the block end", self.rec_len)))?;

        let rec_len = rec_len_to_disk(self.rec_len, offset)?;
        let record = &mut block[offset..end];
        record[0..4].copy_from_slice(&self.inode.to_le_bytes());
        record[4..6].copy_from_slice(&rec_len.to_le_bytes());
        record[6] = self.name_len;
        record[7] = self.file_type_raw;
        let name_end = DIR_ENTRY_HEADER_LEN + self.name.len();
        record[DIR_ENTRY_HEADER_LEN..name_end].copy_from_slice(&self.name);
        let tail = &mut record[name_end..];
        let keep = self.padding.len().min(tail.len());
        tail[..keep].copy_from_slice(&self.padding[..keep]);
        Ok(())
    }
}

// ── Block codec ─────────────────────────────────────────────────────────────

/// Decode every record of one directory block, unused slots included.
///
/// The walk ends exactly at the block boundary; the `rec_len` values of the
/// returned records sum to `block.len()`.
pub fn decode_block(block: &[u8]) -> Result<Vec<DirEntry>> {
    let mut entries = Vec::new();
    let mut offset = 0_usize;
    while offset < block.len() {
        let entry = DirEntry::decode_at(block, offset)?;
        offset += entry.rec_len as usize;
        entries.push(entry);
    }
    trace!(
        block_len = block.len(),
        records = entries.len(),
        "decoded directory block"
    );
    Ok(entries)
}

/// Records that name an inode.
pub fn live_entries(entries: &[DirEntry]) -> impl Iterator<Item = &DirEntry> {
    entries.iter().filter(|e| !e.is_unused())
}

/// Serialize records into a fresh zero-filled block.
///
/// Each record keeps its `rec_len` and padding; the final record is
/// stretched to the block end. An empty list yields a single unused record
/// spanning the block.
pub fn encode_block(entries: &[DirEntry], block_size: usize) -> Result<Vec<u8>> {
    let span = u32::try_from(block_size)
        .ok()
        .filter(|s| *s <= EXT2_MAX_BLOCK_SIZE)
        .ok_or_else(|| corrupt(0, format!("block size {block_size} out of range")))?;
    let mut block = vec![0_u8; block_size];
    if entries.is_empty() {
        let empty = DirEntry {
            inode: 0,
            rec_len: span,
            name_len: 0,
            file_type_raw: 0,
            name: Vec::new(),
            padding: Vec::new(),
        };
        empty.write_at(&mut block, 0)?;
        return Ok(block);
    }

    let mut offset = 0_usize;
    let last = entries.len() - 1;
    for (i, entry) in entries.iter().enumerate() {
        if i == last {
            let span = block_size
                .checked_sub(offset)
                .and_then(|s| u32::try_from(s).ok())
                .ok_or_else(|| corrupt(offset, "records overflow the block"))?;
            let mut tail = entry.clone();
            tail.rec_len = span;
            tail.write_at(&mut block, offset)?;
        } else {
            entry.write_at(&mut block, offset)?;
            offset += entry.rec_len as usize;
        }
    }
    Ok(block)
}
