#![forbid(unsafe_code)]
//! Error types for e2fs.
//!
//! # Error Taxonomy
//!
//! e2fs uses a two-layer error model:
//!
//! | Layer | Type | Crate | Purpose |
//! |-------|------|-------|---------|
//! | Parsing | `ParseError` | `e2fs-types` | Byte-level violations (short buffers, bad magic, bad fields) |
//! | Structure | `Ext2Error` | `e2fs-error` (this crate) | Structure-specific failures returned by every public API |
//!
//! ## Mapping Policy: ParseError → Ext2Error
//!
//! `e2fs-error` does not depend on `e2fs-types`. Each codec in `e2fs-ondisk`
//! converts `ParseError` into the kind that names the structure being decoded:
//!
//! | Structure | Ext2Error Variant |
//! |-----------|-------------------|
//! | Superblock | `CorruptSuperBlock` |
//! | Group descriptor table | `CorruptGroupDescriptor` |
//! | Inode record | `CorruptInode` |
//! | Directory block | `CorruptDirectoryEntry` |
//!
//! Bad data reached through the block reader (an index block pointing past
//! the end of the volume, a short index block) is reported as `Corruption`
//! with the offending block number.
//!
//! ## errno Mapping
//!
//! Every variant maps to exactly one POSIX errno via [`Ext2Error::to_errno`].
//! The mapping has no wildcard arms.
//!
//! | Variant | errno |
//! |---------|-------|
//! | `Io` | raw OS error, else `EIO` |
//! | `CorruptSuperBlock` | `EINVAL` |
//! | `UnsupportedFeature` | `EOPNOTSUPP` |
//! | `CorruptGroupDescriptor` | `EIO` |
//! | `CorruptInode` | `EIO` |
//! | `BlockIndexOutOfRange` | `EFBIG` |
//! | `CorruptDirectoryEntry` | `EIO` |
//! | `Corruption` | `EIO` |
//! | `InodeOutOfRange` | `EINVAL` |
//! | `NotDirectory` | `ENOTDIR` |
//! | `NotFound` | `ENOENT` |
//! | `NameTooLong` | `ENAMETOOLONG` |
//! | `InvalidName` | `EINVAL` |
//! | `NoSpace` | `ENOSPC` |
//! | `ReadOnly` | `EROFS` |

use thiserror::Error;

/// Unified error type for all e2fs operations.
#[derive(Debug, Error)]
pub enum Ext2Error {
    /// Operating system I/O error from the block source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The superblock is missing, truncated, or structurally invalid.
    #[error("corrupt superblock: {0}")]
    CorruptSuperBlock(String),

    /// The volume uses an incompatible feature (or revision) this build cannot interpret.
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// The group descriptor table is truncated or inconsistent.
    #[error("corrupt group descriptor: {0}")]
    CorruptGroupDescriptor(String),

    /// An inode record is truncated or malformed.
    #[error("corrupt inode: {0}")]
    CorruptInode(String),

    /// Logical block index beyond the triple-indirect capacity.
    #[error("logical block {index} out of range (capacity {capacity})")]
    BlockIndexOutOfRange { index: u64, capacity: u64 },

    /// A directory record violates the record-length rules.
    #[error("corrupt directory entry at offset {offset}: {detail}")]
    CorruptDirectoryEntry { offset: usize, detail: String },

    /// Metadata read through the block reader is invalid.
    #[error("corrupt metadata at block {block}: {detail}")]
    Corruption { block: u64, detail: String },

    /// Inode number 0 or above the volume's inode count.
    #[error("inode {ino} out of range (1..={max})")]
    InodeOutOfRange { ino: u32, max: u32 },

    /// A directory operation was attempted on a non-directory inode.
    #[error("not a directory")]
    NotDirectory,

    /// Named entry not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Name exceeds 255 bytes.
    #[error("name too long")]
    NameTooLong,

    /// Empty name or a name containing NUL or '/'.
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// No room left in a directory block.
    #[error("no space left in block")]
    NoSpace,

    /// The volume carries unknown read-only-compatible features.
    #[error("read-only filesystem")]
    ReadOnly,
}

impl Ext2Error {
    /// Convert this error into a POSIX errno.
    ///
    /// - `CorruptSuperBlock` → `EINVAL`: the image is not a usable ext2 volume.
    /// - `BlockIndexOutOfRange` → `EFBIG`: the offset lies past the largest
    ///   file the pointer tree can address.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::CorruptSuperBlock(_) | Self::InodeOutOfRange { .. } | Self::InvalidName(_) => {
                libc::EINVAL
            }
            Self::UnsupportedFeature(_) => libc::EOPNOTSUPP,
            Self::CorruptGroupDescriptor(_)
            | Self::CorruptInode(_)
            | Self::CorruptDirectoryEntry { .. }
            | Self::Corruption { .. } => libc::EIO,
            Self::BlockIndexOutOfRange { .. } => libc::EFBIG,
            Self::NotDirectory => libc::ENOTDIR,
            Self::NotFound(_) => libc::ENOENT,
            Self::NameTooLong => libc::ENAMETOOLONG,
            Self::NoSpace => libc::ENOSPC,
            Self::ReadOnly => libc::EROFS,
        }
    }

    /// Whether the error reports damaged on-disk data (as opposed to a
    /// caller mistake or an unsupported volume).
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::CorruptSuperBlock(_)
                | Self::CorruptGroupDescriptor(_)
                | Self::CorruptInode(_)
                | Self::CorruptDirectoryEntry { .. }
                | Self::Corruption { .. }
        )
    }
}

/// Result alias using `Ext2Error`.
pub type Result<T> = std::result::Result<T, Ext2Error>;
