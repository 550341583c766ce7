#![forbid(unsafe_code)]
//! On-disk format codecs for ext2-family volumes.
//!
//! Pure parsing crate with no I/O. Decodes byte slices into typed
//! structures (superblock, group descriptors, inodes, directory entries)
//! and encodes them back byte-exactly, including reserved regions.

pub mod dir_entry;
pub mod features;
pub mod group_desc;
pub mod inode;
pub mod superblock;

pub use dir_entry::{DIR_ENTRY_HEADER_LEN, DirEntry, FileType, decode_block, encode_block, live_entries};
pub use features::{
    CompatFeatures, FeatureReport, FeatureSet, FeatureTable, IncompatFeatures, RoCompatFeatures,
};
pub use group_desc::{GroupAnomaly, GroupDescriptor, GroupDescriptorTable, Strictness};
pub use inode::Inode;
pub use superblock::{CreatorOs, ErrorBehavior, FileSystemState, Revision, Superblock};
