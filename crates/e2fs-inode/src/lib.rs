#![forbid(unsafe_code)]
//! Inode location and block address resolution.
//!
//! [`locate_inode`] turns an inode number into a block and byte offset in
//! its group's inode table. [`BlockMap`] walks the 15-entry pointer array
//! (12 direct, then single, double and triple indirect) to map logical file
//! blocks to physical ones, fetching index blocks through a
//! [`BlockReader`](e2fs_block::BlockReader).

mod block_map;
mod location;

pub use block_map::{BlockMap, BlockMapping, BlockPath, max_logical_blocks};
pub use location::{InodeLocation, locate_inode, read_inode};
