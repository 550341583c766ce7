#![forbid(unsafe_code)]
//! ext2 on-disk core.
//!
//! Re-exports the volume API from `e2fs-core` together with the codec,
//! resolver and directory crates it is built on. Downstream users depend on
//! this crate alone.

pub use e2fs_core::*;
pub use e2fs_core::error::{Ext2Error, Result};
pub use e2fs_core::types::{BlockNumber, GroupNumber, InodeNumber};
