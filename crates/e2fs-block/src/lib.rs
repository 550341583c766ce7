#![forbid(unsafe_code)]
//! Block-read capability for the e2fs codecs.
//!
//! The decoders never perform I/O on their own. Anything that needs more
//! than the bytes it was handed (the block address resolver, the volume
//! facade) goes through [`BlockReader`]. This crate provides that trait, an
//! adapter from byte-addressed devices, and an in-memory device for tests and
//! benchmarks.

use e2fs_error::{Ext2Error, Result};
use e2fs_types::{BlockNumber, EXT2_SUPERBLOCK_OFFSET, EXT2_SUPERBLOCK_SIZE};
use parking_lot::Mutex;
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

/// Owned block buffer.
///
/// Invariant: length == reader block size for the originating reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBuf {
    bytes: Vec<u8>,
}

impl BlockBuf {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.bytes
    }
}

impl AsRef<[u8]> for BlockBuf {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

// ── Byte devices ────────────────────────────────────────────────────────────

/// Byte-addressed device for fixed-offset reads (pread semantics).
pub trait ByteDevice: Send + Sync {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Read exactly `buf.len()` bytes from `offset` into `buf`.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;
}

fn to_index(value: u64) -> Result<usize> {
    usize::try_from(value).map_err(|_| Ext2Error::Io(std::io::Error::other("offset overflows usize")))
}

fn checked_range_end(offset: u64, len: usize, dev_len: u64) -> Result<u64> {
    let len = u64::try_from(len).map_err(|_| {
        Ext2Error::Io(std::io::Error::other("read length overflows u64"))
    })?;
    let end = offset
        .checked_add(len)
        .ok_or_else(|| Ext2Error::Io(std::io::Error::other("read range overflows u64")))?;
    if end > dev_len {
        return Err(Ext2Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("read out of bounds: offset={offset} len={len} device_len={dev_len}"),
        )));
    }
    Ok(end)
}

/// Read-only file-backed byte device using `pread`.
///
/// `std::os::unix::fs::FileExt` is thread-safe and does not require a shared
/// seek position.
#[derive(Debug, Clone)]
pub struct FileByteDevice {
    file: Arc<File>,
    len: u64,
}

impl FileByteDevice {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(file),
            len,
        })
    }
}

impl ByteDevice for FileByteDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        checked_range_end(offset, buf.len(), self.len)?;
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }
}

/// In-memory byte device.
///
/// Used to build volume images in tests and benchmarks; `write_all_at` is
/// an inherent method, not part of [`ByteDevice`].
#[derive(Debug, Default)]
pub struct MemoryByteDevice {
    bytes: Mutex<Vec<u8>>,
}

impl MemoryByteDevice {
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            bytes: Mutex::new(vec![0_u8; len]),
        }
    }

    #[must_use]
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Mutex::new(bytes),
        }
    }

    /// Overwrite `buf.len()` bytes at `offset`.
    pub fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut bytes = self.bytes.lock();
        let dev_len = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
        let end = checked_range_end(offset, buf.len(), dev_len)?;
        bytes[to_index(offset)?..to_index(end)?].copy_from_slice(buf);
        drop(bytes);
        Ok(())
    }

    /// Copy of the whole image.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }
}

impl ByteDevice for MemoryByteDevice {
    fn len_bytes(&self) -> u64 {
        u64::try_from(self.bytes.lock().len()).unwrap_or(u64::MAX)
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let bytes = self.bytes.lock();
        let dev_len = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
        let end = checked_range_end(offset, buf.len(), dev_len)?;
        buf.copy_from_slice(&bytes[to_index(offset)?..to_index(end)?]);
        drop(bytes);
        Ok(())
    }
}

impl<D: ByteDevice + ?Sized> ByteDevice for Arc<D> {
    fn len_bytes(&self) -> u64 {
        (**self).len_bytes()
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_exact_at(offset, buf)
    }
}

/// Read the superblock region (1024 bytes at offset 1024).
pub fn read_superblock_region(dev: &dyn ByteDevice) -> Result<[u8; EXT2_SUPERBLOCK_SIZE]> {
    let mut buf = [0_u8; EXT2_SUPERBLOCK_SIZE];
    let offset = u64::try_from(EXT2_SUPERBLOCK_OFFSET).map_err(|_| {
        Ext2Error::Io(std::io::Error::other("superblock offset does not fit u64"))
    })?;
    dev.read_exact_at(offset, &mut buf)?;
    Ok(buf)
}

// ── Block readers ───────────────────────────────────────────────────────────

/// Block-addressed read capability injected into the resolver and volume.
///
/// Each call is synchronous; implementations decide their own caching.
pub trait BlockReader: Send + Sync {
    /// Block size in bytes.
    fn block_size(&self) -> u32;

    /// Total number of blocks.
    fn block_count(&self) -> u64;

    /// Read a block by number. The returned buffer is exactly `block_size()` bytes.
    fn read_block(&self, block: BlockNumber) -> Result<BlockBuf>;
}

impl<R: BlockReader + ?Sized> BlockReader for &R {
    fn block_size(&self) -> u32 {
        (**self).block_size()
    }

    fn block_count(&self) -> u64 {
        (**self).block_count()
    }

    fn read_block(&self, block: BlockNumber) -> Result<BlockBuf> {
        (**self).read_block(block)
    }
}

impl<R: BlockReader + ?Sized> BlockReader for Arc<R> {
    fn block_size(&self) -> u32 {
        (**self).block_size()
    }

    fn block_count(&self) -> u64 {
        (**self).block_count()
    }

    fn read_block(&self, block: BlockNumber) -> Result<BlockBuf> {
        (**self).read_block(block)
    }
}

/// [`BlockReader`] over a [`ByteDevice`].
///
/// A trailing partial block is not addressable.
#[derive(Debug)]
pub struct ByteBlockReader<D: ByteDevice> {
    inner: D,
    block_size: u32,
    block_count: u64,
}

impl<D: ByteDevice> ByteBlockReader<D> {
    pub fn new(inner: D, block_size: u32) -> Result<Self> {
        if block_size == 0 || !block_size.is_power_of_two() {
            return Err(Ext2Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid block_size={block_size} (must be power of two)"),
            )));
        }

        let block_count = inner.len_bytes() / u64::from(block_size);
        Ok(Self {
            inner,
            block_size,
            block_count,
        })
    }

    #[must_use]
    pub fn inner(&self) -> &D {
        &self.inner
    }

    #[must_use]
    pub fn into_inner(self) -> D {
        self.inner
    }
}

impl<D: ByteDevice> BlockReader for ByteBlockReader<D> {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn read_block(&self, block: BlockNumber) -> Result<BlockBuf> {
        if block.0 >= self.block_count {
            return Err(Ext2Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "block out of range: block={} block_count={}",
                    block.0, self.block_count
                ),
            )));
        }

        let offset = block
            .0
            .checked_mul(u64::from(self.block_size))
            .ok_or_else(|| Ext2Error::Io(std::io::Error::other("block offset overflow")))?;
        let len = usize::try_from(self.block_size)
            .map_err(|_| Ext2Error::Io(std::io::Error::other("block_size does not fit usize")))?;
        let mut buf = vec![0_u8; len];
        self.inner.read_exact_at(offset, &mut buf)?;
        trace!(block = block.0, offset, "read_block");
        Ok(BlockBuf::new(buf))
    }
}

/// Read the superblock region through a [`BlockReader`].
///
/// With 1 KiB blocks the superblock is block 1; with larger blocks it sits at
/// byte 1024 of block 0.
pub fn read_superblock_via_blocks(reader: &dyn BlockReader) -> Result<Vec<u8>> {
    let block_size = usize::try_from(reader.block_size())
        .map_err(|_| Ext2Error::Io(std::io::Error::other("block_size does not fit usize")))?;
    if block_size < EXT2_SUPERBLOCK_SIZE {
        return Err(Ext2Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("block_size={block_size} is smaller than the superblock"),
        )));
    }

    let block = EXT2_SUPERBLOCK_OFFSET / block_size;
    let within = EXT2_SUPERBLOCK_OFFSET % block_size;
    let block = u64::try_from(block)
        .map_err(|_| Ext2Error::Io(std::io::Error::other("block index overflows u64")))?;
    let buf = reader.read_block(BlockNumber(block))?;
    let bytes = buf
        .as_slice()
        .get(within..within + EXT2_SUPERBLOCK_SIZE)
        .ok_or_else(|| Ext2Error::CorruptSuperBlock("short superblock block".to_owned()))?;
    Ok(bytes.to_vec())
}
