#![forbid(unsafe_code)]
//! Read-side ext2 volume.
//!
//! [`Ext2Volume`] wires the codecs together over an injected
//! [`BlockReader`]: superblock, feature gate, group descriptor table, inode
//! lookup, block address resolution and directory reads. It never caches
//! data blocks; every call goes back to the reader.

use e2fs_block::{BlockReader, read_superblock_via_blocks};
use e2fs_error::{Ext2Error, Result};
use e2fs_inode::{BlockMap, BlockMapping};
use e2fs_ondisk::{
    DirEntry, FeatureReport, FeatureTable, GroupDescriptor, GroupDescriptorTable, Inode,
    Strictness, Superblock, decode_block, live_entries,
};
use e2fs_types::{GroupNumber, InodeNumber};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use e2fs_block as block;
pub use e2fs_dir as dir;
pub use e2fs_error as error;
pub use e2fs_inode as inode;
pub use e2fs_ondisk as ondisk;
pub use e2fs_types as types;

/// Options controlling how a volume is opened.
///
/// By default the feature gate is enforced and group descriptor anomalies
/// are only logged. Disable the feature gate only for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOptions {
    /// How group descriptor anomalies are treated.
    #[serde(default)]
    pub strictness: Strictness,
    /// Feature bits considered understood.
    #[serde(default)]
    pub feature_table: FeatureTable,
    /// Open even when unknown incompatible features are set.
    #[serde(default)]
    pub skip_feature_check: bool,
}

/// Geometry derived from the superblock, recomputed on each request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2Geometry {
    pub block_size: u32,
    pub blocks_count: u64,
    pub inodes_count: u32,
    pub inodes_per_group: u32,
    pub first_ino: u32,
    pub inode_size: u16,
    pub groups_count: u32,
    pub group_desc_size: u16,
    pub addresses_per_block: u32,
    pub is_64bit: bool,
}

impl Ext2Geometry {
    #[must_use]
    pub fn from_superblock(sb: &Superblock) -> Self {
        Self {
            block_size: sb.block_size(),
            blocks_count: sb.blocks_count(),
            inodes_count: sb.inodes_count,
            inodes_per_group: sb.inodes_per_group,
            first_ino: sb.first_inode_index(),
            inode_size: sb.inode_size(),
            groups_count: sb.group_count(),
            group_desc_size: sb.group_descriptor_size(),
            addresses_per_block: sb.addresses_per_block(),
            is_64bit: sb.is_64bit(),
        }
    }
}

/// An opened ext2 volume.
pub struct Ext2Volume<R: BlockReader> {
    reader: R,
    sb: Superblock,
    gdt: GroupDescriptorTable,
    features: FeatureReport,
}

impl<R: BlockReader> std::fmt::Debug for Ext2Volume<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ext2Volume")
            .field("geometry", &self.geometry())
            .field("features", &self.features)
            .field("reader_blocks", &self.reader.block_count())
            .finish_non_exhaustive()
    }
}

impl<R: BlockReader> Ext2Volume<R> {
    /// Open with default options.
    pub fn open(reader: R) -> Result<Self> {
        Self::open_with_options(reader, &OpenOptions::default())
    }

    pub fn open_with_options(reader: R, options: &OpenOptions) -> Result<Self> {
        let region = read_superblock_via_blocks(&reader)?;
        let sb = Superblock::decode_unchecked(&region)?;

        let features = options.feature_table.check(sb.feature_set());
        if options.skip_feature_check {
            if !features.is_mountable() {
                warn!(%features, "feature gate skipped");
            }
        } else {
            features.ensure_mountable()?;
        }

        if reader.block_size() != sb.block_size() {
            return Err(Ext2Error::CorruptSuperBlock(format!(
                "reader block size {} differs from superblock block size {}",
                reader.block_size(),
                sb.block_size()
            )));
        }
        if sb.blocks_count() > reader.block_count() {
            warn!(
                blocks_count = sb.blocks_count(),
                device_blocks = reader.block_count(),
                "device is shorter than the volume"
            );
        }

        let start = sb.group_descriptor_table_block();
        let mut table = Vec::new();
        for i in 0..u64::from(sb.group_descriptor_table_blocks()) {
            let block = start.checked_add(i).ok_or_else(|| {
                Ext2Error::CorruptGroupDescriptor("table block number overflows".to_owned())
            })?;
            table.extend_from_slice(reader.read_block(block)?.as_slice());
        }
        let gdt = GroupDescriptorTable::decode(&sb, &table, options.strictness)?;

        let geometry = Ext2Geometry::from_superblock(&sb);
        info!(
            block_size = geometry.block_size,
            blocks = geometry.blocks_count,
            inodes = geometry.inodes_count,
            groups = geometry.groups_count,
            read_only = features.requires_read_only(),
            "opened ext2 volume"
        );
        Ok(Self {
            reader,
            sb,
            gdt,
            features,
        })
    }

    // ── Metadata ─────────────────────────────────────────────────────────

    #[must_use]
    pub fn superblock(&self) -> &Superblock {
        &self.sb
    }

    #[must_use]
    pub fn geometry(&self) -> Ext2Geometry {
        Ext2Geometry::from_superblock(&self.sb)
    }

    #[must_use]
    pub fn feature_report(&self) -> &FeatureReport {
        &self.features
    }

    /// Unknown read-only-compatible features are present.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.features.requires_read_only()
    }

    /// `ReadOnly` when the volume must not be modified.
    pub fn ensure_writable(&self) -> Result<()> {
        self.features.ensure_writable()
    }

    #[must_use]
    pub fn group_descriptors(&self) -> &GroupDescriptorTable {
        &self.gdt
    }

    #[must_use]
    pub fn group_desc(&self, group: GroupNumber) -> Option<&GroupDescriptor> {
        self.gdt.get(group)
    }

    #[must_use]
    pub fn reader(&self) -> &R {
        &self.reader
    }

    // ── Inodes and data ──────────────────────────────────────────────────

    pub fn read_inode(&self, ino: InodeNumber) -> Result<Inode> {
        e2fs_inode::read_inode(&self.reader, &self.sb, &self.gdt, ino)
    }

    pub fn block_map<'a>(&'a self, inode: &Inode) -> Result<BlockMap<'a, R>> {
        BlockMap::new(&self.reader, &self.sb, inode)
    }

    /// Map one logical block of `inode`.
    pub fn resolve(&self, inode: &Inode, logical: u64) -> Result<BlockMapping> {
        self.block_map(inode)?.resolve(logical)
    }

    /// Read an inode's whole contents; holes read as zeros.
    pub fn read_file(&self, inode: &Inode) -> Result<Vec<u8>> {
        if let Some(target) = inode.fast_symlink_target(self.sb.block_size()) {
            return Ok(target);
        }
        let map = self.block_map(inode)?;
        let size = usize::try_from(inode.size())
            .map_err(|_| Ext2Error::CorruptInode(format!("size {} too large", inode.size())))?;
        let block_size = usize::try_from(self.sb.block_size())
            .map_err(|_| Ext2Error::CorruptSuperBlock("block size does not fit usize".into()))?;

        let mut out = Vec::new();
        for mapping in map.data_blocks() {
            match mapping? {
                BlockMapping::Mapped(block) => {
                    out.extend_from_slice(self.reader.read_block(block)?.as_slice());
                }
                BlockMapping::Hole => out.resize(out.len() + block_size, 0),
            }
        }
        out.truncate(size);
        Ok(out)
    }

    /// Target of a symbolic link.
    pub fn read_link(&self, ino: InodeNumber) -> Result<Vec<u8>> {
        let inode = self.read_inode(ino)?;
        if !inode.is_symlink() {
            return Err(Ext2Error::InvalidName(format!("inode {ino} is not a symlink")));
        }
        self.read_file(&inode)
    }

    // ── Directories ──────────────────────────────────────────────────────

    fn dir_blocks(&self, ino: InodeNumber) -> Result<Vec<Vec<u8>>> {
        let inode = self.read_inode(ino)?;
        if !inode.is_dir() {
            return Err(Ext2Error::NotDirectory);
        }
        let map = self.block_map(&inode)?;
        let mut blocks = Vec::new();
        for (logical, mapping) in map.data_blocks().enumerate() {
            match mapping? {
                BlockMapping::Mapped(block) => {
                    blocks.push(self.reader.read_block(block)?.into_inner());
                }
                BlockMapping::Hole => {
                    return Err(Ext2Error::Corruption {
                        block: 0,
                        detail: format!("directory {ino} has a hole at logical block {logical}"),
                    });
                }
            }
        }
        Ok(blocks)
    }

    /// Live entries of directory `ino`, in on-disk order.
    pub fn read_dir(&self, ino: InodeNumber) -> Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for block in self.dir_blocks(ino)? {
            let records = decode_block(&block)?;
            entries.extend(live_entries(&records).cloned());
        }
        debug!(ino = ino.0, entries = entries.len(), "read_dir");
        Ok(entries)
    }

    /// Find `name` in directory `dir`.
    pub fn lookup(&self, dir: InodeNumber, name: &[u8]) -> Result<Option<DirEntry>> {
        e2fs_dir::validate_name(name)?;
        for block in self.dir_blocks(dir)? {
            if let Some(entry) = e2fs_dir::lookup_in_block(&block, name)? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Walk an absolute `/`-separated path from the root. Symlinks are not followed.
    pub fn resolve_path(&self, path: &str) -> Result<InodeNumber> {
        let mut ino = InodeNumber::ROOT;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            let entry = self
                .lookup(ino, component.as_bytes())?
                .ok_or_else(|| Ext2Error::NotFound(path.to_owned()))?;
            ino = InodeNumber(entry.inode);
        }
        Ok(ino)
    }
}
