//! Feature flag sets and the compatibility gate.

use e2fs_error::{Ext2Error, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

// ── Feature flag newtypes ───────────────────────────────────────────────────

/// Compatible feature flags (`s_feature_compat`).
///
/// These are advisory; unknown bits are safe to ignore.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompatFeatures(pub u32);

impl CompatFeatures {
    pub const DIR_PREALLOC: Self = Self(0x0001);
    pub const IMAGIC_INODES: Self = Self(0x0002);
    pub const HAS_JOURNAL: Self = Self(0x0004);
    pub const EXT_ATTR: Self = Self(0x0008);
    pub const RESIZE_INODE: Self = Self(0x0010);
    pub const DIR_INDEX: Self = Self(0x0020);
    pub const SPARSE_SUPER2: Self = Self(0x0200);
    pub const FAST_COMMIT: Self = Self(0x0400);
    pub const STABLE_INODES: Self = Self(0x0800);
    pub const ORPHAN_FILE: Self = Self(0x1000);

    const KNOWN: &[(u32, &'static str)] = &[
        (0x0001, "DIR_PREALLOC"),
        (0x0002, "IMAGIC_INODES"),
        (0x0004, "HAS_JOURNAL"),
        (0x0008, "EXT_ATTR"),
        (0x0010, "RESIZE_INODE"),
        (0x0020, "DIR_INDEX"),
        (0x0200, "SPARSE_SUPER2"),
        (0x0400, "FAST_COMMIT"),
        (0x0800, "STABLE_INODES"),
        (0x1000, "ORPHAN_FILE"),
    ];

    /// Union of every named compat bit.
    pub const ALL_NAMED: Self = Self(known_mask(Self::KNOWN));

    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn contains(self, flag: Self) -> bool {
        (self.0 & flag.0) != 0
    }

    /// Names of all set flags that have a name.
    #[must_use]
    pub fn describe(self) -> Vec<&'static str> {
        describe_flags(self.0, Self::KNOWN)
    }

    /// Raw bits not covered by any named constant.
    #[must_use]
    pub fn unknown_bits(self) -> u32 {
        self.0 & !Self::ALL_NAMED.0
    }
}

impl std::fmt::Display for CompatFeatures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        format_flags(f, self.0, Self::KNOWN)
    }
}

/// Incompatible feature flags (`s_feature_incompat`).
///
/// A bit this build does not understand MUST stop decoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IncompatFeatures(pub u32);

impl IncompatFeatures {
    pub const COMPRESSION: Self = Self(0x0001);
    pub const FILETYPE: Self = Self(0x0002);
    pub const RECOVER: Self = Self(0x0004);
    pub const JOURNAL_DEV: Self = Self(0x0008);
    pub const META_BG: Self = Self(0x0010);
    pub const EXTENTS: Self = Self(0x0040);
    pub const BIT64: Self = Self(0x0080);
    pub const MMP: Self = Self(0x0100);
    pub const FLEX_BG: Self = Self(0x0200);
    pub const EA_INODE: Self = Self(0x0400);
    pub const DIRDATA: Self = Self(0x1000);
    pub const CSUM_SEED: Self = Self(0x2000);
    pub const LARGEDIR: Self = Self(0x4000);
    pub const INLINE_DATA: Self = Self(0x8000);
    pub const ENCRYPT: Self = Self(0x10000);
    pub const CASEFOLD: Self = Self(0x20000);

    const KNOWN: &[(u32, &'static str)] = &[
        (0x0001, "COMPRESSION"),
        (0x0002, "FILETYPE"),
        (0x0004, "RECOVER"),
        (0x0008, "JOURNAL_DEV"),
        (0x0010, "META_BG"),
        (0x0040, "EXTENTS"),
        (0x0080, "64BIT"),
        (0x0100, "MMP"),
        (0x0200, "FLEX_BG"),
        (0x0400, "EA_INODE"),
        (0x1000, "DIRDATA"),
        (0x2000, "CSUM_SEED"),
        (0x4000, "LARGEDIR"),
        (0x8000, "INLINE_DATA"),
        (0x1_0000, "ENCRYPT"),
        (0x2_0000, "CASEFOLD"),
    ];

    pub const ALL_NAMED: Self = Self(known_mask(Self::KNOWN));

    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn contains(self, flag: Self) -> bool {
        (self.0 & flag.0) != 0
    }

    #[must_use]
    pub fn describe(self) -> Vec<&'static str> {
        describe_flags(self.0, Self::KNOWN)
    }

    #[must_use]
    pub fn unknown_bits(self) -> u32 {
        self.0 & !Self::ALL_NAMED.0
    }
}

impl std::fmt::Display for IncompatFeatures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        format_flags(f, self.0, Self::KNOWN)
    }
}

/// Read-only compatible feature flags (`s_feature_ro_compat`).
///
/// Unknown bits imply the volume must not be written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoCompatFeatures(pub u32);

impl RoCompatFeatures {
    pub const SPARSE_SUPER: Self = Self(0x0001);
    pub const LARGE_FILE: Self = Self(0x0002);
    pub const BTREE_DIR: Self = Self(0x0004);
    pub const HUGE_FILE: Self = Self(0x0008);
    pub const GDT_CSUM: Self = Self(0x0010);
    pub const DIR_NLINK: Self = Self(0x0020);
    pub const EXTRA_ISIZE: Self = Self(0x0040);
    pub const QUOTA: Self = Self(0x0100);
    pub const BIGALLOC: Self = Self(0x0200);
    pub const METADATA_CSUM: Self = Self(0x0400);
    pub const READONLY: Self = Self(0x1000);
    pub const PROJECT: Self = Self(0x2000);
    pub const VERITY: Self = Self(0x8000);
    pub const ORPHAN_PRESENT: Self = Self(0x10000);

    const KNOWN: &[(u32, &'static str)] = &[
        (0x0001, "SPARSE_SUPER"),
        (0x0002, "LARGE_FILE"),
        (0x0004, "BTREE_DIR"),
        (0x0008, "HUGE_FILE"),
        (0x0010, "GDT_CSUM"),
        (0x0020, "DIR_NLINK"),
        (0x0040, "EXTRA_ISIZE"),
        (0x0100, "QUOTA"),
        (0x0200, "BIGALLOC"),
        (0x0400, "METADATA_CSUM"),
        (0x1000, "READONLY"),
        (0x2000, "PROJECT"),
        (0x8000, "VERITY"),
        (0x1_0000, "ORPHAN_PRESENT"),
    ];

    pub const ALL_NAMED: Self = Self(known_mask(Self::KNOWN));

    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn contains(self, flag: Self) -> bool {
        (self.0 & flag.0) != 0
    }

    #[must_use]
    pub fn describe(self) -> Vec<&'static str> {
        describe_flags(self.0, Self::KNOWN)
    }

    #[must_use]
    pub fn unknown_bits(self) -> u32 {
        self.0 & !Self::ALL_NAMED.0
    }
}

impl std::fmt::Display for RoCompatFeatures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        format_flags(f, self.0, Self::KNOWN)
    }
}

/// The three feature bitsets of one superblock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSet {
    pub compat: CompatFeatures,
    pub incompat: IncompatFeatures,
    pub ro_compat: RoCompatFeatures,
}

impl std::fmt::Display for FeatureSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "compat={}, incompat={}, ro_compat={}",
            self.compat, self.incompat, self.ro_compat
        )
    }
}

// ── Compatibility gate ──────────────────────────────────────────────────────

/// Bits this implementation knows how to interpret, per set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureTable {
    pub compat: CompatFeatures,
    pub incompat: IncompatFeatures,
    pub ro_compat: RoCompatFeatures,
}

impl FeatureTable {
    /// What the codecs in this crate interpret.
    pub const SUPPORTED: Self = Self {
        compat: CompatFeatures::ALL_NAMED,
        incompat: IncompatFeatures(
            IncompatFeatures::FILETYPE.0 | IncompatFeatures::BIT64.0 | IncompatFeatures::FLEX_BG.0,
        ),
        ro_compat: RoCompatFeatures(
            RoCompatFeatures::SPARSE_SUPER.0
                | RoCompatFeatures::LARGE_FILE.0
                | RoCompatFeatures::DIR_NLINK.0
                | RoCompatFeatures::EXTRA_ISIZE.0,
        ),
    };

    /// Compute the unknown residue of each set.
    ///
    /// Never fails; callers decide via [`FeatureReport::ensure_mountable`].
    /// Tolerated residues are logged.
    #[must_use]
    pub fn check(&self, features: FeatureSet) -> FeatureReport {
        let report = FeatureReport {
            features,
            unknown_compat: features.compat.0 & !self.compat.0,
            unknown_incompat: features.incompat.0 & !self.incompat.0,
            unknown_ro_compat: features.ro_compat.0 & !self.ro_compat.0,
        };
        if report.unknown_compat != 0 {
            warn!(
                unknown_bits = report.unknown_compat,
                "ignoring unknown compatible features"
            );
        }
        if report.unknown_ro_compat != 0 {
            warn!(
                unknown_bits = report.unknown_ro_compat,
                "unknown read-only-compatible features, volume must be treated read-only"
            );
        }
        report
    }
}

impl Default for FeatureTable {
    fn default() -> Self {
        Self::SUPPORTED
    }
}

/// Result of running a [`FeatureSet`] through a [`FeatureTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureReport {
    pub features: FeatureSet,
    pub unknown_compat: u32,
    pub unknown_incompat: u32,
    pub unknown_ro_compat: u32,
}

impl FeatureReport {
    /// No unknown incompatible bits.
    #[must_use]
    pub fn is_mountable(&self) -> bool {
        self.unknown_incompat == 0
    }

    /// Unknown read-only-compatible bits are present.
    #[must_use]
    pub fn requires_read_only(&self) -> bool {
        self.unknown_ro_compat != 0
    }

    /// Fail with `UnsupportedFeature` when unknown incompatible bits are set.
    pub fn ensure_mountable(&self) -> Result<()> {
        if self.is_mountable() {
            return Ok(());
        }
        Err(Ext2Error::UnsupportedFeature(format!(
            "incompat {}",
            IncompatFeatures(self.unknown_incompat)
        )))
    }

    /// `ReadOnly` when unknown read-only-compatible bits are set.
    pub fn ensure_writable(&self) -> Result<()> {
        self.ensure_mountable()?;
        if self.requires_read_only() {
            return Err(Ext2Error::ReadOnly);
        }
        Ok(())
    }
}

impl std::fmt::Display for FeatureReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.features)?;
        if self.unknown_incompat != 0 {
            write!(f, "; unsupported incompat: 0x{:X}", self.unknown_incompat)?;
        }
        if self.unknown_ro_compat != 0 {
            write!(f, "; unknown ro_compat: 0x{:X}", self.unknown_ro_compat)?;
        }
        if self.unknown_compat != 0 {
            write!(f, "; unknown compat: 0x{:X}", self.unknown_compat)?;
        }
        Ok(())
    }
}

// ── Shared flag helpers ─────────────────────────────────────────────────────

const fn known_mask(known: &[(u32, &'static str)]) -> u32 {
    let mut mask = 0;
    let mut i = 0;
    while i < known.len() {
        mask |= known[i].0;
        i += 1;
    }
    mask
}

/// Collect names of all set bits from a `(bit, name)` table.
///
/// Bits not present in `known` are omitted.
fn describe_flags(bits: u32, known: &[(u32, &'static str)]) -> Vec<&'static str> {
    known
        .iter()
        .filter(|(bit, _)| bits & bit != 0)
        .map(|(_, name)| *name)
        .collect()
}

/// Format a bitmask as a pipe-separated list of flag names.
///
/// Example output: `FILETYPE|64BIT` or `(none)` when zero.
/// Unknown bits are appended as hex, e.g. `FILETYPE|0x80000000`.
fn format_flags(
    f: &mut std::fmt::Formatter<'_>,
    bits: u32,
    known: &[(u32, &'static str)],
) -> std::fmt::Result {
    if bits == 0 {
        return f.write_str("(none)");
    }
    let mut first = true;
    let mut remaining = bits;
    for &(bit, name) in known {
        if remaining & bit != 0 {
            if !first {
                f.write_str("|")?;
            }
            f.write_str(name)?;
            remaining &= !bit;
            first = false;
        }
    }
    if remaining != 0 {
        if !first {
            f.write_str("|")?;
        }
        write!(f, "0x{remaining:X}")?;
    }
    Ok(())
}
