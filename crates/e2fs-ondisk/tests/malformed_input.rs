#![forbid(unsafe_code)]

use e2fs_error::Ext2Error;
use e2fs_ondisk::{
    FeatureTable, GroupDescriptor, GroupDescriptorTable, IncompatFeatures, Inode, RoCompatFeatures,
    Strictness, Superblock, decode_block,
};
use e2fs_types::{EXT2_SUPER_MAGIC, EXT2_SUPERBLOCK_OFFSET, EXT2_SUPERBLOCK_SIZE};
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};

#[derive(Debug, Default)]
struct ErrorCoverage {
    superblock: u32,
    unsupported: u32,
    group_desc: u32,
    inode: u32,
    dir_entry: u32,
    other: u32,
}

impl ErrorCoverage {
    fn observe(&mut self, err: &Ext2Error) {
        match err {
            Ext2Error::CorruptSuperBlock(_) => self.superblock += 1,
            Ext2Error::UnsupportedFeature(_) => self.unsupported += 1,
            Ext2Error::CorruptGroupDescriptor(_) => self.group_desc += 1,
            Ext2Error::CorruptInode(_) => self.inode += 1,
            Ext2Error::CorruptDirectoryEntry { .. } => self.dir_entry += 1,
            _ => self.other += 1,
        }
    }
}

/// Deterministic xorshift so every run sees the same samples.
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, n: usize) -> usize {
        (self.next() % n as u64) as usize
    }
}

fn valid_superblock() -> Vec<u8> {
    let mut sb = vec![0_u8; EXT2_SUPERBLOCK_SIZE];
    sb[0x00..0x04].copy_from_slice(&2048_u32.to_le_bytes()); // inodes_count
    sb[0x04..0x08].copy_from_slice(&8192_u32.to_le_bytes()); // blocks_count
    sb[0x14..0x18].copy_from_slice(&1_u32.to_le_bytes()); // first_data_block
    sb[0x20..0x24].copy_from_slice(&8192_u32.to_le_bytes()); // blocks_per_group
    sb[0x24..0x28].copy_from_slice(&8192_u32.to_le_bytes()); // frags_per_group
    sb[0x28..0x2C].copy_from_slice(&2048_u32.to_le_bytes()); // inodes_per_group
    sb[0x38..0x3A].copy_from_slice(&EXT2_SUPER_MAGIC.to_le_bytes());
    sb[0x4C..0x50].copy_from_slice(&1_u32.to_le_bytes()); // rev_level
    sb[0x54..0x58].copy_from_slice(&11_u32.to_le_bytes()); // first_ino
    sb[0x58..0x5A].copy_from_slice(&128_u16.to_le_bytes()); // inode_size
    sb[0x60..0x64].copy_from_slice(&IncompatFeatures::FILETYPE.0.to_le_bytes());
    sb
}

fn samples() -> Vec<(String, Vec<u8>)> {
    let mut rng = Rng(0x9E37_79B9_7F4A_7C15);
    let mut out = Vec::new();

    for len in [0, 1, 7, 8, 31, 64, 127, 128, 1023] {
        out.push((format!("zeros_{len}"), vec![0_u8; len]));
    }
    for i in 0..40 {
        let len = 1 + rng.below(4096);
        let bytes = (0..len).map(|_| rng.next() as u8).collect();
        out.push((format!("random_{i}"), bytes));
    }
    for i in 0..60 {
        let mut sb = valid_superblock();
        for _ in 0..1 + rng.below(4) {
            let at = rng.below(0x100);
            sb[at] = rng.next() as u8;
        }
        out.push((format!("mutated_sb_{i}"), sb));
    }
    out
}

fn run_decoder<T, F>(
    sample: &str,
    decoder: &'static str,
    hits: &mut BTreeMap<&'static str, u32>,
    coverage: &mut ErrorCoverage,
    f: F,
) -> bool
where
    F: FnOnce() -> Result<T, Ext2Error>,
{
    *hits.entry(decoder).or_default() += 1;
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(_)) => false,
        Ok(Err(err)) => {
            coverage.observe(&err);
            true
        }
        Err(_) => panic!("decoder `{decoder}` panicked on sample `{sample}`"),
    }
}

#[test]
fn malformed_input_never_panics_and_reports_typed_errors() {
    let samples = samples();
    let base = Superblock::decode(&valid_superblock()).expect("base superblock");
    let mut hits = BTreeMap::new();
    let mut coverage = ErrorCoverage::default();
    let mut rejected = 0_usize;

    for (name, bytes) in &samples {
        let mut had_error = false;
        had_error |= run_decoder(name, "superblock", &mut hits, &mut coverage, || {
            Superblock::decode(bytes)
        });
        had_error |= run_decoder(name, "superblock_from_image", &mut hits, &mut coverage, || {
            let mut image = vec![0_u8; EXT2_SUPERBLOCK_OFFSET];
            image.extend_from_slice(bytes);
            Superblock::decode_from_image(&image)
        });
        had_error |= run_decoder(name, "group_desc_32", &mut hits, &mut coverage, || {
            GroupDescriptor::decode(bytes, 32)
        });
        had_error |= run_decoder(name, "group_desc_table", &mut hits, &mut coverage, || {
            GroupDescriptorTable::decode(&base, bytes, Strictness::Strict)
        });
        had_error |= run_decoder(name, "inode", &mut hits, &mut coverage, || {
            Inode::decode(bytes)
        });
        had_error |= run_decoder(name, "dir_block", &mut hits, &mut coverage, || {
            decode_block(bytes)
        });
        rejected += usize::from(had_error);
    }

    assert!(rejected * 2 > samples.len(), "only {rejected} samples rejected");
    assert_eq!(hits.len(), 6);
    assert!(coverage.superblock > 0, "{coverage:?}");
    assert!(coverage.group_desc > 0, "{coverage:?}");
    assert!(coverage.inode > 0, "{coverage:?}");
    assert!(coverage.dir_entry > 0, "{coverage:?}");
}

#[test]
fn unknown_incompat_bit_is_unsupported_but_ro_compat_is_tolerated() {
    let mut sb = valid_superblock();
    sb[0x60..0x64].copy_from_slice(&(IncompatFeatures::FILETYPE.0 | 0x8000_0000).to_le_bytes());
    let err = Superblock::decode(&sb).unwrap_err();
    assert!(matches!(err, Ext2Error::UnsupportedFeature(_)));
    // Diagnostics still see the structure.
    assert!(Superblock::decode_unchecked(&sb).is_ok());

    let mut sb = valid_superblock();
    sb[0x64..0x68].copy_from_slice(&0x8000_0000_u32.to_le_bytes());
    let decoded = Superblock::decode(&sb).expect("ro_compat residue is tolerated");
    let report = FeatureTable::SUPPORTED.check(decoded.feature_set());
    assert!(report.is_mountable());
    assert!(report.requires_read_only());
}

#[test]
fn supported_ro_compat_bits_do_not_force_read_only() {
    let mut sb = valid_superblock();
    let bits = RoCompatFeatures::SPARSE_SUPER.0 | RoCompatFeatures::LARGE_FILE.0;
    sb[0x64..0x68].copy_from_slice(&bits.to_le_bytes());
    let decoded = Superblock::decode(&sb).unwrap();
    let report = FeatureTable::default().check(decoded.feature_set());
    assert!(!report.requires_read_only());
}
