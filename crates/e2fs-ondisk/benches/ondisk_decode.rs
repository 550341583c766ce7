#![forbid(unsafe_code)]

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use e2fs_ondisk::{
    DirEntry, FileType, GroupDescriptorTable, Inode, Strictness, Superblock, decode_block,
    encode_block,
};
use e2fs_types::{EXT2_SUPER_MAGIC, EXT2_SUPERBLOCK_SIZE, S_IFREG};

fn superblock_bytes(groups: u32) -> Vec<u8> {
    let mut sb = vec![0_u8; EXT2_SUPERBLOCK_SIZE];
    sb[0x00..0x04].copy_from_slice(&(groups * 2048).to_le_bytes());
    sb[0x04..0x08].copy_from_slice(&(groups * 32768).to_le_bytes());
    sb[0x18..0x1C].copy_from_slice(&2_u32.to_le_bytes()); // 4K blocks
    sb[0x1C..0x20].copy_from_slice(&2_u32.to_le_bytes());
    sb[0x20..0x24].copy_from_slice(&32768_u32.to_le_bytes());
    sb[0x24..0x28].copy_from_slice(&32768_u32.to_le_bytes());
    sb[0x28..0x2C].copy_from_slice(&2048_u32.to_le_bytes());
    sb[0x38..0x3A].copy_from_slice(&EXT2_SUPER_MAGIC.to_le_bytes());
    sb[0x4C..0x50].copy_from_slice(&1_u32.to_le_bytes());
    sb[0x54..0x58].copy_from_slice(&11_u32.to_le_bytes());
    sb[0x58..0x5A].copy_from_slice(&256_u16.to_le_bytes());
    sb
}

fn bench_superblock_decode(c: &mut Criterion) {
    let data = superblock_bytes(16);
    c.bench_function("superblock_decode", |b| {
        b.iter(|| Superblock::decode(black_box(&data)).expect("superblock decode"));
    });
}

fn bench_group_desc_table(c: &mut Criterion) {
    let sb = Superblock::decode(&superblock_bytes(128)).expect("superblock decode");
    let mut table = vec![0_u8; GroupDescriptorTable::byte_len(&sb)];
    for (g, chunk) in table.chunks_exact_mut(32).enumerate() {
        let base = u32::try_from(g).expect("group index") * 32768;
        chunk[0x00..0x04].copy_from_slice(&(base + 1).to_le_bytes());
        chunk[0x04..0x08].copy_from_slice(&(base + 2).to_le_bytes());
        chunk[0x08..0x0C].copy_from_slice(&(base + 3).to_le_bytes());
    }

    c.bench_function("group_desc_table_128", |b| {
        b.iter(|| {
            GroupDescriptorTable::decode(&sb, black_box(&table), Strictness::Lenient)
                .expect("table decode")
        });
    });
}

fn bench_inode_decode(c: &mut Criterion) {
    let mut raw = vec![0_u8; 256];
    raw[0x00..0x02].copy_from_slice(&(S_IFREG | 0o644).to_le_bytes());
    raw[0x04..0x08].copy_from_slice(&65536_u32.to_le_bytes());

    c.bench_function("inode_decode_256", |b| {
        b.iter(|| Inode::decode(black_box(&raw)).expect("inode decode"));
    });
}

fn bench_dir_block(c: &mut Criterion) {
    let entries: Vec<_> = (0..120_u32)
        .map(|i| {
            DirEntry::new(11 + i, format!("file_{i:04}").as_bytes(), FileType::RegFile)
                .expect("entry")
        })
        .collect();
    let block = encode_block(&entries, 4096).expect("encode");

    c.bench_function("dir_block_decode", |b| {
        b.iter(|| {
            let entries = decode_block(black_box(&block)).expect("dir block decode");
            black_box(entries);
        });
    });
}

criterion_group!(
    benches,
    bench_superblock_decode,
    bench_group_desc_table,
    bench_inode_decode,
    bench_dir_block
);
criterion_main!(benches);
