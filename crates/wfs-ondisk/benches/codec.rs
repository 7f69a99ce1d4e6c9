#![forbid(unsafe_code)]

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use wfs_ondisk::{DirEntry, InodeHeader, Record, encode_dir_payload, parse_dir_payload};
use wfs_types::{InodeNumber, S_IFREG};

fn sample_header(size: u32) -> InodeHeader {
    InodeHeader {
        inode_number: InodeNumber(17),
        deleted: false,
        mode: S_IFREG | 0o644,
        uid: 1000,
        gid: 1000,
        flags: 0,
        size,
        atime: 1_700_000_000,
        mtime: 1_700_000_000,
        ctime: 1_700_000_000,
        links: 1,
    }
}

fn bench_inode_header_parse(c: &mut Criterion) {
    let bytes = sample_header(0).encode();

    c.bench_function("inode_header_parse", |b| {
        b.iter(|| InodeHeader::parse(black_box(&bytes)).expect("header parse"));
    });
}

fn bench_record_round_trip(c: &mut Criterion) {
    let record = Record {
        header: sample_header(4096),
        payload: vec![0xAB_u8; 4096],
    };
    let bytes = record.encode();

    c.bench_function("record_parse_4k", |b| {
        b.iter(|| Record::parse(black_box(&bytes)).expect("record parse"));
    });
    c.bench_function("record_encode_4k", |b| {
        b.iter(|| black_box(&record).encode());
    });
}

fn bench_dir_payload_parse(c: &mut Criterion) {
    let entries: Vec<DirEntry> = (0..64)
        .map(|i| {
            DirEntry::new(format!("entry-{i:03}").as_bytes(), InodeNumber(i + 1)).expect("entry")
        })
        .collect();
    let payload = encode_dir_payload(&entries);

    c.bench_function("dir_payload_parse_64", |b| {
        b.iter(|| {
            let parsed = parse_dir_payload(black_box(&payload)).expect("dir parse");
            black_box(parsed);
        });
    });
}

criterion_group!(
    codec,
    bench_inode_header_parse,
    bench_record_round_trip,
    bench_dir_payload_parse,
);
criterion_main!(codec);
