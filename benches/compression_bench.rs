use std::io::Cursor;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fseq::{Compression, FseqVersion, FseqWriter, SequenceGeometry};

fn bench_write_zstd_block(c: &mut Criterion) {
    let channel_count = 512u32;
    let frame_count = 200u32;
    let frame = vec![0xAAu8; channel_count as usize];
    let geometry = SequenceGeometry { channel_count, frame_count, step_time_ms: 50, start_channel: 0 };

    c.bench_function("v2_zstd_write_200_frames", |b| {
        b.iter(|| {
            let mut writer = FseqWriter::create(Cursor::new(Vec::new()), FseqVersion::V2, Compression::Zstd, 3);
            writer.initialize_from(geometry, 0);
            writer.write_header().unwrap();
            for _ in 0..frame_count {
                writer.add_frame(black_box(&frame)).unwrap();
            }
            writer.finalize().unwrap()
        })
    });
}

fn bench_read_zstd_block(c: &mut Criterion) {
    let channel_count = 512u32;
    let frame_count = 200u32;
    let frame = vec![0x55u8; channel_count as usize];
    let geometry = SequenceGeometry { channel_count, frame_count, step_time_ms: 50, start_channel: 0 };
    let mut writer = FseqWriter::create(Cursor::new(Vec::new()), FseqVersion::V2, Compression::Zstd, 3);
    writer.initialize_from(geometry, 0);
    writer.write_header().unwrap();
    for _ in 0..frame_count {
        writer.add_frame(&frame).unwrap();
    }
    let cursor = writer.finalize().unwrap();
    let bytes = cursor.into_inner();

    c.bench_function("v2_zstd_read_200_frames", |b| {
        b.iter(|| {
            let mut reader = fseq::FseqReader::open(Cursor::new(bytes.clone()), 0).unwrap();
            reader.prepare_read(&[(0, channel_count)]);
            let mut dst = vec![0u8; channel_count as usize];
            for frame in 0..frame_count {
                reader.get_frame(black_box(frame)).unwrap().scatter(&mut dst);
            }
        })
    });
}

criterion_group!(benches, bench_write_zstd_block, bench_read_zstd_block);
criterion_main!(benches);
