//! Cross-cutting scenarios spanning the write pipeline, read pipeline, and
//! index engine together.

use std::io::{Read, Write};

use flate2::bufread::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use pgz::{GzIndex, GzpError, ParGzReaderBuilder, ParGzWriterBuilder};
use tempfile::tempdir;

const S1_PAYLOAD: &[u8] = b"\"Beautiful is better than ugly.\nExplicit is better than implicit.\nSimple is better than complex.\nComplex is better than complicated.\n";

fn write_stream(data: &[u8], blocksize: usize, thread: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut writer = ParGzWriterBuilder::new()
        .blocksize(blocksize)
        .thread(thread)
        .build(&mut out);
    writer.write_all(data).unwrap();
    writer.close().unwrap();
    out
}

#[test]
fn s1_small_write_reads_back_with_reference_decoder() {
    let stream = write_stream(S1_PAYLOAD, 1 << 20, 4);
    let mut decoded = Vec::new();
    MultiGzDecoder::new(&stream[..])
        .read_to_end(&mut decoded)
        .unwrap();
    assert_eq!(decoded, S1_PAYLOAD);
}

#[test]
fn s2_block_boundary_produces_expected_member_count() {
    let payload = S1_PAYLOAD.repeat(50);
    assert_eq!(payload.len(), 6750);
    let stream = write_stream(&payload, 128, 3);

    let dir = tempdir().unwrap();
    let path = dir.path().join("s2.gz");
    std::fs::write(&path, &stream).unwrap();
    let mut file = std::fs::File::open(&path).unwrap();
    let index = GzIndex::build(&mut file).unwrap();

    assert_eq!(index.len(), 53); // ceil(6750 / 128)

    let mut decoded = Vec::new();
    MultiGzDecoder::new(&stream[..])
        .read_to_end(&mut decoded)
        .unwrap();
    assert_eq!(decoded, payload);
}

#[test]
fn s3_roundtrip_through_self() {
    let payload = S1_PAYLOAD.repeat(500);
    assert_eq!(payload.len(), 67_500);
    let stream = write_stream(&payload, 4096, 4);

    let mut reader = ParGzReaderBuilder::new().thread(4).build(&stream[..]);
    let decoded = reader.read_all().unwrap();
    assert_eq!(decoded, payload);
}

#[test]
fn s4_interop_reads_reference_encoder_output() {
    let payload = S1_PAYLOAD.repeat(500);
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(6));
    encoder.write_all(&payload).unwrap();
    let reference_stream = encoder.finish().unwrap();

    let mut reader = ParGzReaderBuilder::new().thread(4).build(&reference_stream[..]);
    let decoded = reader.read_all().unwrap();
    assert_eq!(decoded, payload);
}

#[test]
fn s5_crc_failure_detected_within_flipped_member() {
    let payload = S1_PAYLOAD.repeat(50);
    let mut stream = write_stream(&payload, 128, 1);

    let dir = tempdir().unwrap();
    let path = dir.path().join("s5.gz");
    std::fs::write(&path, &stream).unwrap();
    let mut file = std::fs::File::open(&path).unwrap();
    let index = GzIndex::build(&mut file).unwrap();
    let first = index.entries()[0];

    // Flip a byte squarely inside the first member's compressed body (after
    // its 20-byte header, before its 8-byte trailer).
    let flip_at = first.offset as usize + 20 + (first.member_size as usize - 28) / 2;
    stream[flip_at] ^= 0xFF;

    let mut reader = ParGzReaderBuilder::new().thread(1).build(&stream[..]);
    let err = reader.read_all().unwrap_err();
    assert!(matches!(
        err,
        GzpError::CrcMismatch { .. } | GzpError::DecompressError(_) | GzpError::SizeMismatch { .. }
    ));
}

#[test]
fn s6_index_walk_totals_match() {
    let payload = S1_PAYLOAD.repeat(50);
    let stream = write_stream(&payload, 128, 4);

    let dir = tempdir().unwrap();
    let path = dir.path().join("s6.gz");
    std::fs::write(&path, &stream).unwrap();
    let mut file = std::fs::File::open(&path).unwrap();
    let index = GzIndex::build(&mut file).unwrap();

    assert_eq!(index.len(), 53);
    let member_size_sum: u64 = index.entries().iter().map(|e| e.member_size as u64).sum();
    assert_eq!(member_size_sum, stream.len() as u64);
    assert_eq!(index.total_uncompressed_size(), 6750);
}

#[test]
fn invariant_order_preservation_across_thread_counts() {
    let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 255) as u8).collect();
    for thread in [1usize, 2, 8] {
        let stream = write_stream(&payload, 7919, thread);
        let mut reader = ParGzReaderBuilder::new().thread(thread).build(&stream[..]);
        assert_eq!(reader.read_all().unwrap(), payload);
    }
}

#[test]
fn invariant_blockiness_single_call_matches_ceil_division() {
    let payload = vec![1u8; 10_000];
    let stream = write_stream(&payload, 3_000, 2);

    let dir = tempdir().unwrap();
    let path = dir.path().join("blockiness.gz");
    std::fs::write(&path, &stream).unwrap();
    let mut file = std::fs::File::open(&path).unwrap();
    let index = GzIndex::build(&mut file).unwrap();
    assert_eq!(index.len(), 4); // ceil(10000 / 3000)
}

#[test]
fn invariant_truncation_detected() {
    let payload = S1_PAYLOAD.repeat(10);
    let stream = write_stream(&payload, 256, 2);
    let truncated = &stream[..stream.len() - 3];

    let mut reader = ParGzReaderBuilder::new().thread(2).build(truncated);
    assert!(reader.read_all().is_err());
}

#[test]
fn idempotence_double_close_and_double_flush() {
    let mut out = Vec::new();
    let mut writer = ParGzWriterBuilder::new().blocksize(64).thread(1).build(&mut out);
    writer.write_all(b"idempotence check").unwrap();
    writer.flush_data().unwrap();
    writer.flush_data().unwrap();
    writer.close().unwrap();
    writer.close().unwrap();

    let mut decoded = Vec::new();
    MultiGzDecoder::new(&out[..])
        .read_to_end(&mut decoded)
        .unwrap();
    assert_eq!(decoded, b"idempotence check");
}
