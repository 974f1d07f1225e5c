//! Integration tests for muestra-io: WAV metadata, preload sharing and the
//! background loader handoff.

use muestra_core::AudioBuffer;
use muestra_io::{
    Error, FilePool, LoopRange, Oversampling, SampleCache, WavSpec, read_smpl_loop,
    read_wav_info, write_wav,
};
use std::path::Path;
use std::sync::Arc;

/// Write a mono ramp of `frames` frames into `dir/name`.
fn write_ramp(dir: &Path, name: &str, frames: usize) {
    let data: Vec<f32> = (0..frames).map(|i| i as f32 / frames as f32).collect();
    let buffer = AudioBuffer::from_channels(vec![data]);
    let spec = WavSpec {
        sample_rate: 44100,
        ..WavSpec::default()
    };
    write_wav(dir.join(name), &buffer, spec).unwrap();
}

/// Append a `smpl` chunk with one loop and patch the RIFF size.
fn append_smpl_chunk(path: &Path, start: u32, end: u32) {
    let mut bytes = std::fs::read(path).unwrap();

    let mut chunk = Vec::new();
    chunk.extend_from_slice(b"smpl");
    chunk.extend_from_slice(&60u32.to_le_bytes());
    // manufacturer, product, period, unity note, pitch fraction, smpte format, smpte offset
    for value in [0u32, 0, 22675, 60, 0, 0, 0] {
        chunk.extend_from_slice(&value.to_le_bytes());
    }
    // one loop, no sampler data
    chunk.extend_from_slice(&1u32.to_le_bytes());
    chunk.extend_from_slice(&0u32.to_le_bytes());
    // cue id, type, start, end, fraction, play count
    for value in [0u32, 0, start, end, 0, 0] {
        chunk.extend_from_slice(&value.to_le_bytes());
    }

    bytes.extend_from_slice(&chunk);
    let riff_size = (bytes.len() - 8) as u32;
    bytes[4..8].copy_from_slice(&riff_size.to_le_bytes());
    std::fs::write(path, bytes).unwrap();
}

// ---------------------------------------------------------------------------
// WAV metadata
// ---------------------------------------------------------------------------

#[test]
fn smpl_loop_points_are_read() {
    let dir = tempfile::tempdir().unwrap();
    write_ramp(dir.path(), "looped.wav", 1000);
    let path = dir.path().join("looped.wav");
    append_smpl_chunk(&path, 100, 899);

    let range = read_smpl_loop(&path).unwrap();
    assert_eq!(range, Some(LoopRange { start: 100, end: 899 }));

    let info = read_wav_info(&path).unwrap();
    assert_eq!(info.num_frames, 1000);
    assert_eq!(info.sample_rate, 44100);
    assert_eq!(info.loop_range, Some(LoopRange { start: 100, end: 899 }));
}

#[test]
fn wav_without_smpl_has_no_loop() {
    let dir = tempfile::tempdir().unwrap();
    write_ramp(dir.path(), "plain.wav", 10);
    assert_eq!(read_smpl_loop(dir.path().join("plain.wav")).unwrap(), None);
}

// ---------------------------------------------------------------------------
// File pool preloading
// ---------------------------------------------------------------------------

#[test]
fn preload_covers_offset_plus_preload_size() {
    let dir = tempfile::tempdir().unwrap();
    write_ramp(dir.path(), "long.wav", 5000);

    let mut pool = FilePool::new(dir.path(), SampleCache::new(), 8).unwrap();
    pool.set_preload_size(256).unwrap();

    let info = pool.get_file_information("long.wav", 100).unwrap();
    assert_eq!(info.num_frames, 5000);
    assert_eq!(info.num_channels, 1);
    assert_eq!(info.sample_rate, 44100.0);
    assert_eq!(info.preloaded.data.num_frames(), 356);
    assert!(!info.preloaded.is_complete());
    assert_eq!(pool.num_preloaded_samples(), 1);

    // A larger offset on the same file grows the preload
    let info = pool.get_file_information("long.wav", 1000).unwrap();
    assert_eq!(info.preloaded.data.num_frames(), 1256);
    assert_eq!(pool.num_preloaded_samples(), 1);
}

#[test]
fn zero_preload_size_loads_whole_file() {
    let dir = tempfile::tempdir().unwrap();
    write_ramp(dir.path(), "short.wav", 300);

    let mut pool = FilePool::new(dir.path(), SampleCache::new(), 8).unwrap();
    pool.set_preload_size(0).unwrap();
    let info = pool.get_file_information("short.wav", 0).unwrap();
    assert_eq!(info.preloaded.data.num_frames(), 300);
    assert!(info.preloaded.is_complete());
}

#[test]
fn set_preload_size_reloads_existing_files() {
    let dir = tempfile::tempdir().unwrap();
    write_ramp(dir.path(), "long.wav", 5000);

    let mut pool = FilePool::new(dir.path(), SampleCache::new(), 8).unwrap();
    pool.set_preload_size(100).unwrap();
    pool.get_file_information("long.wav", 0).unwrap();

    pool.set_preload_size(400).unwrap();
    let info = pool.get_file_information("long.wav", 0).unwrap();
    assert_eq!(info.preloaded.data.num_frames(), 400);
}

#[test]
fn oversampling_scales_frames_and_rate() {
    let dir = tempfile::tempdir().unwrap();
    write_ramp(dir.path(), "looped.wav", 1000);
    append_smpl_chunk(&dir.path().join("looped.wav"), 10, 500);

    let mut pool = FilePool::new(dir.path(), SampleCache::new(), 8).unwrap();
    pool.set_preload_size(0).unwrap();
    pool.set_oversampling(Oversampling::X2).unwrap();

    let info = pool.get_file_information("looped.wav", 0).unwrap();
    assert_eq!(info.num_frames, 2000);
    assert_eq!(info.sample_rate, 88200.0);
    assert_eq!(info.loop_range, Some(LoopRange { start: 20, end: 1000 }));
    assert_eq!(info.preloaded.data.num_frames(), 2000);
}

#[test]
fn unsupported_channel_count_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let buffer = AudioBuffer::new(4, 16);
    write_wav(dir.path().join("quad.wav"), &buffer, WavSpec::default()).unwrap();

    let mut pool = FilePool::new(dir.path(), SampleCache::new(), 8).unwrap();
    assert!(matches!(
        pool.get_file_information("quad.wav", 0),
        Err(Error::UnsupportedChannels { channels: 4, .. })
    ));
}

// ---------------------------------------------------------------------------
// Sharing across engines
// ---------------------------------------------------------------------------

#[test]
fn pools_sharing_a_cache_share_preloaded_buffers() {
    let dir = tempfile::tempdir().unwrap();
    write_ramp(dir.path(), "shared.wav", 2000);
    let cache = SampleCache::new();

    let mut first = FilePool::new(dir.path(), Arc::clone(&cache), 8).unwrap();
    let mut second = FilePool::new(dir.path(), Arc::clone(&cache), 8).unwrap();
    first.set_preload_size(512).unwrap();
    second.set_preload_size(512).unwrap();

    let a = first.get_file_information("shared.wav", 0).unwrap();
    let b = second.get_file_information("shared.wav", 0).unwrap();
    assert!(Arc::ptr_eq(&a.preloaded, &b.preloaded));
    assert_eq!(cache.len(), 1);

    // Dropping one engine leaves the other's data intact
    drop(a);
    drop(first);
    assert_eq!(b.preloaded.data.num_frames(), 512);
    assert_eq!(b.preloaded.data.channel(0)[1], 1.0 / 2000.0);
    assert_eq!(cache.len(), 1);

    drop(b);
    drop(second);
    assert!(cache.is_empty());
}

#[test]
fn private_caches_do_not_share() {
    let dir = tempfile::tempdir().unwrap();
    write_ramp(dir.path(), "private.wav", 100);

    let mut first = FilePool::new(dir.path(), SampleCache::new(), 8).unwrap();
    let mut second = FilePool::new(dir.path(), SampleCache::new(), 8).unwrap();
    let a = first.get_file_information("private.wav", 0).unwrap();
    let b = second.get_file_information("private.wav", 0).unwrap();
    assert!(!Arc::ptr_eq(&a.preloaded, &b.preloaded));
}

// ---------------------------------------------------------------------------
// Background loading
// ---------------------------------------------------------------------------

#[test]
fn background_load_publishes_full_buffer() {
    let dir = tempfile::tempdir().unwrap();
    write_ramp(dir.path(), "stream.wav", 4096);

    let mut pool = FilePool::new(dir.path(), SampleCache::new(), 8).unwrap();
    pool.set_preload_size(64).unwrap();
    let info = pool.get_file_information("stream.wav", 0).unwrap();
    assert_eq!(info.preloaded.data.num_frames(), 64);

    let slot = pool.new_slot();
    slot.expect(1);
    assert!(pool.enqueue_loading(&slot, &info.id, 1));
    pool.wait_for_background_loading();

    assert!(slot.is_ready());
    let full = slot.take(1).expect("full buffer published");
    assert_eq!(full.ticket, 1);
    assert_eq!(full.data.num_frames(), 4096);
    assert_eq!(pool.dropped_requests(), 0);
}

#[test]
fn stale_ticket_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    write_ramp(dir.path(), "stream.wav", 1024);

    let mut pool = FilePool::new(dir.path(), SampleCache::new(), 8).unwrap();
    let info = pool.get_file_information("stream.wav", 0).unwrap();

    let slot = pool.new_slot();
    // The voice has moved on to ticket 2 before request 1 is served
    slot.expect(2);
    assert!(pool.enqueue_loading(&slot, &info.id, 1));
    pool.wait_for_background_loading();

    assert!(!slot.is_ready());
    assert!(slot.take(1).is_none());
    assert!(slot.take(2).is_none());
}

#[test]
fn cleared_slot_drops_published_data() {
    let dir = tempfile::tempdir().unwrap();
    write_ramp(dir.path(), "stream.wav", 1024);

    let mut pool = FilePool::new(dir.path(), SampleCache::new(), 8).unwrap();
    let info = pool.get_file_information("stream.wav", 0).unwrap();

    let slot = pool.new_slot();
    slot.expect(7);
    assert!(pool.enqueue_loading(&slot, &info.id, 7));
    pool.wait_for_background_loading();
    assert!(slot.take(7).is_some());

    slot.clear();
    assert!(!slot.is_ready());
    assert!(slot.take(7).is_none());
}

#[test]
fn missing_file_during_background_load_publishes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    write_ramp(dir.path(), "vanishing.wav", 512);

    let mut pool = FilePool::new(dir.path(), SampleCache::new(), 8).unwrap();
    let info = pool.get_file_information("vanishing.wav", 0).unwrap();
    std::fs::remove_file(dir.path().join("vanishing.wav")).unwrap();

    let slot = pool.new_slot();
    slot.expect(1);
    assert!(pool.enqueue_loading(&slot, &info.id, 1));
    pool.wait_for_background_loading();
    assert!(slot.take(1).is_none());
}

#[test]
fn full_queue_drops_and_counts_requests() {
    let dir = tempfile::tempdir().unwrap();
    // Large enough that the loader is still reading while the queue fills
    write_ramp(dir.path(), "big.wav", 200_000);

    let mut pool = FilePool::new(dir.path(), SampleCache::new(), 1).unwrap();
    pool.set_preload_size(16).unwrap();
    let info = pool.get_file_information("big.wav", 0).unwrap();

    let slots: Vec<_> = (0..8).map(|_| pool.new_slot()).collect();
    let mut accepted = 0;
    for slot in &slots {
        slot.expect(1);
        if pool.enqueue_loading(slot, &info.id, 1) {
            accepted += 1;
        }
    }
    assert!(pool.dropped_requests() > 0);
    assert_eq!(pool.dropped_requests(), 8 - accepted);

    pool.wait_for_background_loading();
    let ready = slots.iter().filter(|slot| slot.is_ready()).count() as u64;
    assert_eq!(ready, accepted);
}
