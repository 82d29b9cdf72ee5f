// Index Tests for streamlog
// Two-tier lookups, midpoint search and index segment files

use rand::seq::SliceRandom;
use std::sync::Arc;
use streamlog::index::{ENTRIES_PER_PAGE, INDEX_DIR};
use streamlog::{
    Error, IndexEntry, IndexOptions, IndexSegment, LogAppender, MemStorage, Options, Range, TableIndex,
};
use tempfile::TempDir;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_range_across_flush_and_head() {
    init();
    let dir = TempDir::new().unwrap();
    let index = TableIndex::open(dir.path(), IndexOptions::default().flush_threshold(1000)).unwrap();

    for version in 1..=10u32 {
        index.add(77, version, version as u64 * 100).unwrap();
    }
    index.flush().unwrap();
    for version in 11..=15u32 {
        index.add(77, version, version as u64 * 100).unwrap();
    }
    assert_eq!(index.segment_count(), 1);
    assert_eq!(index.in_memory_items(), 5);

    for version in 1..=15u32 {
        assert_eq!(index.get(77, version).unwrap().unwrap().position, version as u64 * 100);
    }

    let all = index.range(&Range::all_of(77)).unwrap();
    assert_eq!(all.iter().map(|e| e.version).collect::<Vec<_>>(), (1..=15).collect::<Vec<_>>());
    assert_eq!(index.version(77).unwrap(), Some(15));
}

#[test]
fn test_many_streams_many_flushes() {
    init();
    let dir = TempDir::new().unwrap();
    let index = TableIndex::open(dir.path(), IndexOptions::default().flush_threshold(1000)).unwrap();

    // Interleave 20 streams so every flush holds a slice of each
    for version in 0..300u32 {
        for stream in 0..20u64 {
            index.add(stream, version, stream << 32 | version as u64).unwrap();
        }
    }
    assert_eq!(index.segment_count(), 6);
    assert_eq!(index.size(), 6000);

    for stream in 0..20u64 {
        let entries = index.range(&Range::all_of(stream)).unwrap();
        assert_eq!(entries.len(), 300);
        for (version, entry) in entries.iter().enumerate() {
            assert_eq!(entry.version, version as u32);
            assert_eq!(entry.position, stream << 32 | version as u64);
        }
        assert_eq!(index.version(stream).unwrap(), Some(299));
    }
    assert_eq!(index.version(20).unwrap(), None);

    let slice = index.range(&Range::of(5, 100, 110)).unwrap();
    assert_eq!(slice.iter().map(|e| e.version).collect::<Vec<_>>(), (100..110).collect::<Vec<_>>());
}

#[test]
fn test_midpoints_ascending_and_bounds_need_no_reads() {
    init();
    let mut entries: Vec<IndexEntry> = Vec::new();
    for stream in 100..110u64 {
        for version in 0..1000u32 {
            entries.push(IndexEntry::new(stream, version, 0));
        }
    }

    let storage = Arc::new(MemStorage::new("bounds.idx"));
    let segment = IndexSegment::write(storage.clone(), &entries, None).unwrap();
    let segment = IndexSegment::load(storage).unwrap().with_filter(segment.filter().cloned());

    let midpoints = segment.midpoints();
    assert!(midpoints.windows(2).all(|w| w[0].entry < w[1].entry));
    assert_eq!(midpoints.first().unwrap().entry, entries[0]);
    assert_eq!(midpoints.last().unwrap().entry, *entries.last().unwrap());
    assert_eq!(midpoints.len(), entries.len().div_ceil(ENTRIES_PER_PAGE) + 1);

    assert!(segment.range(&Range::all_of(99)).unwrap().is_empty());
    assert!(segment.range(&Range::all_of(110)).unwrap().is_empty());
    assert!(segment.range(&Range::from(109, 1000)).unwrap().is_empty());
    assert!(segment.range(&Range::of(100, 0, 0)).unwrap().is_empty());
    assert_eq!(segment.page_reads(), 0);

    assert_eq!(segment.range(&Range::all_of(105)).unwrap().len(), 1000);
    assert!(segment.page_reads() > 0);
}

#[test]
fn test_random_lookups_against_segment() {
    init();
    let mut entries: Vec<IndexEntry> = Vec::new();
    for stream in 0..50u64 {
        for version in 0..(stream as u32 * 7 + 1) {
            entries.push(IndexEntry::new(stream * 13, version, stream * 10_000 + version as u64));
        }
    }
    let storage = Arc::new(MemStorage::new("random.idx"));
    let segment = IndexSegment::write(storage, &entries, Some(0.01)).unwrap();

    let mut probes = entries.clone();
    probes.shuffle(&mut rand::rng());
    for probe in probes.iter().take(500) {
        let found = segment.get(probe.stream, probe.version).unwrap().unwrap();
        assert_eq!(found.position, probe.position);
    }
    for stream in 0..50u64 {
        let last = segment.last_of_stream(stream * 13).unwrap().unwrap();
        assert_eq!(last.version, stream as u32 * 7);
        assert!(segment.last_of_stream(stream * 13 + 1).unwrap().is_none());
    }
}

#[test]
fn test_index_survives_restart() {
    init();
    let dir = TempDir::new().unwrap();
    {
        let index = TableIndex::open(dir.path(), IndexOptions::default().flush_threshold(1000)).unwrap();
        for version in 0..2500u32 {
            index.add(1, version, version as u64).unwrap();
        }
        // Drop flushes the remaining head
    }

    let index = TableIndex::open(dir.path(), IndexOptions::default().flush_threshold(1000)).unwrap();
    assert_eq!(index.segment_count(), 3);
    assert_eq!(index.size(), 2500);
    assert_eq!(index.version(1).unwrap(), Some(2499));

    let all: Vec<IndexEntry> = index.iter().collect::<streamlog::Result<_>>().unwrap();
    assert_eq!(all.len(), 2500);
    assert!(all.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_corrupt_index_segment_fails_open() {
    init();
    let dir = TempDir::new().unwrap();
    {
        let index = TableIndex::open(dir.path(), IndexOptions::default().flush_threshold(1000)).unwrap();
        index.add(1, 0, 0).unwrap();
        index.close().unwrap();
    }
    std::fs::write(dir.path().join("00000000.idx"), [0u8; 8]).unwrap();

    let result = TableIndex::open(dir.path(), IndexOptions::default().flush_threshold(1000));
    assert!(matches!(result, Err(Error::Corruption(_))));
}

#[test]
fn test_log_and_index_together() {
    init();
    let dir = TempDir::new().unwrap();
    let options = Options::default().segment_size(8192).segment_bit_shift(24).preallocate(false);
    let log: LogAppender<String> = LogAppender::open(dir.path(), options).unwrap();
    let index = TableIndex::open(dir.path().join(INDEX_DIR), IndexOptions::default().flush_threshold(1000)).unwrap();

    for n in 0..3000u32 {
        let stream = (n % 3) as u64;
        let version = n / 3;
        let address = log.append(&format!("stream {} event {}", stream, version)).unwrap();
        index.add(stream, version, address).unwrap();
    }
    assert!(log.segment_count() > 1);
    assert!(index.segment_count() >= 3);

    for entry in index.range(&Range::of(2, 500, 520)).unwrap() {
        assert_eq!(log.get(entry.position).unwrap(), format!("stream 2 event {}", entry.version));
    }
}
