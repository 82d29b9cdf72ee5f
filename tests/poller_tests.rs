// Poller Tests for streamlog
// Blocking cursors over the log and the index under concurrent writers

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use streamlog::{IndexOptions, LogAppender, Options, Poller, TableIndex};
use tempfile::TempDir;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn log_options() -> Options {
    Options::default()
        .segment_size(64 * 1024)
        .segment_bit_shift(24)
        .preallocate(false)
        .poll_interval(Duration::from_millis(100))
}

fn index_options() -> IndexOptions {
    IndexOptions::default().poll_interval(Duration::from_millis(100))
}

#[test]
fn test_take_wakes_on_poller_close() {
    init();
    let dir = TempDir::new().unwrap();
    let index = Arc::new(TableIndex::open(dir.path(), index_options()).unwrap());
    let poller = Arc::new(index.poller([42]));

    let reader = {
        let poller = Arc::clone(&poller);
        thread::spawn(move || {
            let start = Instant::now();
            let item = poller.take().unwrap();
            (item, start.elapsed())
        })
    };

    thread::sleep(Duration::from_millis(100));
    poller.close();

    let (item, elapsed) = reader.join().unwrap();
    assert!(item.is_none());
    assert!(elapsed < Duration::from_secs(1), "take returned after {:?}", elapsed);
}

#[test]
fn test_log_take_wakes_on_poller_close() {
    init();
    let dir = TempDir::new().unwrap();
    let log: LogAppender<u64> = LogAppender::open(dir.path(), log_options()).unwrap();
    let poller = Arc::new(log.poller(0).unwrap());

    let reader = {
        let poller = Arc::clone(&poller);
        thread::spawn(move || {
            let start = Instant::now();
            (poller.take().unwrap(), start.elapsed())
        })
    };

    thread::sleep(Duration::from_millis(100));
    poller.close();

    let (item, elapsed) = reader.join().unwrap();
    assert!(item.is_none());
    assert!(elapsed < Duration::from_secs(1));
    assert!(poller.is_closed());
}

#[test]
fn test_poll_timeout_returns_early_on_data() {
    init();
    let dir = TempDir::new().unwrap();
    let log: Arc<LogAppender<u64>> = Arc::new(LogAppender::open(dir.path(), log_options()).unwrap());
    let poller = log.poller(0).unwrap();

    let writer = {
        let log = Arc::clone(&log);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            log.append(&11).unwrap();
        })
    };

    let start = Instant::now();
    assert_eq!(poller.poll_timeout(Duration::from_secs(5)).unwrap(), Some(11));
    assert!(start.elapsed() < Duration::from_secs(2));
    writer.join().unwrap();
}

#[test]
fn test_peek_is_idempotent() {
    init();
    let dir = TempDir::new().unwrap();
    let log: LogAppender<String> = LogAppender::open(dir.path(), log_options()).unwrap();
    log.append(&"first".to_string()).unwrap();
    log.append(&"second".to_string()).unwrap();

    let poller = log.poller(0).unwrap();
    let before = poller.position();
    for _ in 0..10 {
        assert_eq!(poller.peek().unwrap().as_deref(), Some("first"));
    }
    assert_eq!(poller.position(), before);
    assert_eq!(poller.poll().unwrap().as_deref(), Some("first"));
    assert_eq!(poller.peek().unwrap().as_deref(), Some("second"));

    let index = Arc::new(TableIndex::open(dir.path().join("index"), index_options()).unwrap());
    index.add(1, 0, 10).unwrap();
    let index_poller = index.poller([1]);
    for _ in 0..10 {
        assert_eq!(index_poller.peek().unwrap().unwrap().position, 10);
    }
    assert_eq!(index_poller.position(1), Some(0));
}

#[test]
fn test_log_writer_and_poller_ordering() {
    init();
    let dir = TempDir::new().unwrap();
    let log: Arc<LogAppender<u64>> = Arc::new(LogAppender::open(dir.path(), log_options()).unwrap());
    let poller = log.poller(0).unwrap();
    const N: u64 = 100_000;

    let writer = {
        let log = Arc::clone(&log);
        thread::spawn(move || {
            for i in 0..N {
                log.append(&i).unwrap();
            }
        })
    };

    for expected in 0..N {
        assert_eq!(poller.take().unwrap(), Some(expected));
    }
    writer.join().unwrap();
    assert!(log.segment_count() > 1);
    assert!(poller.poll().unwrap().is_none());
    assert!(poller.head_of_log());
}

/// One writer adds versions 0..N-1 of a single stream while a poller takes
/// them; every version must arrive once and in order.
#[test]
fn test_index_writer_and_poller_ordering() {
    init();
    let dir = TempDir::new().unwrap();
    let index = Arc::new(TableIndex::open(dir.path(), index_options().flush_threshold(100_000)).unwrap());
    let poller = index.poller([9]);
    const N: u32 = 1_000_000;

    let writer = {
        let index = Arc::clone(&index);
        thread::spawn(move || {
            for version in 0..N {
                index.add(9, version, version as u64 * 16).unwrap();
            }
        })
    };

    for expected in 0..N {
        let entry = poller.take().unwrap().unwrap();
        assert_eq!(entry.version, expected);
        assert_eq!(entry.position, expected as u64 * 16);
    }
    writer.join().unwrap();

    assert_eq!(index.segment_count(), 10);
    assert!(poller.poll().unwrap().is_none());
    assert!(poller.head_of_log());
}

#[test]
fn test_index_close_ends_pollers() {
    init();
    let dir = TempDir::new().unwrap();
    let index = Arc::new(TableIndex::open(dir.path(), index_options()).unwrap());
    let poller = Arc::new(index.poller([1, 2]));

    let reader = {
        let poller = Arc::clone(&poller);
        thread::spawn(move || {
            let mut seen = Vec::new();
            while let Some(entry) = poller.take().unwrap() {
                seen.push((entry.stream, entry.version));
            }
            seen
        })
    };

    for version in 0..50u32 {
        index.add(1, version, 0).unwrap();
        index.add(2, version, 0).unwrap();
    }
    index.close().unwrap();

    let seen = reader.join().unwrap();
    assert_eq!(seen.len(), 100);
    for stream in [1u64, 2] {
        let versions: Vec<u32> = seen.iter().filter(|(s, _)| *s == stream).map(|(_, v)| *v).collect();
        assert_eq!(versions, (0..50).collect::<Vec<_>>());
    }
    assert!(poller.end_of_log());
}
