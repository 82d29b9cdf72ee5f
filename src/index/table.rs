//! Two-tier table index: a skiplist head in memory plus immutable disk
//! segments.

use super::entry::{IndexEntry, Range};
use super::memory::MemIndex;
use super::poller::IndexPoller;
use super::segment::{IndexSegment, IndexSegmentIter};
use crate::config::IndexOptions;
use crate::error::{Error, Result};
use crate::filter::BloomFilter;
use crate::poller::Signal;
use crate::storage::DiskStorage;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Extension of index segment files
pub const INDEX_EXTENSION: &str = "idx";

/// Extension of bloom filter sidecar files
pub const BLOOM_EXTENSION: &str = "bloom";

/// File name of the index segment with the given id.
pub fn index_file_name(id: u64) -> String {
    format!("{:08}.{}", id, INDEX_EXTENSION)
}

fn bloom_file_name(id: u64) -> String {
    format!("{:08}.{}", id, BLOOM_EXTENSION)
}

#[derive(Debug, Default)]
struct Tiers {
    head: Arc<MemIndex>,
    segments: Vec<Arc<IndexSegment>>,
}

/// Maps `(stream, version)` to log addresses.
///
/// New entries go to the in-memory head. Once the head holds
/// `flush_threshold` entries it is written to a new index segment and
/// replaced by an empty one. Readers take a snapshot of both tiers, so a
/// flush never hides an entry from a concurrent lookup.
///
/// # Example
///
/// ```no_run
/// use streamlog::{IndexOptions, Range, TableIndex};
///
/// let index = TableIndex::open("/tmp/log/index", IndexOptions::default()).unwrap();
/// index.add(42, 0, 1024).unwrap();
/// assert_eq!(index.version(42).unwrap(), Some(0));
/// assert_eq!(index.range(&Range::all_of(42)).unwrap().len(), 1);
/// ```
#[derive(Debug)]
pub struct TableIndex {
    dir: PathBuf,
    options: IndexOptions,
    tiers: RwLock<Tiers>,
    /// Serializes add and flush; holds the id of the next segment file.
    writer: Mutex<u64>,
    signal: Arc<Signal>,
    closed: AtomicBool,
}

impl TableIndex {
    /// Opens the index in `dir`, loading every index segment found there.
    pub fn open<P: AsRef<Path>>(dir: P, options: IndexOptions) -> Result<Self> {
        options.validate()?;
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut segments = Vec::new();
        let mut next_id = 0;
        for (id, path) in list_index_files(&dir)? {
            let storage = Arc::new(DiskStorage::open(&path, false)?);
            let filter = if options.use_bloom_filter { load_filter(&dir.join(bloom_file_name(id))) } else { None };
            let segment = IndexSegment::load(storage)?.with_filter(filter);
            segments.push(Arc::new(segment));
            next_id = id + 1;
        }

        log::info!("Opened table index {:?}: {} segments", dir, segments.len());

        Ok(Self {
            dir,
            options,
            tiers: RwLock::new(Tiers { head: Arc::new(MemIndex::new()), segments }),
            writer: Mutex::new(next_id),
            signal: Arc::new(Signal::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Adds an entry. A second add for the same `(stream, version)`
    /// replaces the position while the entry is still in memory.
    ///
    /// A failed automatic flush is logged and does not fail the add. The
    /// entry stays in the head until a later flush succeeds.
    pub fn add(&self, stream: u64, version: u32, position: u64) -> Result<()> {
        let mut next_id = self.writer.lock();
        if self.is_closed() {
            return Err(Error::Closed("Table index is closed".to_string()));
        }

        let head = Arc::clone(&self.tiers.read().head);
        head.add(IndexEntry::new(stream, version, position));
        if head.len() >= self.options.flush_threshold {
            // The entry is indexed in the head either way; the next add or
            // flush retries the write.
            if let Err(e) = self.flush_locked(&mut next_id) {
                log::warn!(
                    "Failed to flush table index {:?}, keeping {} entries in memory: {}",
                    self.dir,
                    head.len(),
                    e
                );
            }
        }
        self.signal.notify();
        Ok(())
    }

    /// Writes the head to a new index segment now, regardless of size.
    pub fn flush(&self) -> Result<()> {
        let mut next_id = self.writer.lock();
        self.flush_locked(&mut next_id)
    }

    fn flush_locked(&self, next_id: &mut u64) -> Result<()> {
        let head = Arc::clone(&self.tiers.read().head);
        if head.is_empty() {
            return Ok(());
        }

        let id = *next_id;
        let segment = self.write_segment(id, &head.entries())?;
        *next_id += 1;

        {
            let mut tiers = self.tiers.write();
            tiers.segments.push(Arc::new(segment));
            tiers.head = Arc::new(MemIndex::new());
        }

        log::info!("Flushed {} index entries to {}", head.len(), index_file_name(id));
        Ok(())
    }

    /// Writes under a temporary name and renames, so a crash never leaves a
    /// partial `.idx` file behind. A failed write removes its temporary file
    /// so the next flush can reuse the id.
    fn write_segment(&self, id: u64, entries: &[IndexEntry]) -> Result<IndexSegment> {
        let path = self.dir.join(index_file_name(id));
        let tmp = self.dir.join(format!("{}.tmp", index_file_name(id)));
        let bloom = self.dir.join(bloom_file_name(id));

        if tmp.exists() {
            log::warn!("Removing stale temporary index file {:?}", tmp);
            fs::remove_file(&tmp)?;
        }

        let filter = match self.write_renamed(&tmp, &path, &bloom, entries) {
            Ok(filter) => filter,
            Err(e) => {
                for leftover in [&tmp, &bloom] {
                    if leftover.is_file() {
                        if let Err(cleanup) = fs::remove_file(leftover) {
                            log::warn!("Failed to remove {:?} after a failed flush: {}", leftover, cleanup);
                        }
                    }
                }
                return Err(e);
            }
        };

        let storage = Arc::new(DiskStorage::open(&path, false)?);
        Ok(IndexSegment::load(storage)?.with_filter(filter))
    }

    fn write_renamed(
        &self,
        tmp: &Path,
        path: &Path,
        bloom: &Path,
        entries: &[IndexEntry],
    ) -> Result<Option<BloomFilter>> {
        let rate = self.options.use_bloom_filter.then_some(self.options.bloom_false_positive_rate);
        let written = IndexSegment::write(Arc::new(DiskStorage::create(tmp)?), entries, rate)?;
        let filter = written.filter().cloned();
        drop(written);

        if let Some(filter) = &filter {
            filter.write_to(bloom)?;
        }
        fs::rename(tmp, path)?;
        Ok(filter)
    }

    fn snapshot(&self) -> (Arc<MemIndex>, Vec<Arc<IndexSegment>>) {
        let tiers = self.tiers.read();
        (Arc::clone(&tiers.head), tiers.segments.clone())
    }

    /// The entry for `(stream, version)`: the head first, then disk segments
    /// oldest to newest.
    pub fn get(&self, stream: u64, version: u32) -> Result<Option<IndexEntry>> {
        let (head, segments) = self.snapshot();
        if let Some(entry) = head.get(stream, version) {
            return Ok(Some(entry));
        }
        for segment in &segments {
            if let Some(entry) = segment.get(stream, version)? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Latest version of `stream`, `None` if the stream has no entries.
    pub fn version(&self, stream: u64) -> Result<Option<u32>> {
        let (head, segments) = self.snapshot();
        if let Some(entry) = head.last_of_stream(stream) {
            return Ok(Some(entry.version));
        }
        for segment in segments.iter().rev() {
            if let Some(entry) = segment.last_of_stream(stream)? {
                return Ok(Some(entry.version));
            }
        }
        Ok(None)
    }

    /// Entries inside `range`: disk segments in creation order, then the
    /// head.
    pub fn range(&self, range: &Range) -> Result<Vec<IndexEntry>> {
        self.range_limit(range, usize::MAX)
    }

    /// Like [`range`](Self::range), stopping after `limit` entries.
    pub fn range_limit(&self, range: &Range, limit: usize) -> Result<Vec<IndexEntry>> {
        let (head, segments) = self.snapshot();
        let mut found = Vec::new();
        for segment in &segments {
            if found.len() >= limit {
                return Ok(found);
            }
            found.extend(segment.range_limit(range, limit - found.len())?);
        }
        if found.len() < limit {
            found.extend(head.range(range, limit - found.len()));
        }
        Ok(found)
    }

    /// Every entry: disk segments oldest first, then the head.
    pub fn iter(&self) -> TableIndexIter {
        let (head, segments) = self.snapshot();
        TableIndexIter { segments: segments.into(), current: None, head: head.entries().into_iter() }
    }

    /// Blocking cursor over `streams`, each from version 0.
    pub fn poller(self: &Arc<Self>, streams: impl IntoIterator<Item = u64>) -> IndexPoller {
        IndexPoller::new(Arc::clone(self), streams.into_iter().map(|s| (s, 0)))
    }

    /// Blocking cursor over streams, each from the given version.
    pub fn poller_from(self: &Arc<Self>, streams: impl IntoIterator<Item = (u64, u32)>) -> IndexPoller {
        IndexPoller::new(Arc::clone(self), streams)
    }

    /// Flushes the head and rejects further adds. Blocked pollers wake up.
    pub fn close(&self) -> Result<()> {
        let mut next_id = self.writer.lock();
        if self.is_closed() {
            return Ok(());
        }
        let result = self.flush_locked(&mut next_id);
        self.closed.store(true, Ordering::Release);
        self.signal.notify();
        log::info!("Closed table index {:?}", self.dir);
        result
    }

    /// True once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Entries across both tiers.
    pub fn size(&self) -> u64 {
        let (head, segments) = self.snapshot();
        segments.iter().map(|s| s.entries()).sum::<u64>() + head.len() as u64
    }

    /// Entries still in memory.
    pub fn in_memory_items(&self) -> usize {
        self.tiers.read().head.len()
    }

    /// Number of disk segments.
    pub fn segment_count(&self) -> usize {
        self.tiers.read().segments.len()
    }

    /// Disk segments, oldest first.
    pub fn segments(&self) -> Vec<Arc<IndexSegment>> {
        self.tiers.read().segments.clone()
    }

    /// Index directory.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Index options.
    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    pub(crate) fn signal(&self) -> &Signal {
        &self.signal
    }

    pub(crate) fn poll_interval(&self) -> Duration {
        self.options.poll_interval
    }
}

impl Drop for TableIndex {
    fn drop(&mut self) {
        if !self.is_closed() {
            if let Err(e) = self.close() {
                log::warn!("Failed to close table index {:?}: {}", self.dir, e);
            }
        }
    }
}

/// Iterator returned by [`TableIndex::iter`].
pub struct TableIndexIter {
    segments: VecDeque<Arc<IndexSegment>>,
    current: Option<IndexSegmentIter>,
    head: std::vec::IntoIter<IndexEntry>,
}

impl Iterator for TableIndexIter {
    type Item = Result<IndexEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.current.as_mut().and_then(Iterator::next) {
                return Some(item);
            }
            match self.segments.pop_front() {
                Some(segment) => self.current = Some(segment.iter()),
                None => return self.head.next().map(Ok),
            }
        }
    }
}

/// Index segment files in `dir` with their ids, ascending. Leftover
/// temporary files from an interrupted flush are removed.
fn list_index_files(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        if name.ends_with(".tmp") {
            log::warn!("Removing unfinished index segment {:?}", path);
            fs::remove_file(&path)?;
            continue;
        }
        if path.extension().map_or(false, |ext| ext == INDEX_EXTENSION) {
            let id = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<u64>().ok())
                .ok_or_else(|| Error::corruption(format!("Unexpected index file name {:?}", path)))?;
            files.push((id, path));
        }
    }
    files.sort();
    Ok(files)
}

fn load_filter(path: &Path) -> Option<BloomFilter> {
    match BloomFilter::read_from(path) {
        Ok(filter) => Some(filter),
        Err(e) => {
            log::warn!("Bloom filter {:?} unavailable, segment will be read without it: {}", path, e);
            None
        }
    }
}
