//! Immutable on-disk index segment.
//!
//! File layout (little-endian):
//!
//! ```text
//! +------------------------------------------------------------+
//! | header: u32 entry_count | u64 footer_offset | u32 midpoints |
//! +------------------------------------------------------------+
//! | entries: entry_count x (u64 stream | u32 version | u64 pos) |
//! +------------------------------------------------------------+
//! | footer: midpoints x (entry | u64 file_position)             |
//! +------------------------------------------------------------+
//! ```
//!
//! Only the header and the footer are read on load. Entries are read one
//! page at a time, starting at a midpoint found by binary search.

use super::entry::{IndexEntry, Midpoint, Range, ENTRY_SIZE, MIDPOINT_SIZE};
use crate::error::{Error, Result};
use crate::filter::{BloomFilter, Filter};
use crate::storage::{read_exact_or_eof, Storage};
use bytes::{Buf, BufMut, BytesMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Size of the segment header.
pub const INDEX_HEADER_SIZE: usize = 16;

/// Size of one storage page.
pub const PAGE_SIZE: usize = 4096;

/// Entries that fit in one page; also the midpoint spacing.
pub const ENTRIES_PER_PAGE: usize = PAGE_SIZE / ENTRY_SIZE;

/// Bytes of entries in one full page.
const PAGE_BYTES: u64 = (ENTRIES_PER_PAGE * ENTRY_SIZE) as u64;

/// A sorted, immutable run of index entries with a sparse midpoint footer.
#[derive(Debug)]
pub struct IndexSegment {
    storage: Arc<dyn Storage>,
    entry_count: u64,
    footer_offset: u64,
    midpoints: Vec<Midpoint>,
    filter: Option<BloomFilter>,
    page_reads: AtomicU64,
}

impl IndexSegment {
    /// Writes `entries` to `storage` and returns the loaded segment.
    ///
    /// Entries must be non-empty and strictly ascending. When
    /// `bloom_false_positive_rate` is set, a stream filter is built as well;
    /// it is kept in memory and can be persisted by the caller.
    pub fn write(
        storage: Arc<dyn Storage>,
        entries: &[IndexEntry],
        bloom_false_positive_rate: Option<f64>,
    ) -> Result<Self> {
        if entries.is_empty() {
            return Err(Error::invalid_argument("Cannot write an empty index segment"));
        }
        if entries.len() > u32::MAX as usize {
            return Err(Error::invalid_argument(format!("Too many entries: {}", entries.len())));
        }
        if let Some(pair) = entries.windows(2).find(|w| w[0] >= w[1]) {
            return Err(Error::invalid_argument(format!(
                "Entries not strictly ascending at {:?} -> {:?}",
                pair[0].key(),
                pair[1].key()
            )));
        }
        if storage.len()? > 0 {
            storage.truncate(0)?;
        }

        // Placeholder header, backpatched once the footer is written
        storage.write_at(0, &[0u8; INDEX_HEADER_SIZE])?;

        let mut midpoints = Vec::with_capacity(entries.len() / ENTRIES_PER_PAGE + 2);
        let mut position = INDEX_HEADER_SIZE as u64;
        for chunk in entries.chunks(ENTRIES_PER_PAGE) {
            let mut page = BytesMut::with_capacity(chunk.len() * ENTRY_SIZE);
            for entry in chunk {
                entry.encode_into(&mut page);
            }
            midpoints.push(Midpoint { entry: chunk[0], position });
            storage.write_at(position, &page)?;
            position += page.len() as u64;
        }

        let last_position = position - ENTRY_SIZE as u64;
        if let Some(&last) = entries.last() {
            if midpoints.last().map(|m| m.position) != Some(last_position) {
                midpoints.push(Midpoint { entry: last, position: last_position });
            }
        }

        let footer_offset = position;
        let mut footer = BytesMut::with_capacity(midpoints.len() * MIDPOINT_SIZE);
        for midpoint in &midpoints {
            midpoint.encode_into(&mut footer);
        }
        storage.write_at(footer_offset, &footer)?;

        let mut header = BytesMut::with_capacity(INDEX_HEADER_SIZE);
        header.put_u32_le(entries.len() as u32);
        header.put_u64_le(footer_offset);
        header.put_u32_le(midpoints.len() as u32);
        storage.write_at(0, &header)?;
        storage.flush()?;

        let filter = bloom_false_positive_rate.map(|rate| build_filter(entries, rate));

        log::info!(
            "Wrote index segment {}: {} entries, {} midpoints",
            storage.name(),
            entries.len(),
            midpoints.len()
        );

        Ok(Self {
            storage,
            entry_count: entries.len() as u64,
            footer_offset,
            midpoints,
            filter,
            page_reads: AtomicU64::new(0),
        })
    }

    /// Loads the header and the midpoint footer of an existing segment.
    pub fn load(storage: Arc<dyn Storage>) -> Result<Self> {
        let header = read_exact_or_eof(storage.as_ref(), 0, INDEX_HEADER_SIZE)?;
        if header.len() < INDEX_HEADER_SIZE {
            return Err(Error::corruption(format!("Index segment {} has no header", storage.name())));
        }
        let mut buf = &header[..];
        let entry_count = buf.get_u32_le() as u64;
        let footer_offset = buf.get_u64_le();
        let midpoint_count = buf.get_u32_le() as usize;

        if entry_count == 0 || midpoint_count == 0 {
            return Err(Error::corruption(format!(
                "Index segment {} is empty or was not completely written",
                storage.name()
            )));
        }
        if footer_offset != INDEX_HEADER_SIZE as u64 + entry_count * ENTRY_SIZE as u64 {
            return Err(Error::corruption(format!(
                "Index segment {}: footer offset {} does not match {} entries",
                storage.name(),
                footer_offset,
                entry_count
            )));
        }

        let footer_len = midpoint_count * MIDPOINT_SIZE;
        let footer = read_exact_or_eof(storage.as_ref(), footer_offset, footer_len)?;
        if footer.len() < footer_len {
            return Err(Error::corruption(format!("Index segment {} footer truncated", storage.name())));
        }
        let midpoints = footer.chunks_exact(MIDPOINT_SIZE).map(Midpoint::decode).collect::<Result<Vec<_>>>()?;

        if midpoints.windows(2).any(|w| w[0].entry >= w[1].entry || w[0].position >= w[1].position) {
            return Err(Error::corruption(format!("Index segment {} midpoints not ascending", storage.name())));
        }
        let last_position = footer_offset - ENTRY_SIZE as u64;
        if midpoints.first().map(|m| m.position) != Some(INDEX_HEADER_SIZE as u64)
            || midpoints.last().map(|m| m.position) != Some(last_position)
        {
            return Err(Error::corruption(format!(
                "Index segment {} midpoints do not cover the entry region",
                storage.name()
            )));
        }

        log::debug!("Loaded index segment {}: {} entries", storage.name(), entry_count);

        Ok(Self { storage, entry_count, footer_offset, midpoints, filter: None, page_reads: AtomicU64::new(0) })
    }

    /// Attaches a stream filter consulted before any page read.
    pub fn with_filter(mut self, filter: Option<BloomFilter>) -> Self {
        self.filter = filter;
        self
    }

    /// The attached stream filter.
    pub fn filter(&self) -> Option<&BloomFilter> {
        self.filter.as_ref()
    }

    /// Reads the page of entries starting at `position`.
    ///
    /// `position` must be the start of a page, the position of a page-start
    /// midpoint. The last page is cut short at the footer.
    pub fn read_page(&self, position: u64) -> Result<Vec<IndexEntry>> {
        if position < INDEX_HEADER_SIZE as u64 || position >= self.footer_offset {
            return Err(Error::addressing(format!(
                "Page position {} outside entry region [{}, {})",
                position, INDEX_HEADER_SIZE, self.footer_offset
            )));
        }
        if (position - INDEX_HEADER_SIZE as u64) % PAGE_BYTES != 0 {
            return Err(Error::addressing(format!("Page position {} is not page-aligned", position)));
        }

        let len = PAGE_BYTES.min(self.footer_offset - position);
        let data = read_exact_or_eof(self.storage.as_ref(), position, len as usize)?;
        if (data.len() as u64) < len {
            return Err(Error::corruption(format!(
                "Index segment {}: short page read at {}",
                self.storage.name(),
                position
            )));
        }
        self.page_reads.fetch_add(1, Ordering::Relaxed);
        log::debug!("Read index page at {} from {}", position, self.storage.name());

        data.chunks_exact(ENTRY_SIZE).map(IndexEntry::decode).collect()
    }

    /// Entries inside `range`, ascending.
    pub fn range(&self, range: &Range) -> Result<Vec<IndexEntry>> {
        self.range_limit(range, usize::MAX)
    }

    /// Entries inside `range`, ascending, at most `limit` of them.
    pub fn range_limit(&self, range: &Range, limit: usize) -> Result<Vec<IndexEntry>> {
        let mut found = Vec::new();
        if range.is_empty() || limit == 0 || !self.may_hold(range) {
            return Ok(found);
        }

        let mut position = page_start(self.midpoints[self.floor_midpoint(range.start_key())].position);
        while position < self.footer_offset {
            let page = self.read_page(position)?;
            position += (page.len() * ENTRY_SIZE) as u64;
            for entry in page {
                if range.is_past(&entry) {
                    return Ok(found);
                }
                if range.contains(&entry) {
                    found.push(entry);
                    if found.len() >= limit {
                        return Ok(found);
                    }
                }
            }
        }
        Ok(found)
    }

    /// The entry for `(stream, version)`.
    pub fn get(&self, stream: u64, version: u32) -> Result<Option<IndexEntry>> {
        let range = Range { stream, start: version, end: version as u64 + 1 };
        Ok(self.range_limit(&range, 1)?.into_iter().next())
    }

    /// Highest-versioned entry of `stream` in this segment.
    pub fn last_of_stream(&self, stream: u64) -> Result<Option<IndexEntry>> {
        if !self.may_hold(&Range::all_of(stream)) {
            return Ok(None);
        }

        let mut last = None;
        let mut position = page_start(self.midpoints[self.floor_midpoint((stream, u32::MAX))].position);
        while position < self.footer_offset {
            let page = self.read_page(position)?;
            position += (page.len() * ENTRY_SIZE) as u64;
            for entry in page {
                if entry.stream > stream {
                    return Ok(last);
                }
                if entry.stream == stream {
                    last = Some(entry);
                }
            }
        }
        Ok(last)
    }

    /// Lazy iterator over every entry, one page at a time.
    pub fn iter(self: &Arc<Self>) -> IndexSegmentIter {
        IndexSegmentIter {
            segment: Arc::clone(self),
            position: INDEX_HEADER_SIZE as u64,
            page: Vec::new().into_iter(),
            failed: false,
        }
    }

    /// Index of the midpoint at or immediately before `key`, clamped to 0.
    fn floor_midpoint(&self, key: (u64, u32)) -> usize {
        match self.midpoints.binary_search_by(|m| m.entry.key().cmp(&key)) {
            Ok(i) => i,
            Err(insertion) => insertion.saturating_sub(1),
        }
    }

    /// Cheap checks that need no page read.
    fn may_hold(&self, range: &Range) -> bool {
        let (Some(first), Some(last)) = (self.first(), self.last()) else {
            return false;
        };
        if range.start_key() > last.key() || range.is_past(&first) {
            return false;
        }
        match &self.filter {
            Some(filter) => filter.may_contain(range.stream),
            None => true,
        }
    }

    /// Smallest entry.
    pub fn first(&self) -> Option<IndexEntry> {
        self.midpoints.first().map(|m| m.entry)
    }

    /// Largest entry.
    pub fn last(&self) -> Option<IndexEntry> {
        self.midpoints.last().map(|m| m.entry)
    }

    /// Midpoint footer.
    pub fn midpoints(&self) -> &[Midpoint] {
        &self.midpoints
    }

    /// Number of entries.
    pub fn entries(&self) -> u64 {
        self.entry_count
    }

    /// File offset of the midpoint footer.
    pub fn footer_offset(&self) -> u64 {
        self.footer_offset
    }

    /// Pages read so far.
    pub fn page_reads(&self) -> u64 {
        self.page_reads.load(Ordering::Relaxed)
    }

    /// Storage name.
    pub fn name(&self) -> &str {
        self.storage.name()
    }

    /// Removes the backing storage.
    pub fn delete(&self) -> Result<()> {
        self.storage.delete()
    }
}

/// Start of the page holding the entry at `position`. The trailing midpoint
/// of a segment points into its last page rather than at a page start.
fn page_start(position: u64) -> u64 {
    let header = INDEX_HEADER_SIZE as u64;
    header + (position - header) / PAGE_BYTES * PAGE_BYTES
}

fn build_filter(entries: &[IndexEntry], false_positive_rate: f64) -> BloomFilter {
    let mut streams: Vec<u64> = entries.iter().map(|e| e.stream).collect();
    streams.dedup();
    let mut filter = BloomFilter::new(streams.len(), false_positive_rate);
    for stream in streams {
        filter.add(stream);
    }
    filter
}

/// Iterator returned by [`IndexSegment::iter`].
pub struct IndexSegmentIter {
    segment: Arc<IndexSegment>,
    position: u64,
    page: std::vec::IntoIter<IndexEntry>,
    failed: bool,
}

impl Iterator for IndexSegmentIter {
    type Item = Result<IndexEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if let Some(entry) = self.page.next() {
            return Some(Ok(entry));
        }
        if self.position >= self.segment.footer_offset {
            return None;
        }
        match self.segment.read_page(self.position) {
            Ok(page) => {
                self.position += (page.len() * ENTRY_SIZE) as u64;
                self.page = page.into_iter();
                self.page.next().map(Ok)
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
