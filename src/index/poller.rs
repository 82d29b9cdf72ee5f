//! Blocking cursor over several streams of a table index.

use super::entry::{IndexEntry, Range};
use super::table::TableIndex;
use crate::error::Result;
use crate::poller::{wait_for_item, Poller, Step};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Cursor {
    /// Next expected version per stream. `u32::MAX + 1` once a stream is
    /// exhausted.
    next: BTreeMap<u64, u64>,
    buffer: VecDeque<IndexEntry>,
}

/// Tails a set of streams in a [`TableIndex`].
///
/// Every stream is delivered in strictly ascending version order without
/// duplicates. Entries of different streams are interleaved in batches of
/// at most `poll_batch_size` per stream.
pub struct IndexPoller {
    index: Arc<TableIndex>,
    cursor: Mutex<Cursor>,
    closed: AtomicBool,
}

impl IndexPoller {
    pub(crate) fn new(index: Arc<TableIndex>, streams: impl IntoIterator<Item = (u64, u32)>) -> Self {
        let next = streams.into_iter().map(|(stream, version)| (stream, version as u64)).collect();
        Self { index, cursor: Mutex::new(Cursor { next, buffer: VecDeque::new() }), closed: AtomicBool::new(false) }
    }

    /// Streams followed by this poller.
    pub fn streams(&self) -> Vec<u64> {
        self.cursor.lock().next.keys().copied().collect()
    }

    /// Next version the poller will return for `stream`, counting entries
    /// that are fetched but not yet consumed as pending.
    pub fn position(&self, stream: u64) -> Option<u64> {
        let cursor = self.cursor.lock();
        let next = *cursor.next.get(&stream)?;
        Some(cursor.buffer.iter().find(|e| e.stream == stream).map_or(next, |e| e.version as u64))
    }

    fn refill(&self, cursor: &mut Cursor) -> Result<()> {
        let batch = self.index.options().poll_batch_size;
        let Cursor { next, buffer } = cursor;
        for (&stream, next) in next.iter_mut() {
            if *next > u32::MAX as u64 {
                continue;
            }
            for entry in self.index.range_limit(&Range::from(stream, *next as u32), batch)? {
                // The same version may sit in two tiers
                if (entry.version as u64) < *next {
                    continue;
                }
                *next = entry.version as u64 + 1;
                buffer.push_back(entry);
            }
        }
        if !buffer.is_empty() {
            log::debug!("Index poller fetched {} entries", buffer.len());
        }
        Ok(())
    }

    fn try_next(&self, advance: bool) -> Result<Step<IndexEntry>> {
        let mut cursor = self.cursor.lock();
        // Read before refilling: entries added before close are then seen
        let finished = self.index.is_closed();
        if cursor.buffer.is_empty() {
            self.refill(&mut cursor)?;
        }
        let entry = if advance { cursor.buffer.pop_front() } else { cursor.buffer.front().copied() };
        Ok(match entry {
            Some(entry) => Step::Ready(entry),
            None if finished => Step::Finished,
            None => Step::Pending,
        })
    }

    fn wait(&self, timeout: Option<Duration>) -> Result<Option<IndexEntry>> {
        wait_for_item(self.index.signal(), &self.closed, self.index.poll_interval(), timeout, || self.try_next(true))
    }
}

impl Poller for IndexPoller {
    type Item = IndexEntry;

    fn peek(&self) -> Result<Option<IndexEntry>> {
        if self.is_closed() {
            return Ok(None);
        }
        match self.try_next(false)? {
            Step::Ready(entry) => Ok(Some(entry)),
            Step::Pending | Step::Finished => Ok(None),
        }
    }

    fn poll(&self) -> Result<Option<IndexEntry>> {
        self.wait(Some(Duration::ZERO))
    }

    fn poll_timeout(&self, timeout: Duration) -> Result<Option<IndexEntry>> {
        self.wait(Some(timeout))
    }

    fn take(&self) -> Result<Option<IndexEntry>> {
        self.wait(None)
    }

    fn head_of_log(&self) -> bool {
        let cursor = self.cursor.lock();
        cursor.buffer.is_empty()
            && cursor.next.iter().all(|(&stream, &next)| match self.index.version(stream) {
                Ok(Some(latest)) => (latest as u64) < next,
                Ok(None) => true,
                Err(e) => {
                    log::warn!("Index poller failed to read version of stream {}: {}", stream, e);
                    false
                }
            })
    }

    fn end_of_log(&self) -> bool {
        self.index.is_closed() && self.head_of_log()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.index.signal().notify();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
