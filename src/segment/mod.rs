//! # Segment - one bounded log file
//!
//! A segment is a header block followed by framed entries and, once rolled,
//! an end-of-log marker and an optional footer:
//!
//! ```text
//! [header: 1024 bytes][frame]...[frame][EOL marker][footer]
//! ```
//!
//! ## Lifecycle
//!
//! `EMPTY -> ACTIVE -> READ_ONLY`. An active segment accepts appends at its
//! write position. `roll` writes the end-of-log marker and footer, rewrites
//! the header with the final statistics and truncates the file to its exact
//! size. A rolled segment never accepts another write.
//!
//! ## Concurrency
//!
//! One writer, any number of readers. The writer publishes the new write
//! position only after the frame bytes are written, so readers bounded by the
//! published position never see a partial frame. Every append and roll
//! notifies the segment's [`Signal`], which wakes blocked pollers.
//!
//! ## Reader tracking
//!
//! Iterators and pollers register themselves with the segment. `delete`
//! removes the file immediately when no reader is live and otherwise defers
//! the removal to the last reader to go away.

mod frame;
mod header;
mod poller;
mod reader;

pub use frame::{checksum, FRAME_HEADER_SIZE};
pub use header::{Header, Marker, SegmentType, HEADER_SIZE};
pub use poller::SegmentPoller;
pub use reader::SegmentIterator;

use crate::config::Options;
use crate::error::{Error, Result};
use crate::poller::Signal;
use crate::storage::{read_exact_or_eof, Storage};
use frame::Frame;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub(crate) fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// Live reader count and deferred deletion state, shared with reader tokens.
#[derive(Debug)]
struct Lifecycle {
    storage: Arc<dyn Storage>,
    readers: Mutex<Readers>,
}

#[derive(Debug, Default)]
struct Readers {
    live: usize,
    marked: bool,
    deleted: bool,
}

impl Lifecycle {
    fn acquire(self: &Arc<Self>) -> ReaderToken {
        self.readers.lock().live += 1;
        ReaderToken { lifecycle: Arc::clone(self) }
    }

    fn release(&self) {
        let mut readers = self.readers.lock();
        readers.live -= 1;
        if readers.live == 0 && readers.marked {
            self.reclaim(&mut readers);
        }
    }

    /// Marks the segment for deletion and removes the file if no reader is
    /// live. Returns true if the file is gone.
    fn mark(&self) -> bool {
        let mut readers = self.readers.lock();
        readers.marked = true;
        if readers.live == 0 {
            self.reclaim(&mut readers);
            return true;
        }
        false
    }

    fn live(&self) -> usize {
        self.readers.lock().live
    }

    /// Called with the reader lock held.
    fn reclaim(&self, readers: &mut Readers) {
        if readers.deleted {
            return;
        }
        readers.deleted = true;
        match self.storage.delete() {
            Ok(()) => log::info!("Deleted segment {}", self.storage.name()),
            Err(e) => log::warn!("Failed to delete segment {}: {}", self.storage.name(), e),
        }
    }
}

/// Registration of one live reader. Dropping it unregisters the reader.
#[derive(Debug)]
pub(crate) struct ReaderToken {
    lifecycle: Arc<Lifecycle>,
}

impl Drop for ReaderToken {
    fn drop(&mut self) {
        self.lifecycle.release();
    }
}

/// A single log file holding entries of type `T`.
///
/// Shared between the writer and readers through `Arc`; iterators and
/// pollers hold their own `Arc` so they outlive any owner.
pub struct Segment<T> {
    storage: Arc<dyn Storage>,
    header: RwLock<Header>,

    /// Next write offset. Published after the bytes are written.
    position: AtomicU64,
    entries: AtomicU64,
    read_only: AtomicBool,
    closed: AtomicBool,

    /// Serializes append, roll and close.
    write_lock: Mutex<()>,

    signal: Arc<Signal>,
    lifecycle: Arc<Lifecycle>,
    flush_after_write: bool,
    poll_interval: Duration,
    _marker: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for Segment<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("name", &self.storage.name())
            .field("position", &self.position.load(Ordering::Acquire))
            .field("entries", &self.entries.load(Ordering::Acquire))
            .field("read_only", &self.read_only.load(Ordering::Acquire))
            .finish()
    }
}

impl<T: Serialize> Segment<T> {
    /// Appends an entry and returns the position it was written at.
    pub fn append(&self, entry: &T) -> Result<u64> {
        let payload = bincode::serialize(entry)?;
        self.append_bytes(&payload)
    }
}

impl<T: DeserializeOwned> Segment<T> {
    /// Reads the entry at `position`.
    pub fn get(&self, position: u64) -> Result<T> {
        let end = self.end();
        if position < HEADER_SIZE as u64 || position >= end {
            return Err(Error::addressing(format!(
                "Position {} is outside the log of segment {} ({}..{})",
                position,
                self.name(),
                HEADER_SIZE,
                end
            )));
        }

        match frame::read_frame(self.storage.as_ref(), position, end)? {
            Frame::Entry { payload, .. } => Ok(bincode::deserialize(&payload)?),
            Frame::EndOfLog | Frame::Eof => Err(Error::corruption(format!(
                "No entry at position {} of segment {}",
                position,
                self.name()
            ))),
        }
    }
}

impl<T> Segment<T> {
    /// Initializes a new segment on empty storage.
    ///
    /// Only `Active` and `MergeOutput` segments can be created.
    pub fn create(storage: Arc<dyn Storage>, segment_type: SegmentType, options: &Options) -> Result<Self> {
        Self::create_with_signal(storage, segment_type, options, Arc::new(Signal::new()))
    }

    pub(crate) fn create_with_signal(
        storage: Arc<dyn Storage>,
        segment_type: SegmentType,
        options: &Options,
        signal: Arc<Signal>,
    ) -> Result<Self> {
        if !segment_type.is_writable() {
            return Err(Error::invalid_argument(format!(
                "Cannot create a segment of type {:?}",
                segment_type
            )));
        }
        if read_header(storage.as_ref())?.is_some() {
            return Err(Error::invalid_state(format!(
                "Segment {} is already initialized",
                storage.name()
            )));
        }

        let header = Header::new(segment_type, &options.magic, options.segment_size, now_millis());
        storage.write_at(0, &header.encode()?)?;
        if options.preallocate {
            storage.preallocate(options.segment_size)?;
        }
        storage.flush()?;

        log::info!("Created segment {} ({:?})", storage.name(), segment_type);
        Ok(Self::new(storage, header, HEADER_SIZE as u64, 0, options, signal))
    }

    /// Opens a segment.
    ///
    /// EMPTY storage is initialized as a new `Active` segment. A writable
    /// segment is scanned from the start of its log to find the last intact
    /// frame, which becomes the write position. `checkpoint` is the last
    /// position recorded elsewhere. Recovering less than the checkpoint is
    /// logged, or is an error under `strict_recovery`.
    pub fn open(storage: Arc<dyn Storage>, options: &Options, checkpoint: Option<u64>) -> Result<Self> {
        Self::open_with_signal(storage, options, checkpoint, Arc::new(Signal::new()))
    }

    pub(crate) fn open_with_signal(
        storage: Arc<dyn Storage>,
        options: &Options,
        checkpoint: Option<u64>,
        signal: Arc<Signal>,
    ) -> Result<Self> {
        let header = match read_header(storage.as_ref())? {
            Some(header) => header,
            None => return Self::create_with_signal(storage, SegmentType::Active, options, signal),
        };

        if header.magic != options.magic {
            return Err(Error::corrupted_log(format!(
                "Segment {} has magic {:?}, expected {:?}",
                storage.name(),
                header.magic,
                options.magic
            )));
        }

        if header.segment_type == SegmentType::ReadOnly {
            let (position, entries) = (header.log_end, header.entries);
            let segment = Self::new(storage, header, position, entries, options, signal);
            segment.read_only.store(true, Ordering::Release);
            return Ok(segment);
        }

        let (position, entries) = recover(storage.as_ref(), header.log_start)?;
        if let Some(checkpoint) = checkpoint {
            if position < checkpoint {
                if options.strict_recovery {
                    return Err(Error::corrupted_log(format!(
                        "Segment {} recovered to {} but the checkpoint is {}",
                        storage.name(),
                        position,
                        checkpoint
                    )));
                }
                log::warn!(
                    "Segment {} recovered to {} behind checkpoint {}, using recovered position",
                    storage.name(),
                    position,
                    checkpoint
                );
            } else if position > checkpoint {
                log::info!(
                    "Segment {} recovered to {} past checkpoint {}",
                    storage.name(),
                    position,
                    checkpoint
                );
            }
        }

        log::info!("Opened segment {}: {} entries, position {}", storage.name(), entries, position);
        Ok(Self::new(storage, header, position, entries, options, signal))
    }

    fn new(
        storage: Arc<dyn Storage>,
        header: Header,
        position: u64,
        entries: u64,
        options: &Options,
        signal: Arc<Signal>,
    ) -> Self {
        let lifecycle = Arc::new(Lifecycle {
            storage: Arc::clone(&storage),
            readers: Mutex::new(Readers::default()),
        });
        Self {
            storage,
            header: RwLock::new(header),
            position: AtomicU64::new(position),
            entries: AtomicU64::new(entries),
            read_only: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            write_lock: Mutex::new(()),
            signal,
            lifecycle,
            flush_after_write: options.flush_after_write,
            poll_interval: options.poll_interval,
            _marker: PhantomData,
        }
    }

    /// Appends an already serialized payload.
    pub(crate) fn append_bytes(&self, payload: &[u8]) -> Result<u64> {
        if payload.is_empty() {
            return Err(Error::invalid_argument("Entries must not serialize to zero bytes"));
        }
        if payload.len() >= frame::EOL as usize {
            return Err(Error::invalid_argument(format!("Entry too large: {} bytes", payload.len())));
        }

        let _guard = self.write_lock.lock();
        self.check_writable()?;

        let position = self.position.load(Ordering::Acquire);
        let framed = frame::encode(payload);
        self.storage.write_at(position, &framed)?;
        if self.flush_after_write {
            self.storage.flush()?;
        }

        self.entries.fetch_add(1, Ordering::AcqRel);
        self.position.store(position + framed.len() as u64, Ordering::Release);
        self.signal.notify();
        Ok(position)
    }

    /// Iterates every entry from the start of the log.
    pub fn iter(self: &Arc<Self>) -> SegmentIterator<T> {
        self.iter_from(HEADER_SIZE as u64)
    }

    /// Iterates entries starting at `position`, which must be a frame
    /// boundary.
    pub fn iter_from(self: &Arc<Self>, position: u64) -> SegmentIterator<T> {
        SegmentIterator::new(Arc::clone(self), position.max(HEADER_SIZE as u64))
    }

    /// Blocking cursor starting at `position`.
    pub fn poller(self: &Arc<Self>, position: u64) -> SegmentPoller<T> {
        SegmentPoller::new(Arc::clone(self), position.max(HEADER_SIZE as u64))
    }

    /// Finalizes the segment.
    ///
    /// Writes the end-of-log marker and `footer`, rewrites the header as
    /// `ReadOnly` at `level` and truncates the file to its exact size.
    pub fn roll(&self, level: u32, footer: Option<&[u8]>) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.check_writable()?;

        let log_end = self.position.load(Ordering::Acquire);
        self.storage.write_at(log_end, &frame::eol_marker())?;

        let footer_start = log_end + FRAME_HEADER_SIZE as u64;
        let footer_end = match footer {
            Some(bytes) if !bytes.is_empty() => {
                self.storage.write_at(footer_start, bytes)?;
                footer_start + bytes.len() as u64
            }
            _ => footer_start,
        };

        let entries = self.entries.load(Ordering::Acquire);
        let mut header = self.header.read().clone();
        header.segment_type = SegmentType::ReadOnly;
        header.level = level;
        header.log_end = log_end;
        header.entries = entries;
        header.footer_start = footer_start;
        header.footer_end = footer_end;
        self.storage.write_at(0, &header.encode()?)?;
        *self.header.write() = header;

        // Read-only on disk from here on, even if trimming the file fails
        self.read_only.store(true, Ordering::Release);
        self.signal.notify();

        self.storage.truncate(footer_end)?;
        self.storage.flush()?;

        log::info!(
            "Rolled segment {}: {} entries, {} bytes, level {}",
            self.name(),
            entries,
            footer_end,
            level
        );
        Ok(())
    }

    /// Reads the footer of a rolled segment.
    pub fn read_footer(&self) -> Result<Vec<u8>> {
        if !self.is_read_only() {
            return Err(Error::invalid_state(format!(
                "Segment {} has no footer until it is rolled",
                self.name()
            )));
        }
        let marker = self.marker();
        let len = (marker.footer_end - marker.footer_start) as usize;
        if len == 0 {
            return Err(Error::invalid_state(format!("Segment {} has no footer", self.name())));
        }

        let footer = read_exact_or_eof(self.storage.as_ref(), marker.footer_start, len)?;
        if footer.len() < len {
            return Err(Error::corruption(format!(
                "Footer of segment {} is truncated: expected {} bytes, got {}",
                self.name(),
                len,
                footer.len()
            )));
        }
        Ok(footer)
    }
}

impl<T> Segment<T> {
    fn check_writable(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed(format!("Segment {} is closed", self.name())));
        }
        if self.read_only.load(Ordering::Acquire) {
            return Err(Error::ReadOnly(self.name().to_string()));
        }
        Ok(())
    }

    /// End of readable data.
    pub(crate) fn end(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    pub(crate) fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    pub(crate) fn signal(&self) -> &Arc<Signal> {
        &self.signal
    }

    pub(crate) fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub(crate) fn register_reader(&self) -> ReaderToken {
        self.lifecycle.acquire()
    }

    /// Position of the next append.
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    /// Number of entries in the segment.
    pub fn entries(&self) -> u64 {
        self.entries.load(Ordering::Acquire)
    }

    /// Merge level.
    pub fn level(&self) -> u32 {
        self.header.read().level
    }

    /// Creation time in milliseconds since the Unix epoch.
    pub fn created(&self) -> u64 {
        self.header.read().created
    }

    /// Current lifecycle state.
    pub fn segment_type(&self) -> SegmentType {
        self.header.read().segment_type
    }

    /// A copy of the header.
    pub fn header(&self) -> Header {
        self.header.read().clone()
    }

    /// Log and footer bounds.
    pub fn marker(&self) -> Marker {
        self.header.read().marker()
    }

    /// File name of the segment.
    pub fn name(&self) -> &str {
        self.storage.name()
    }

    /// True once the segment was rolled.
    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    /// True once the segment was closed or deleted.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of live iterators and pollers.
    pub fn readers(&self) -> usize {
        self.lifecycle.live()
    }

    /// Logical size in bytes: header plus written entries while active,
    /// the whole file once rolled.
    pub fn size(&self) -> u64 {
        if self.is_read_only() {
            self.header.read().footer_end
        } else {
            self.position()
        }
    }

    /// Flushes written entries to durable storage.
    pub fn flush(&self) -> Result<()> {
        self.storage.flush()
    }

    /// Flushes and closes the segment. Blocked pollers wake and end.
    pub fn close(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.signal.notify();
        self.storage.close()
    }

    /// Deletes the segment file.
    ///
    /// Returns `true` if the file was removed now and `false` if removal is
    /// deferred until the last live reader goes away.
    pub fn delete(&self) -> Result<bool> {
        {
            let _guard = self.write_lock.lock();
            self.closed.store(true, Ordering::Release);
        }
        self.signal.notify();

        if self.lifecycle.mark() {
            return Ok(true);
        }
        log::info!(
            "Deferring deletion of segment {} until {} readers close",
            self.name(),
            self.readers()
        );
        Ok(false)
    }
}

fn read_header(storage: &dyn Storage) -> Result<Option<Header>> {
    let block = read_exact_or_eof(storage, 0, HEADER_SIZE)?;
    if block.len() < HEADER_SIZE {
        if block.iter().all(|&b| b == 0) {
            return Ok(None);
        }
        return Err(Error::corrupted_log(format!(
            "Segment {} is shorter than its header: {} bytes",
            storage.name(),
            block.len()
        )));
    }
    Header::decode(&block).map_err(|e| {
        Error::corrupted_log(format!("Invalid header in segment {}: {}", storage.name(), e))
    })
}

/// Scans frames from `start` and returns the position after the last intact
/// frame and the number of intact frames.
fn recover(storage: &dyn Storage, start: u64) -> Result<(u64, u64)> {
    let limit = storage.len()?;
    let mut position = start;
    let mut entries = 0u64;

    loop {
        match frame::read_frame(storage, position, limit) {
            Ok(Frame::Entry { next, .. }) => {
                position = next;
                entries += 1;
            }
            Ok(Frame::EndOfLog) | Ok(Frame::Eof) => break,
            Err(Error::Io(e)) => return Err(Error::Io(e)),
            Err(e) => {
                log::warn!(
                    "Malformed entry in segment {} at {}, truncating recovery: {}",
                    storage.name(),
                    position,
                    e
                );
                break;
            }
        }
    }

    Ok((position, entries))
}
