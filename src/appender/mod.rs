//! # Log Appender - one logical log over many segments
//!
//! The appender owns an ordered list of segments in one directory and hands
//! out 64-bit addresses that pack the segment index with the offset inside
//! the segment (see [`Addressing`]).
//!
//! ## Directory layout
//!
//! ```text
//! metadata.json    settings fixed at creation (segment size, bit shift, magic)
//! state.json       advisory checkpoint: next write address, entry count, segments
//! 00000000.seg     segment 0
//! 00000001.seg     segment 1
//! ...
//! ```
//!
//! ## Rolling
//!
//! After every append the current segment is checked against the size
//! threshold and the optional roll frequency. Rolling finalizes the current
//! segment and only then publishes a new one, so a reader that sees segment
//! `n + 1` knows segment `n` is complete. An entry never straddles two
//! segments.
//!
//! ## Concurrency
//!
//! Appends are serialized by an internal writer lock. Readers take the
//! segment list lock only long enough to clone a segment handle.

mod address;
mod poller;
mod scanner;
mod state;

pub use address::Addressing;
pub use poller::LogPoller;
pub use scanner::LogScanner;
pub use state::{segment_file_name, Metadata, State, METADATA_FILE, STATE_FILE};

use crate::config::Options;
use crate::error::{Error, Result};
use crate::poller::Signal;
use crate::segment::{now_millis, Segment, SegmentType, FRAME_HEADER_SIZE, HEADER_SIZE};
use crate::storage::{DiskStorage, Storage};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Segment list and wake-up state shared with scanners and pollers.
pub(crate) struct Shared<T> {
    segments: RwLock<Vec<Arc<Segment<T>>>>,
    addressing: Addressing,
    signal: Arc<Signal>,
    poll_interval: Duration,
    closed: AtomicBool,
}

impl<T> Shared<T> {
    pub(crate) fn segment(&self, index: usize) -> Option<Arc<Segment<T>>> {
        self.segments.read().get(index).cloned()
    }

    pub(crate) fn segment_count(&self) -> usize {
        self.segments.read().len()
    }

    pub(crate) fn addressing(&self) -> Addressing {
        self.addressing
    }

    pub(crate) fn signal(&self) -> &Arc<Signal> {
        &self.signal
    }

    pub(crate) fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn current(&self) -> Result<(usize, Arc<Segment<T>>)> {
        let segments = self.segments.read();
        let index = segments
            .len()
            .checked_sub(1)
            .ok_or_else(|| Error::invalid_state("Log has no segments"))?;
        Ok((index, Arc::clone(&segments[index])))
    }

    /// Segment index and segment of an address, checked against the live list.
    fn locate(&self, address: u64) -> Result<(usize, u64, Arc<Segment<T>>)> {
        let (index, offset) = self.addressing.decode(address);
        let segments = self.segments.read();
        let segment = usize::try_from(index)
            .ok()
            .and_then(|i| segments.get(i))
            .ok_or_else(|| {
                Error::addressing(format!(
                    "No segment {} for address {}, {} segments available",
                    index,
                    address,
                    segments.len()
                ))
            })?;
        Ok((index as usize, offset, Arc::clone(segment)))
    }
}

struct WriterState {
    last_roll_time: u64,
}

/// A segmented append-only log of entries of type `T`.
///
/// # Example
///
/// ```rust,no_run
/// use streamlog::{LogAppender, Options};
///
/// # fn main() -> Result<(), streamlog::Error> {
/// let log: LogAppender<String> = LogAppender::open("./events", Options::default())?;
/// let address = log.append(&"hello".to_string())?;
/// assert_eq!(log.get(address)?, "hello");
///
/// for entry in log.scanner()? {
///     println!("{}", entry?);
/// }
/// log.close()?;
/// # Ok(())
/// # }
/// ```
pub struct LogAppender<T> {
    dir: PathBuf,
    options: Options,
    shared: Arc<Shared<T>>,
    writer: Mutex<WriterState>,
    entry_count: AtomicU64,
}

impl<T> LogAppender<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Opens the log in `dir`, creating it if needed.
    ///
    /// Settings recorded in `metadata.json` win over `options`. The last
    /// segment is recovered using the checkpoint in `state.json`.
    pub fn open<P: AsRef<Path>>(dir: P, options: Options) -> Result<Self> {
        options.validate()?;
        let dir = dir.as_ref().to_path_buf();

        if !dir.exists() {
            if !options.create_if_missing {
                return Err(Error::invalid_argument(format!(
                    "Log directory {:?} does not exist",
                    dir
                )));
            }
            fs::create_dir_all(&dir)?;
        }

        let metadata_path = dir.join(METADATA_FILE);
        match state::read_json::<Metadata>(&metadata_path)? {
            Some(metadata) => {
                let mut options = options;
                metadata.apply_to(&mut options);
                options.validate()?;
                Self::load(dir, options)
            }
            None => Self::create(dir, options),
        }
    }

    fn create(dir: PathBuf, options: Options) -> Result<Self> {
        let existing = state::list_segment_files(&dir)?;
        if !existing.is_empty() {
            return Err(Error::corrupted_log(format!(
                "Log directory {:?} has segment files but no {}",
                dir, METADATA_FILE
            )));
        }

        let created = now_millis();
        state::write_json(&dir.join(METADATA_FILE), &Metadata::new(&options, created))?;
        log::info!("Creating log in {:?}", dir);

        let appender = Self::with_segments(dir, options, Vec::new(), created)?;
        let segment = appender.create_segment(0)?;
        appender.shared.segments.write().push(Arc::new(segment));
        appender.write_state()?;
        Ok(appender)
    }

    fn load(dir: PathBuf, options: Options) -> Result<Self> {
        log::info!("Opening log in {:?}", dir);
        let state: State = state::read_json(&dir.join(STATE_FILE))?.ok_or_else(|| {
            Error::corrupted_log(format!("Log directory {:?} has no {}", dir, STATE_FILE))
        })?;
        if state.segments.is_empty() {
            return Err(Error::corrupted_log(format!("{} lists no segments", STATE_FILE)));
        }

        for name in state::list_segment_files(&dir)? {
            if !state.segments.contains(&name) {
                log::warn!("Segment file {} is not present in the state, ignoring", name);
            }
        }

        let addressing = Addressing::new(options.segment_bit_shift)?;
        let (checkpoint_segment, checkpoint) = addressing.decode(state.position);
        let last = state.segments.len() - 1;
        let signal = Arc::new(Signal::new());

        let mut segments = Vec::with_capacity(state.segments.len());
        for (index, name) in state.segments.iter().enumerate() {
            let path = dir.join(name);
            if !path.exists() {
                return Err(Error::corrupted_log(format!("Segment {} is missing", name)));
            }
            let storage: Arc<dyn Storage> = Arc::new(DiskStorage::open(&path, false)?);
            let checkpoint = (index == last && checkpoint_segment == index as u64).then_some(checkpoint);
            let segment =
                Segment::open_with_signal(storage, &options, checkpoint, Arc::clone(&signal))?;

            if index < last && !segment.is_read_only() {
                return Err(Error::corrupted_log(format!(
                    "Segment {} is not the last segment but was never rolled",
                    name
                )));
            }
            segments.push(Arc::new(segment));
        }

        let appender = Self::with_segments(dir, options, segments, state.last_roll_time)?;
        let entries: u64 = appender.shared.segments.read().iter().map(|s| s.entries()).sum();
        if entries != state.entry_count {
            log::info!("Recovered {} entries, state recorded {}", entries, state.entry_count);
        }
        appender.entry_count.store(entries, Ordering::Release);

        // Crashed between rolling the last segment and creating the next one
        if let Ok((index, current)) = appender.shared.current() {
            if current.is_read_only() {
                log::warn!("Last segment {} is read-only, starting a new one", current.name());
                let segment = appender.create_segment(index + 1)?;
                appender.shared.segments.write().push(Arc::new(segment));
            }
        }

        appender.write_state()?;
        log::info!(
            "Opened log {:?}: {} segments, {} entries",
            appender.dir,
            appender.segment_count(),
            entries
        );
        Ok(appender)
    }

    fn with_segments(
        dir: PathBuf,
        options: Options,
        segments: Vec<Arc<Segment<T>>>,
        last_roll_time: u64,
    ) -> Result<Self> {
        let addressing = Addressing::new(options.segment_bit_shift)?;
        let signal = segments
            .first()
            .map(|s| Arc::clone(s.signal()))
            .unwrap_or_else(|| Arc::new(Signal::new()));
        let shared = Arc::new(Shared {
            segments: RwLock::new(segments),
            addressing,
            signal,
            poll_interval: options.poll_interval,
            closed: AtomicBool::new(false),
        });
        Ok(Self {
            dir,
            options,
            shared,
            writer: Mutex::new(WriterState { last_roll_time }),
            entry_count: AtomicU64::new(0),
        })
    }

    fn create_segment(&self, index: usize) -> Result<Segment<T>> {
        if index as u64 > self.shared.addressing.max_segments() {
            return Err(Error::addressing(format!(
                "Segment index {} exceeds the maximum of {}",
                index,
                self.shared.addressing.max_segments()
            )));
        }

        let path = self.dir.join(segment_file_name(index));
        if path.exists() {
            log::warn!("Replacing uncommitted segment file {:?}", path);
            fs::remove_file(&path)?;
        }
        let storage: Arc<dyn Storage> = Arc::new(DiskStorage::create(&path)?);
        Segment::create_with_signal(
            storage,
            SegmentType::Active,
            &self.options,
            Arc::clone(&self.shared.signal),
        )
    }

    /// Appends an entry and returns its address.
    ///
    /// Rolls to a new segment afterwards if the current one passed the size
    /// threshold or the roll frequency. Once the entry is written its address
    /// is returned even if that roll fails; the roll is retried by the next
    /// append.
    ///
    /// An entry too large for the offset bits of an address is rejected with
    /// [`Error::Addressing`] before anything is written.
    pub fn append(&self, entry: &T) -> Result<u64> {
        let payload = bincode::serialize(entry)?;

        let mut writer = self.writer.lock();
        if self.shared.is_closed() {
            return Err(Error::Closed("Log appender is closed".to_string()));
        }

        let (index, segment) = self.segment_for(&mut writer, payload.len())?;
        let offset = segment.append_bytes(&payload)?;
        let address = self.shared.addressing.encode(index as u64, offset)?;
        self.entry_count.fetch_add(1, Ordering::AcqRel);

        if self.should_roll(&segment, &writer) {
            if let Err(e) = self.roll_locked(&mut writer) {
                log::warn!(
                    "Entry written at {} but rolling segment {} failed, retrying on the next append: {}",
                    address,
                    segment.name(),
                    e
                );
            }
        }
        Ok(address)
    }

    /// The segment the next entry of `len` payload bytes goes to.
    ///
    /// The frame and a closing end-of-log marker must end within the offset
    /// range of an address. When they do not fit behind the entries already
    /// in the current segment, the log rolls first. A current segment left
    /// read-only by a failed roll gets its successor here.
    fn segment_for(&self, writer: &mut WriterState, len: usize) -> Result<(usize, Arc<Segment<T>>)> {
        let max_offset = self.shared.addressing.max_offset();
        let framed = (len + 2 * FRAME_HEADER_SIZE) as u64;
        if HEADER_SIZE as u64 + framed > max_offset {
            return Err(Error::addressing(format!(
                "Entry of {} bytes does not fit in a segment addressed by {} bits",
                len,
                self.shared.addressing.shift()
            )));
        }

        let (_, current) = self.shared.current()?;
        if current.is_read_only() {
            log::info!("Segment {} was rolled without a successor, creating it", current.name());
            self.roll_locked(writer)?;
        } else if current.position() + framed > max_offset {
            log::info!("Entry of {} bytes does not fit in segment {}, rolling first", len, current.name());
            self.roll_locked(writer)?;
        }
        self.shared.current()
    }

    fn should_roll(&self, segment: &Segment<T>, writer: &WriterState) -> bool {
        if segment.size() > self.options.segment_size {
            return true;
        }
        match self.options.roll_frequency {
            Some(frequency) => {
                let elapsed = now_millis().saturating_sub(writer.last_roll_time);
                elapsed > frequency.as_millis() as u64 && segment.entries() > 0
            }
            None => false,
        }
    }

    fn roll_locked(&self, writer: &mut WriterState) -> Result<()> {
        let (index, current) = self.shared.current()?;
        log::info!("Rolling log {:?} at segment {}", self.dir, current.name());

        // Already finalized when an earlier roll failed to create the successor
        if !current.is_read_only() {
            current.roll(0, None)?;
        }
        let segment = self.create_segment(index + 1)?;
        self.shared.segments.write().push(Arc::new(segment));
        writer.last_roll_time = now_millis();

        self.write_state_with(writer.last_roll_time)
    }

    /// Rolls the current segment now, regardless of its size.
    pub fn roll(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        if self.shared.is_closed() {
            return Err(Error::Closed("Log appender is closed".to_string()));
        }
        self.roll_locked(&mut writer)
    }

    /// Reads the entry at `address`.
    pub fn get(&self, address: u64) -> Result<T> {
        let (_, offset, segment) = self.shared.locate(address)?;
        segment.get(offset)
    }

    /// Iterates the whole log from the first entry.
    pub fn scanner(&self) -> Result<LogScanner<T>> {
        self.scanner_from(0)
    }

    /// Iterates the log starting at `address`.
    pub fn scanner_from(&self, address: u64) -> Result<LogScanner<T>> {
        let (index, offset, segment) = self.shared.locate(address)?;
        Ok(LogScanner::new(Arc::clone(&self.shared), index, segment.iter_from(offset)))
    }

    /// Blocking cursor starting at `address`, following the log across rolls.
    pub fn poller(&self, address: u64) -> Result<LogPoller<T>> {
        let (index, offset, segment) = self.shared.locate(address)?;
        Ok(LogPoller::new(Arc::clone(&self.shared), index, segment.poller(offset)))
    }
}

impl<T> LogAppender<T> {
    /// Address of the next write.
    pub fn position(&self) -> u64 {
        let segments = self.shared.segments.read();
        match segments.last() {
            Some(segment) => self.shared.addressing.pack(segments.len() as u64 - 1, segment.position()),
            None => 0,
        }
    }

    /// Total number of entries appended.
    pub fn entries(&self) -> u64 {
        self.entry_count.load(Ordering::Acquire)
    }

    /// File names of all segments in address order.
    pub fn segments(&self) -> Vec<String> {
        self.shared.segments.read().iter().map(|s| s.name().to_string()).collect()
    }

    /// Number of segments.
    pub fn segment_count(&self) -> usize {
        self.shared.segment_count()
    }

    /// Sum of the segment sizes in bytes.
    pub fn size(&self) -> u64 {
        self.shared.segments.read().iter().map(|s| s.size()).sum()
    }

    /// The address scheme of this log.
    pub fn addressing(&self) -> Addressing {
        self.shared.addressing
    }

    /// Effective options, including the persisted settings.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Directory of the log.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Flushes the current segment and saves the state file.
    pub fn flush(&self) -> Result<()> {
        let writer = self.writer.lock();
        if let Ok((_, segment)) = self.shared.current() {
            segment.flush()?;
        }
        self.write_state_with(writer.last_roll_time)
    }

    /// Flushes, saves the state file and closes every segment.
    ///
    /// Blocked pollers wake and return `None`.
    pub fn close(&self) -> Result<()> {
        let writer = self.writer.lock();
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let segments: Vec<Arc<Segment<T>>> = self.shared.segments.read().clone();
        if let Some(current) = segments.last() {
            current.flush()?;
        }
        self.write_state_with(writer.last_roll_time)?;
        for segment in &segments {
            segment.close()?;
        }
        self.shared.signal.notify();

        log::info!("Closed log {:?}", self.dir);
        Ok(())
    }

    fn write_state(&self) -> Result<()> {
        let last_roll_time = self.writer.lock().last_roll_time;
        self.write_state_with(last_roll_time)
    }

    fn write_state_with(&self, last_roll_time: u64) -> Result<()> {
        let state = State {
            position: self.position(),
            entry_count: self.entries(),
            last_roll_time,
            segments: self.segments(),
        };
        state::write_json(&self.dir.join(STATE_FILE), &state)
    }
}

impl<T> Drop for LogAppender<T> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Error closing log {:?} during drop: {}", self.dir, e);
        }
    }
}
