//! Configuration options for the log appender and the table index.

use std::time::Duration;

/// Default segment size threshold (10MB)
pub const DEFAULT_SEGMENT_SIZE: u64 = 10 * 1024 * 1024;

/// Default number of bits reserved for the offset inside a segment.
///
/// Leaves 18 bits for the segment index.
pub const DEFAULT_SEGMENT_BIT_SHIFT: u32 = 46;

/// Default magic written into every segment header.
pub const DEFAULT_MAGIC: &str = "STREAMLOG";

/// Maximum length of a segment magic in bytes.
pub const MAX_MAGIC_LEN: usize = 32;

/// Interval at which blocked pollers re-check for data.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default number of head entries that triggers a flush to disk.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 1_000_000;

/// Flush thresholds below this are rejected.
pub const MIN_FLUSH_THRESHOLD: usize = 1000;

/// Configuration options for opening a log.
#[derive(Debug, Clone)]
pub struct Options {
    /// Size threshold after which the current segment is rolled (in bytes).
    /// Default: 10MB
    pub segment_size: u64,

    /// Number of low bits of an address that hold the offset inside a segment.
    /// Persisted at creation; the persisted value wins on reopen.
    /// Default: 46
    pub segment_bit_shift: u32,

    /// Magic string stored in, and verified against, every segment header.
    /// Default: "STREAMLOG"
    pub magic: String,

    /// Create the log directory if it doesn't exist.
    /// Default: true
    pub create_if_missing: bool,

    /// Flush the current segment after every append.
    /// Default: false
    pub flush_after_write: bool,

    /// Roll a non-empty segment once it has been current for this long.
    /// Default: None (size-based rolling only)
    pub roll_frequency: Option<Duration>,

    /// Interval at which blocked pollers re-check for new data.
    /// Default: 500ms
    pub poll_interval: Duration,

    /// Fail the open when recovery finds less data than the last checkpoint.
    /// Default: false (the recovered position wins and a warning is logged)
    pub strict_recovery: bool,

    /// Size new segment files to `segment_size` when they are created.
    /// Default: true
    pub preallocate: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            segment_size: DEFAULT_SEGMENT_SIZE,
            segment_bit_shift: DEFAULT_SEGMENT_BIT_SHIFT,
            magic: DEFAULT_MAGIC.to_string(),
            create_if_missing: true,
            flush_after_write: false,
            roll_frequency: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            strict_recovery: false,
            preallocate: true,
        }
    }
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the segment size threshold.
    pub fn segment_size(mut self, size: u64) -> Self {
        self.segment_size = size;
        self
    }

    /// Sets the number of offset bits in an address.
    pub fn segment_bit_shift(mut self, shift: u32) -> Self {
        self.segment_bit_shift = shift;
        self
    }

    /// Sets the segment magic.
    pub fn magic(mut self, magic: impl Into<String>) -> Self {
        self.magic = magic.into();
        self
    }

    /// Sets whether to create the directory if it doesn't exist.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Enables or disables flushing after every append.
    pub fn flush_after_write(mut self, value: bool) -> Self {
        self.flush_after_write = value;
        self
    }

    /// Sets the time-based roll frequency.
    pub fn roll_frequency(mut self, frequency: Duration) -> Self {
        self.roll_frequency = Some(frequency);
        self
    }

    /// Sets the poller re-check interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Enables or disables strict recovery.
    pub fn strict_recovery(mut self, value: bool) -> Self {
        self.strict_recovery = value;
        self
    }

    /// Enables or disables preallocation of segment files.
    pub fn preallocate(mut self, value: bool) -> Self {
        self.preallocate = value;
        self
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.segment_bit_shift == 0 || self.segment_bit_shift >= u64::BITS {
            return Err(crate::Error::invalid_argument(format!(
                "segment_bit_shift must be between 1 and {}",
                u64::BITS - 1
            )));
        }
        if self.segment_size <= crate::segment::HEADER_SIZE as u64 {
            return Err(crate::Error::invalid_argument(format!(
                "segment_size must be greater than the {} byte segment header",
                crate::segment::HEADER_SIZE
            )));
        }
        let max_offset = (1u64 << self.segment_bit_shift) - 1;
        if self.segment_size > max_offset {
            return Err(crate::Error::invalid_argument(format!(
                "segment_size {} exceeds the maximum offset {} for a {} bit shift",
                self.segment_size, max_offset, self.segment_bit_shift
            )));
        }
        if self.magic.is_empty() || self.magic.len() > MAX_MAGIC_LEN {
            return Err(crate::Error::invalid_argument(format!(
                "magic must be between 1 and {} bytes",
                MAX_MAGIC_LEN
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(crate::Error::invalid_argument("poll_interval must be > 0"));
        }
        Ok(())
    }
}

/// Configuration options for a table index.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Number of in-memory entries that triggers a flush to a new disk segment.
    /// Default: 1_000_000
    pub flush_threshold: usize,

    /// Write a bloom filter over stream keys next to every index segment.
    /// Default: true
    pub use_bloom_filter: bool,

    /// Bloom filter false positive rate.
    /// Default: 0.01 (1%)
    pub bloom_false_positive_rate: f64,

    /// Interval at which blocked index pollers re-check for new entries.
    /// Default: 500ms
    pub poll_interval: Duration,

    /// Maximum entries fetched per stream when a poller refills.
    /// Default: 1000
    pub poll_batch_size: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            use_bloom_filter: true,
            bloom_false_positive_rate: 0.01,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_batch_size: 1000,
        }
    }
}

impl IndexOptions {
    /// Creates a new IndexOptions with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flush threshold.
    pub fn flush_threshold(mut self, threshold: usize) -> Self {
        self.flush_threshold = threshold;
        self
    }

    /// Enables or disables the per-segment bloom filter.
    pub fn use_bloom_filter(mut self, value: bool) -> Self {
        self.use_bloom_filter = value;
        self
    }

    /// Sets the bloom filter false positive rate.
    pub fn bloom_false_positive_rate(mut self, rate: f64) -> Self {
        self.bloom_false_positive_rate = rate;
        self
    }

    /// Sets the poller re-check interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the per-stream refill batch size of index pollers.
    pub fn poll_batch_size(mut self, size: usize) -> Self {
        self.poll_batch_size = size;
        self
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.flush_threshold < MIN_FLUSH_THRESHOLD {
            return Err(crate::Error::invalid_argument(format!(
                "flush_threshold must be at least {}",
                MIN_FLUSH_THRESHOLD
            )));
        }
        if self.bloom_false_positive_rate <= 0.0 || self.bloom_false_positive_rate >= 1.0 {
            return Err(crate::Error::invalid_argument(
                "bloom_false_positive_rate must be between 0 and 1",
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(crate::Error::invalid_argument("poll_interval must be > 0"));
        }
        if self.poll_batch_size == 0 {
            return Err(crate::Error::invalid_argument("poll_batch_size must be > 0"));
        }
        Ok(())
    }
}
