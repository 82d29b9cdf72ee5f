//! Index entries, query ranges and midpoints.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// Encoded size of an entry: stream (8) + version (4) + position (8)
pub const ENTRY_SIZE: usize = 20;

/// Encoded size of a midpoint: entry (20) + file position (8)
pub const MIDPOINT_SIZE: usize = ENTRY_SIZE + 8;

/// Maps a `(stream, version)` pair to a log address.
///
/// Equality and ordering consider only `(stream, version)`; two entries for
/// the same version are the same entry whatever their position.
#[derive(Debug, Clone, Copy)]
pub struct IndexEntry {
    /// Stream key.
    pub stream: u64,
    /// Version inside the stream, starting at 0.
    pub version: u32,
    /// Address of the event in the log.
    pub position: u64,
}

impl IndexEntry {
    /// Creates an entry.
    pub fn new(stream: u64, version: u32, position: u64) -> Self {
        Self { stream, version, position }
    }

    /// Sort key.
    pub fn key(&self) -> (u64, u32) {
        (self.stream, self.version)
    }

    /// Appends the 20-byte encoding to `buf`.
    pub fn encode_into(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(self.stream);
        buf.put_u32_le(self.version);
        buf.put_u64_le(self.position);
    }

    /// Decodes an entry from the first 20 bytes of `data`.
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < ENTRY_SIZE {
            return Err(Error::corruption(format!("Index entry too short: {} bytes", data.len())));
        }
        Ok(Self { stream: data.get_u64_le(), version: data.get_u32_le(), position: data.get_u64_le() })
    }
}

impl PartialEq for IndexEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for IndexEntry {}

impl PartialOrd for IndexEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl Hash for IndexEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

/// Versions `[start, end)` of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    /// Stream key.
    pub stream: u64,
    /// First version, inclusive.
    pub start: u32,
    /// End version, exclusive. Wide enough to include `u32::MAX`.
    pub end: u64,
}

impl Range {
    /// Every version of a stream.
    pub fn all_of(stream: u64) -> Self {
        Self { stream, start: 0, end: u32::MAX as u64 + 1 }
    }

    /// Versions `[start, end)` of a stream.
    pub fn of(stream: u64, start: u32, end: u32) -> Self {
        Self { stream, start, end: end as u64 }
    }

    /// Versions from `start` on.
    pub fn from(stream: u64, start: u32) -> Self {
        Self { stream, start, end: u32::MAX as u64 + 1 }
    }

    /// Key of the first entry the range can hold.
    pub fn start_key(&self) -> (u64, u32) {
        (self.stream, self.start)
    }

    /// True if the range holds no version.
    pub fn is_empty(&self) -> bool {
        self.start as u64 >= self.end
    }

    /// True if `entry` falls inside the range.
    pub fn contains(&self, entry: &IndexEntry) -> bool {
        entry.stream == self.stream && entry.version >= self.start && (entry.version as u64) < self.end
    }

    /// True if `entry` sorts at or after the end of the range.
    pub fn is_past(&self, entry: &IndexEntry) -> bool {
        (entry.stream, entry.version as u64) >= (self.stream, self.end)
    }

    /// True if `entry` sorts before the start of the range.
    pub fn is_before(&self, entry: &IndexEntry) -> bool {
        entry.key() < self.start_key()
    }
}

/// Sparse pointer into the entry region of an index segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Midpoint {
    /// Entry stored at `position`.
    pub entry: IndexEntry,
    /// File offset of that entry.
    pub position: u64,
}

impl Midpoint {
    /// Appends the 28-byte encoding to `buf`.
    pub fn encode_into(&self, buf: &mut impl BufMut) {
        self.entry.encode_into(buf);
        buf.put_u64_le(self.position);
    }

    /// Decodes a midpoint from the first 28 bytes of `data`.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < MIDPOINT_SIZE {
            return Err(Error::corruption(format!("Midpoint too short: {} bytes", data.len())));
        }
        let entry = IndexEntry::decode(&data[..ENTRY_SIZE])?;
        let mut rest = &data[ENTRY_SIZE..MIDPOINT_SIZE];
        Ok(Self { entry, position: rest.get_u64_le() })
    }
}
