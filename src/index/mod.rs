//! # Stream index - `(stream, version)` to log address
//!
//! The index has two tiers:
//!
//! - **Head**: a [`MemIndex`] skiplist taking every new entry.
//! - **Disk**: immutable [`IndexSegment`] files, one per flush, oldest first.
//!
//! An index segment keeps its entries sorted and carries a midpoint every
//! [`ENTRIES_PER_PAGE`] entries plus one for the last entry. Lookups binary
//! search the midpoints, then read pages forward from the midpoint at or
//! before the key. A bloom filter over stream keys lets a lookup skip a
//! segment entirely.
//!
//! ## Directory layout
//!
//! ```text
//! index/
//!   00000000.idx     first flushed segment
//!   00000000.bloom   its stream filter
//!   00000001.idx
//!   ...
//! ```

mod entry;
mod memory;
mod poller;
mod segment;
mod table;

pub use entry::{IndexEntry, Midpoint, Range, ENTRY_SIZE, MIDPOINT_SIZE};
pub use memory::MemIndex;
pub use poller::IndexPoller;
pub use segment::{IndexSegment, IndexSegmentIter, ENTRIES_PER_PAGE, INDEX_HEADER_SIZE, PAGE_SIZE};
pub use table::{index_file_name, TableIndex, TableIndexIter, BLOOM_EXTENSION, INDEX_EXTENSION};

/// Name of the index directory inside a log directory.
pub const INDEX_DIR: &str = "index";
