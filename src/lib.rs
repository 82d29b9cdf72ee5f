//! # streamlog - an embedded event-store storage engine
//!
//! streamlog stores events in an append-only log split into fixed-size
//! segment files, and keeps a two-tier index from `(stream, version)` to the
//! log address of each event.
//!
//! ## Architecture
//!
//! - **Storage**: positioned reads and writes over a file or a RAM buffer
//! - **Segment**: one log file with a checksummed header, length + crc32
//!   framed entries and crash recovery on open
//! - **Appender**: one logical log over many segments, handing out 64-bit
//!   addresses that pack the segment index with the in-segment offset
//! - **Index**: a skiplist head in memory, flushed into immutable index
//!   segments searched through a sparse midpoint footer
//! - **Pollers**: blocking cursors that tail the log or the index as they
//!   grow
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use streamlog::{IndexOptions, LogAppender, Options, Poller, Range, TableIndex};
//!
//! # fn main() -> Result<(), streamlog::Error> {
//! let log: LogAppender<String> = LogAppender::open("./events", Options::default())?;
//! let index = TableIndex::open("./events/index", IndexOptions::default())?;
//!
//! // Append an event and index it as version 0 of stream 42
//! let address = log.append(&"account opened".to_string())?;
//! index.add(42, 0, address)?;
//!
//! // Resolve the stream through the index
//! for entry in index.range(&Range::all_of(42))? {
//!     let event = log.get(entry.position)?;
//!     println!("v{}: {}", entry.version, event);
//! }
//!
//! // Tail the log from the start
//! let poller = log.poller(0)?;
//! while let Some(event) = poller.poll()? {
//!     println!("{}", event);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod appender;
pub mod config;
pub mod error;
pub mod filter;
pub mod index;
pub mod poller;
pub mod segment;
pub mod storage;

pub use appender::{Addressing, LogAppender, LogPoller, LogScanner};
pub use config::{IndexOptions, Options};
pub use error::{Error, Result};
pub use index::{IndexEntry, IndexPoller, IndexSegment, MemIndex, Midpoint, Range, TableIndex};
pub use poller::{Poller, Signal};
pub use segment::{Header, Marker, Segment, SegmentIterator, SegmentPoller, SegmentType};
pub use storage::{DiskStorage, MemStorage, Storage};
