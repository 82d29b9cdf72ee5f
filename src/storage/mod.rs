//! Byte-addressable storage regions.
//!
//! Every segment file, log or index, is accessed through the [`Storage`]
//! trait. Reads and writes are positioned, so one handle can be shared between
//! the writer and any number of readers without a shared cursor.
//!
//! Reads past the end of a region return a short count instead of an error;
//! callers treat that as end of data. Writes past the end grow the region.

mod disk;
mod memory;

pub use disk::DiskStorage;
pub use memory::MemStorage;

use crate::error::Result;
use std::fmt;

/// A growable region of bytes with positioned access.
pub trait Storage: Send + Sync + fmt::Debug {
    /// Reads into `buf` starting at `offset`.
    ///
    /// Returns the number of bytes read, which is less than `buf.len()` only
    /// when the end of the region was reached.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Writes all of `data` at `offset`, growing the region if needed.
    fn write_at(&self, offset: u64, data: &[u8]) -> Result<usize>;

    /// Current size of the region in bytes.
    fn len(&self) -> Result<u64>;

    /// Returns true if the region holds no bytes.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Resizes the region to exactly `len` bytes.
    fn truncate(&self, len: u64) -> Result<()>;

    /// Grows the region to at least `len` bytes. Never shrinks.
    fn preallocate(&self, len: u64) -> Result<()> {
        if self.len()? < len {
            self.truncate(len)?;
        }
        Ok(())
    }

    /// Makes every prior write durable.
    fn flush(&self) -> Result<()>;

    /// Flushes and releases the region.
    fn close(&self) -> Result<()> {
        self.flush()
    }

    /// Removes the region from its backing medium.
    fn delete(&self) -> Result<()>;

    /// Name of the region, the file name for disk storage.
    fn name(&self) -> &str;
}

/// Reads up to `len` bytes at `offset`. The result is shorter than `len` at
/// the end of the region.
pub fn read_exact_or_eof(storage: &dyn Storage, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let n = storage.read_at(offset, &mut buf)?;
    buf.truncate(n);
    Ok(buf)
}
