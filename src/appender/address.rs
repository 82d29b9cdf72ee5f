//! Bit-packed log addresses.
//!
//! An address holds a segment index in its high bits and an offset inside
//! that segment in its low `shift` bits:
//!
//! ```text
//! address = (segment << shift) | offset
//! ```

use crate::error::{Error, Result};

/// Encodes and decodes addresses for one bit split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Addressing {
    shift: u32,
}

impl Addressing {
    /// Creates the addressing scheme for `shift` offset bits (1..=63).
    pub fn new(shift: u32) -> Result<Self> {
        if shift == 0 || shift >= u64::BITS {
            return Err(Error::invalid_argument(format!(
                "Segment bit shift must be between 1 and {}, got {}",
                u64::BITS - 1,
                shift
            )));
        }
        Ok(Self { shift })
    }

    /// Number of offset bits.
    pub fn shift(&self) -> u32 {
        self.shift
    }

    /// Largest segment index an address can hold.
    pub fn max_segments(&self) -> u64 {
        u64::MAX >> self.shift
    }

    /// Largest offset an address can hold.
    pub fn max_offset(&self) -> u64 {
        (1u64 << self.shift) - 1
    }

    /// Packs a segment index and offset into an address.
    pub fn encode(&self, segment: u64, offset: u64) -> Result<u64> {
        if segment > self.max_segments() {
            return Err(Error::addressing(format!(
                "Segment index {} exceeds the maximum of {}",
                segment,
                self.max_segments()
            )));
        }
        if offset > self.max_offset() {
            return Err(Error::addressing(format!(
                "Offset {} does not fit in {} bits",
                offset, self.shift
            )));
        }
        Ok(self.pack(segment, offset))
    }

    /// Packs positions the log already holds. Appends never move a segment
    /// position past `max_offset` and segment creation never passes
    /// `max_segments`, so both parts fit.
    pub(crate) fn pack(&self, segment: u64, offset: u64) -> u64 {
        debug_assert!(segment <= self.max_segments(), "segment {} out of range", segment);
        debug_assert!(offset <= self.max_offset(), "offset {} out of range", offset);
        (segment << self.shift) | offset
    }

    /// Segment index of an address.
    pub fn decode_segment(&self, address: u64) -> u64 {
        address >> self.shift
    }

    /// Offset part of an address.
    pub fn decode_offset(&self, address: u64) -> u64 {
        address & self.max_offset()
    }

    /// Both parts of an address.
    pub fn decode(&self, address: u64) -> (u64, u64) {
        (self.decode_segment(address), self.decode_offset(address))
    }
}
