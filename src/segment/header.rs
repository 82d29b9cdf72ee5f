//! Segment header block.
//!
//! The first `HEADER_SIZE` bytes of every segment file. Layout (little-endian):
//!
//! ```text
//! [created: u64][type: u32][magic_len: u32][magic: 32 bytes, zero padded]
//! [level: u32][segment_size: u64][log_start: u64][log_end: u64][entries: u64]
//! [footer_start: u64][footer_end: u64][zero padding][crc32: u32 at 1020]
//! ```
//!
//! A block of all zeros is the EMPTY sentinel of a file nobody initialized.

use crate::config::MAX_MAGIC_LEN;
use crate::error::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};

/// Size of the header block. Entries start right after it.
pub const HEADER_SIZE: usize = 1024;

const CRC_OFFSET: usize = HEADER_SIZE - 4;

/// Lifecycle state of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SegmentType {
    /// Accepts appends.
    Active = 1,
    /// Rolled. Final, never written again.
    ReadOnly = 2,
    /// Writable target of a merge.
    MergeOutput = 3,
}

impl SegmentType {
    /// Convert from u32 to SegmentType
    pub fn from_u32(value: u32) -> Result<Self> {
        match value {
            1 => Ok(SegmentType::Active),
            2 => Ok(SegmentType::ReadOnly),
            3 => Ok(SegmentType::MergeOutput),
            _ => Err(Error::corruption(format!("Invalid segment type: {}", value))),
        }
    }

    /// True for types that accept appends.
    pub fn is_writable(self) -> bool {
        !matches!(self, SegmentType::ReadOnly)
    }
}

/// Byte bounds of the log and footer regions of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marker {
    /// First byte of the entry region.
    pub log_start: u64,
    /// End of the entry region. Zero until the segment is rolled.
    pub log_end: u64,
    /// First byte of the footer.
    pub footer_start: u64,
    /// End of the footer and of the file.
    pub footer_end: u64,
}

/// Parsed segment header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Creation time in milliseconds since the Unix epoch.
    pub created: u64,
    /// Lifecycle state.
    pub segment_type: SegmentType,
    /// Magic string of the owning log.
    pub magic: String,
    /// Merge level, 0 for segments written by the appender.
    pub level: u32,
    /// Configured roll threshold when the segment was created.
    pub segment_size: u64,
    /// First byte of the entry region.
    pub log_start: u64,
    /// End of the entry region, zero while active.
    pub log_end: u64,
    /// Entry count. Final once the segment is rolled.
    pub entries: u64,
    /// First byte of the footer.
    pub footer_start: u64,
    /// End of the footer.
    pub footer_end: u64,
}

impl Header {
    /// Header of a fresh, empty segment.
    pub fn new(segment_type: SegmentType, magic: &str, segment_size: u64, created: u64) -> Self {
        Self {
            created,
            segment_type,
            magic: magic.to_string(),
            level: 0,
            segment_size,
            log_start: HEADER_SIZE as u64,
            log_end: 0,
            entries: 0,
            footer_start: 0,
            footer_end: 0,
        }
    }

    /// Log and footer bounds.
    pub fn marker(&self) -> Marker {
        Marker {
            log_start: self.log_start,
            log_end: self.log_end,
            footer_start: self.footer_start,
            footer_end: self.footer_end,
        }
    }

    /// Encodes the header into a full block.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let magic = self.magic.as_bytes();
        if magic.is_empty() || magic.len() > MAX_MAGIC_LEN {
            return Err(Error::invalid_argument(format!(
                "Magic must be between 1 and {} bytes, got {}",
                MAX_MAGIC_LEN,
                magic.len()
            )));
        }

        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        buf.put_u64_le(self.created);
        buf.put_u32_le(self.segment_type as u32);
        buf.put_u32_le(magic.len() as u32);
        buf.put_slice(magic);
        buf.put_bytes(0, MAX_MAGIC_LEN - magic.len());
        buf.put_u32_le(self.level);
        buf.put_u64_le(self.segment_size);
        buf.put_u64_le(self.log_start);
        buf.put_u64_le(self.log_end);
        buf.put_u64_le(self.entries);
        buf.put_u64_le(self.footer_start);
        buf.put_u64_le(self.footer_end);
        buf.resize(CRC_OFFSET, 0);

        let crc = crc32fast::hash(&buf);
        buf.put_u32_le(crc);

        debug_assert_eq!(buf.len(), HEADER_SIZE);
        Ok(buf.to_vec())
    }

    /// Decodes a header block.
    ///
    /// Returns `Ok(None)` for the EMPTY sentinel.
    pub fn decode(data: &[u8]) -> Result<Option<Self>> {
        if data.len() != HEADER_SIZE {
            return Err(Error::corruption(format!(
                "Header size mismatch: expected {}, got {}",
                HEADER_SIZE,
                data.len()
            )));
        }
        if data.iter().all(|&b| b == 0) {
            return Ok(None);
        }

        let stored = u32::from_le_bytes([
            data[CRC_OFFSET],
            data[CRC_OFFSET + 1],
            data[CRC_OFFSET + 2],
            data[CRC_OFFSET + 3],
        ]);
        let actual = crc32fast::hash(&data[..CRC_OFFSET]);
        if stored != actual {
            return Err(Error::corruption(format!(
                "Header checksum mismatch: expected {:#x}, got {:#x}",
                stored, actual
            )));
        }

        let mut buf = &data[..CRC_OFFSET];
        let created = buf.get_u64_le();
        let segment_type = SegmentType::from_u32(buf.get_u32_le())?;
        let magic_len = buf.get_u32_le() as usize;
        if magic_len == 0 || magic_len > MAX_MAGIC_LEN {
            return Err(Error::corruption(format!("Invalid magic length: {}", magic_len)));
        }
        let magic = String::from_utf8(buf[..magic_len].to_vec())
            .map_err(|_| Error::corruption("Magic is not valid UTF-8"))?;
        buf.advance(MAX_MAGIC_LEN);

        Ok(Some(Self {
            created,
            segment_type,
            magic,
            level: buf.get_u32_le(),
            segment_size: buf.get_u64_le(),
            log_start: buf.get_u64_le(),
            log_end: buf.get_u64_le(),
            entries: buf.get_u64_le(),
            footer_start: buf.get_u64_le(),
            footer_end: buf.get_u64_le(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Header {
        let mut header = Header::new(SegmentType::Active, "STREAMLOG", 4096, 1_700_000_000_000);
        header.level = 2;
        header.log_end = 3000;
        header.entries = 42;
        header.footer_start = 3008;
        header.footer_end = 3100;
        header
    }

    #[test]
    fn test_header_encode_decode() {
        let header = sample();
        let encoded = header.encode().unwrap();
        assert_eq!(encoded.len(), HEADER_SIZE);

        let decoded = Header::decode(&encoded).unwrap().unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_empty_sentinel() {
        let block = vec![0u8; HEADER_SIZE];
        assert!(Header::decode(&block).unwrap().is_none());
    }

    #[test]
    fn test_header_corruption_detected() {
        let mut encoded = sample().encode().unwrap();
        encoded[9] ^= 0xFF;
        assert!(matches!(Header::decode(&encoded), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_header_wrong_size() {
        assert!(Header::decode(&[1u8; 100]).is_err());
    }

    #[test]
    fn test_magic_too_long() {
        let header = Header::new(SegmentType::Active, &"m".repeat(33), 4096, 0);
        assert!(header.encode().is_err());
    }

    #[test]
    fn test_segment_type() {
        assert_eq!(SegmentType::from_u32(2).unwrap(), SegmentType::ReadOnly);
        assert!(SegmentType::from_u32(0).is_err());
        assert!(SegmentType::MergeOutput.is_writable());
        assert!(!SegmentType::ReadOnly.is_writable());
    }
}
