//! Entry framing.
//!
//! Each entry is stored as:
//! - Length (4 bytes): payload length
//! - Checksum (4 bytes): seeded CRC32 of the payload
//! - Payload (variable)
//!
//! A length of `u32::MAX` is the end-of-log marker written by a roll.

use crate::error::{Error, Result};
use crate::storage::{read_exact_or_eof, Storage};
use bytes::BufMut;
use crc32fast::Hasher;

/// Size of the frame header (length + checksum)
pub const FRAME_HEADER_SIZE: usize = 8;

/// Length value reserved for the end-of-log marker
pub const EOL: u32 = u32::MAX;

const CHECKSUM_SEED: u32 = 456_765_723;

/// Seeded CRC32 of a payload.
pub fn checksum(payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&CHECKSUM_SEED.to_be_bytes());
    hasher.update(payload);
    hasher.finalize()
}

/// Frames a payload.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    buf.put_u32_le(payload.len() as u32);
    buf.put_u32_le(checksum(payload));
    buf.put_slice(payload);
    buf
}

/// The end-of-log marker.
pub fn eol_marker() -> [u8; FRAME_HEADER_SIZE] {
    let mut buf = [0u8; FRAME_HEADER_SIZE];
    buf[..4].copy_from_slice(&EOL.to_le_bytes());
    buf
}

/// Result of reading one frame.
#[derive(Debug)]
pub(crate) enum Frame {
    /// A verified entry and the position of the frame after it.
    Entry { payload: Vec<u8>, next: u64 },
    /// The roll marker.
    EndOfLog,
    /// No frame: short read or unwritten (zero) bytes.
    Eof,
}

/// Reads the frame at `position`, never reading at or past `limit`.
///
/// A frame header that does not fit before `limit` or reads as zeros is
/// `Eof`. A length that overruns `limit`, a short payload or a checksum
/// mismatch is an error.
pub(crate) fn read_frame(storage: &dyn Storage, position: u64, limit: u64) -> Result<Frame> {
    if position + FRAME_HEADER_SIZE as u64 > limit {
        return Ok(Frame::Eof);
    }

    let mut header = [0u8; FRAME_HEADER_SIZE];
    if storage.read_at(position, &mut header)? < FRAME_HEADER_SIZE {
        return Ok(Frame::Eof);
    }

    let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let expected = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

    if length == EOL {
        return Ok(Frame::EndOfLog);
    }
    if length == 0 {
        return Ok(Frame::Eof);
    }

    let start = position + FRAME_HEADER_SIZE as u64;
    let next = start + length as u64;
    if next > limit {
        return Err(Error::corruption(format!(
            "Frame at {} has length {} past the end of data at {}",
            position, length, limit
        )));
    }

    let payload = read_exact_or_eof(storage, start, length as usize)?;
    if payload.len() < length as usize {
        return Err(Error::corruption(format!(
            "Incomplete frame at {}: expected {} bytes, got {}",
            position,
            length,
            payload.len()
        )));
    }

    let actual = checksum(&payload);
    if actual != expected {
        return Err(Error::ChecksumMismatch { position, expected, actual });
    }

    Ok(Frame::Entry { payload, next })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemStorage;

    #[test]
    fn test_frame_read_back() {
        let storage = MemStorage::new("frames");
        let frame = encode(b"hello world");
        storage.write_at(16, &frame).unwrap();

        match read_frame(&storage, 16, storage.len().unwrap()).unwrap() {
            Frame::Entry { payload, next } => {
                assert_eq!(payload, b"hello world");
                assert_eq!(next, 16 + frame.len() as u64);
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_checksum_is_seeded() {
        assert_ne!(checksum(b"data"), crc32fast::hash(b"data"));
        assert_eq!(checksum(b"data"), checksum(b"data"));
    }

    #[test]
    fn test_eol_and_zero() {
        let storage = MemStorage::new("frames");
        storage.write_at(0, &eol_marker()).unwrap();
        storage.write_at(8, &[0u8; 16]).unwrap();

        assert!(matches!(read_frame(&storage, 0, 24).unwrap(), Frame::EndOfLog));
        assert!(matches!(read_frame(&storage, 8, 24).unwrap(), Frame::Eof));
        // Header would cross the limit
        assert!(matches!(read_frame(&storage, 20, 24).unwrap(), Frame::Eof));
    }

    #[test]
    fn test_checksum_mismatch() {
        let storage = MemStorage::new("frames");
        let mut frame = encode(b"payload");
        frame[FRAME_HEADER_SIZE + 2] ^= 0x01;
        storage.write_at(0, &frame).unwrap();

        let err = read_frame(&storage, 0, frame.len() as u64).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { position: 0, .. }));
    }

    #[test]
    fn test_length_past_limit() {
        let storage = MemStorage::new("frames");
        let frame = encode(&[7u8; 100]);
        storage.write_at(0, &frame).unwrap();

        let err = read_frame(&storage, 0, 50).unwrap_err();
        assert!(matches!(err, Error::Corruption(_)));
    }
}
