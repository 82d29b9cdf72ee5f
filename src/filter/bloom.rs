//! Bloom filter over stream keys.
//!
//! Answers "might this index segment hold entries of stream X" without
//! touching the segment. False positives are possible, false negatives are
//! not.

use crate::error::{Error, Result};
use crate::filter::Filter;
use bytes::{Buf, BufMut};
use std::path::Path;

/// Size of the encoded header: num_hashes (4) + num_bits (8)
const ENCODED_HEADER_SIZE: usize = 12;

/// BloomFilter provides probabilistic membership testing for stream keys.
///
/// # Example
/// ```
/// use streamlog::filter::{BloomFilter, Filter};
///
/// let mut filter = BloomFilter::new(1000, 0.01);
/// filter.add(42);
/// assert!(filter.may_contain(42));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<u8>,
    num_hashes: u32,
    num_bits: usize,
}

impl BloomFilter {
    /// Creates a filter sized for `expected_keys` at `false_positive_rate`.
    pub fn new(expected_keys: usize, false_positive_rate: f64) -> Self {
        if expected_keys == 0 {
            return Self::with_bits_and_hashes(64, 1);
        }

        // m = -n * ln(p) / (ln(2)^2)
        let n = expected_keys as f64;
        let p = false_positive_rate.clamp(0.0001, 0.9999);
        let num_bits = ((-n * p.ln() / 2.0_f64.ln().powi(2)).ceil() as usize).max(64);

        // k = (m/n) * ln(2)
        let num_hashes = ((num_bits as f64 / n) * 2.0_f64.ln()).ceil() as u32;

        Self::with_bits_and_hashes(num_bits, num_hashes.clamp(1, 30))
    }

    fn with_bits_and_hashes(num_bits: usize, num_hashes: u32) -> Self {
        Self { bits: vec![0u8; (num_bits + 7) / 8], num_hashes, num_bits }
    }

    /// Bit positions of a key: h_i = h1 + i * h2 (mod m).
    fn positions(&self, key: u64) -> impl Iterator<Item = usize> + '_ {
        let h1 = fnv1a(key, 0xbc9f1d34);
        let h2 = fnv1a(key, 0xd0e89c7b) | 1;
        (0..self.num_hashes as u64)
            .map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits as u64) as usize)
    }

    /// Size of the bit array in bytes.
    pub fn size(&self) -> usize {
        self.bits.len()
    }

    /// Number of hash functions.
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Number of bits.
    pub fn num_bits(&self) -> usize {
        self.num_bits
    }

    /// Writes the encoded filter to `path`.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.encode())?;
        Ok(())
    }

    /// Reads a filter written by [`write_to`](Self::write_to).
    pub fn read_from(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::decode(&data)
    }
}

impl Filter for BloomFilter {
    fn may_contain(&self, key: u64) -> bool {
        self.positions(key).all(|pos| self.bits[pos / 8] & (1 << (pos % 8)) != 0)
    }

    fn add(&mut self, key: u64) {
        let positions: Vec<usize> = self.positions(key).collect();
        for pos in positions {
            self.bits[pos / 8] |= 1 << (pos % 8);
        }
    }

    /// Format:
    /// [num_hashes: 4 bytes][num_bits: 8 bytes][bits: variable][crc32: 4 bytes]
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ENCODED_HEADER_SIZE + self.bits.len() + 4);
        buf.put_u32_le(self.num_hashes);
        buf.put_u64_le(self.num_bits as u64);
        buf.put_slice(&self.bits);
        let crc = crc32fast::hash(&buf);
        buf.put_u32_le(crc);
        buf
    }

    fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < ENCODED_HEADER_SIZE + 4 {
            return Err(Error::corruption("Bloom filter data too short"));
        }

        let (body, mut trailer) = data.split_at(data.len() - 4);
        let stored = trailer.get_u32_le();
        let actual = crc32fast::hash(body);
        if stored != actual {
            return Err(Error::corruption(format!(
                "Bloom filter checksum mismatch: expected {:#x}, got {:#x}",
                stored, actual
            )));
        }

        let mut header = &body[..ENCODED_HEADER_SIZE];
        let num_hashes = header.get_u32_le();
        let num_bits = header.get_u64_le() as usize;
        let bits = &body[ENCODED_HEADER_SIZE..];

        if num_hashes == 0 || num_bits == 0 || bits.len() != (num_bits + 7) / 8 {
            return Err(Error::corruption("Bloom filter size mismatch"));
        }

        Ok(Self { bits: bits.to_vec(), num_hashes, num_bits })
    }
}

/// Seeded FNV-1a over the little-endian bytes of a key.
fn fnv1a(key: u64, seed: u32) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    let mut state = OFFSET_BASIS ^ seed as u64;
    for byte in key.to_le_bytes() {
        state ^= byte as u64;
        state = state.wrapping_mul(PRIME);
    }
    // Final avalanche so sequential keys spread over the whole bit array
    state ^= state >> 33;
    state = state.wrapping_mul(0xff51afd7ed558ccd);
    state ^ (state >> 33)
}
