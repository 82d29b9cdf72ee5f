//! Filters that let index lookups skip segments without reading them.

pub mod bloom;

pub use bloom::BloomFilter;

/// Membership filter over stream keys
pub trait Filter {
    /// Check if a key may exist (can have false positives)
    fn may_contain(&self, key: u64) -> bool;

    /// Add a key to the filter
    fn add(&mut self, key: u64);

    /// Get the serialized representation of the filter
    fn encode(&self) -> Vec<u8>;

    /// Create a filter from serialized data
    fn decode(data: &[u8]) -> crate::Result<Self>
    where
        Self: Sized;
}
