//! In-memory head of the table index.
//!
//! A crossbeam skiplist keyed by `(stream, version)` gives ordered
//! iteration, range slicing and "last version of a stream" in logarithmic
//! time, and lets readers run concurrently with the writer.

use super::entry::{IndexEntry, Range};
use crossbeam_skiplist::SkipMap;

/// Sorted, unique-by-key set of index entries.
#[derive(Debug, Default)]
pub struct MemIndex {
    data: SkipMap<(u64, u32), u64>,
}

impl MemIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entry. An existing entry with the same key is replaced.
    pub fn add(&self, entry: IndexEntry) {
        self.data.insert(entry.key(), entry.position);
    }

    /// The entry for `(stream, version)`.
    pub fn get(&self, stream: u64, version: u32) -> Option<IndexEntry> {
        self.data.get(&(stream, version)).map(|e| IndexEntry::new(stream, version, *e.value()))
    }

    /// Highest-versioned entry of a stream.
    pub fn last_of_stream(&self, stream: u64) -> Option<IndexEntry> {
        self.data
            .range((stream, 0)..=(stream, u32::MAX))
            .next_back()
            .map(|e| IndexEntry::new(stream, e.key().1, *e.value()))
    }

    /// Entries inside `range`, ascending, at most `limit` of them.
    pub fn range(&self, range: &Range, limit: usize) -> Vec<IndexEntry> {
        if range.is_empty() || limit == 0 {
            return Vec::new();
        }
        let last = range.end.saturating_sub(1).min(u32::MAX as u64) as u32;
        self.data
            .range((range.stream, range.start)..=(range.stream, last))
            .take(limit)
            .map(|e| IndexEntry::new(e.key().0, e.key().1, *e.value()))
            .collect()
    }

    /// All entries, ascending.
    pub fn entries(&self) -> Vec<IndexEntry> {
        self.data.iter().map(|e| IndexEntry::new(e.key().0, e.key().1, *e.value())).collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the index holds no entries.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_get() {
        let index = MemIndex::new();
        index.add(IndexEntry::new(1, 0, 100));
        index.add(IndexEntry::new(1, 1, 200));

        assert_eq!(index.get(1, 0).unwrap().position, 100);
        assert_eq!(index.get(1, 1).unwrap().position, 200);
        assert!(index.get(1, 2).is_none());
        assert!(index.get(2, 0).is_none());
    }

    #[test]
    fn test_duplicate_version_replaces_position() {
        let index = MemIndex::new();
        index.add(IndexEntry::new(5, 3, 100));
        index.add(IndexEntry::new(5, 3, 999));

        assert_eq!(index.len(), 1);
        assert_eq!(index.get(5, 3).unwrap().position, 999);
    }

    #[test]
    fn test_last_of_stream() {
        let index = MemIndex::new();
        for version in 0..10 {
            index.add(IndexEntry::new(7, version, version as u64));
        }
        index.add(IndexEntry::new(8, 50, 0));
        index.add(IndexEntry::new(6, 60, 0));

        assert_eq!(index.last_of_stream(7).unwrap().version, 9);
        assert_eq!(index.last_of_stream(8).unwrap().version, 50);
        assert!(index.last_of_stream(9).is_none());
    }

    #[test]
    fn test_range() {
        let index = MemIndex::new();
        for stream in 1..=3u64 {
            for version in 0..20 {
                index.add(IndexEntry::new(stream, version, 0));
            }
        }

        let all = index.range(&Range::all_of(2), usize::MAX);
        assert_eq!(all.len(), 20);
        assert!(all.iter().all(|e| e.stream == 2));
        assert!(all.windows(2).all(|w| w[0] < w[1]));

        let slice = index.range(&Range::of(2, 5, 8), usize::MAX);
        assert_eq!(slice.iter().map(|e| e.version).collect::<Vec<_>>(), vec![5, 6, 7]);

        let limited = index.range(&Range::from(2, 10), 3);
        assert_eq!(limited.iter().map(|e| e.version).collect::<Vec<_>>(), vec![10, 11, 12]);

        assert!(index.range(&Range::of(2, 8, 8), usize::MAX).is_empty());
    }

    #[test]
    fn test_entries_sorted() {
        let index = MemIndex::new();
        index.add(IndexEntry::new(3, 1, 0));
        index.add(IndexEntry::new(1, 9, 0));
        index.add(IndexEntry::new(1, 2, 0));

        let keys: Vec<(u64, u32)> = index.entries().iter().map(|e| e.key()).collect();
        assert_eq!(keys, vec![(1, 2), (1, 9), (3, 1)]);
    }
}
