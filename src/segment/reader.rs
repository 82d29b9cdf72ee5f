//! Forward iterator over the entries of one segment.

use super::frame::{read_frame, Frame};
use super::{ReaderToken, Segment};
use crate::error::Result;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Lazy iterator over a segment.
///
/// Bounded by the data published when `next` is called, so an iterator over
/// an active segment picks up entries appended after it was created. It ends
/// at the end-of-log marker, at the published end or after the first error.
pub struct SegmentIterator<T> {
    segment: Arc<Segment<T>>,
    position: u64,
    failed: bool,
    _reader: ReaderToken,
}

impl<T> SegmentIterator<T> {
    pub(crate) fn new(segment: Arc<Segment<T>>, position: u64) -> Self {
        let reader = segment.register_reader();
        Self { segment, position, failed: false, _reader: reader }
    }

    /// Position of the next frame to read.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// The segment being read.
    pub fn segment(&self) -> &Arc<Segment<T>> {
        &self.segment
    }
}

impl<T: DeserializeOwned> Iterator for SegmentIterator<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let end = self.segment.end();
        if self.position >= end {
            return None;
        }

        match read_frame(self.segment.storage(), self.position, end) {
            Ok(Frame::Entry { payload, next }) => {
                self.position = next;
                match bincode::deserialize(&payload) {
                    Ok(entry) => Some(Ok(entry)),
                    Err(e) => {
                        self.failed = true;
                        Some(Err(e.into()))
                    }
                }
            }
            Ok(Frame::EndOfLog) | Ok(Frame::Eof) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{SegmentType, FRAME_HEADER_SIZE, HEADER_SIZE};
    use super::*;
    use crate::config::Options;
    use crate::error::Error;
    use crate::storage::{MemStorage, Storage};

    fn segment() -> (Arc<MemStorage>, Arc<Segment<u32>>) {
        let storage = Arc::new(MemStorage::new("iter"));
        let options = Options::default().segment_size(64 * 1024).preallocate(false);
        let segment = Segment::create(storage.clone(), SegmentType::Active, &options).unwrap();
        (storage, Arc::new(segment))
    }

    #[test]
    fn test_iterate_all() {
        let (_, segment) = segment();
        for i in 0..100u32 {
            segment.append(&i).unwrap();
        }

        let values: Vec<u32> = segment.iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_iterate_from_middle() {
        let (_, segment) = segment();
        let positions: Vec<u64> = (0..10u32).map(|i| segment.append(&i).unwrap()).collect();

        let values: Vec<u32> = segment.iter_from(positions[6]).map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![6, 7, 8, 9]);
    }

    #[test]
    fn test_iterator_sees_later_appends() {
        let (_, segment) = segment();
        segment.append(&1).unwrap();

        let mut iter = segment.iter();
        assert_eq!(iter.next().unwrap().unwrap(), 1);
        assert!(iter.next().is_none());

        segment.append(&2).unwrap();
        assert_eq!(iter.next().unwrap().unwrap(), 2);
    }

    #[test]
    fn test_iterator_stops_at_roll() {
        let (_, segment) = segment();
        segment.append(&1).unwrap();
        segment.append(&2).unwrap();
        segment.roll(0, Some(b"footer")).unwrap();

        let values: Vec<u32> = segment.iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn test_iterator_reports_checksum_error_once() {
        let (storage, segment) = segment();
        segment.append(&1).unwrap();
        segment.append(&2).unwrap();

        let second = HEADER_SIZE as u64 + (FRAME_HEADER_SIZE + 4) as u64;
        storage.write_at(second + FRAME_HEADER_SIZE as u64, &[0xFF]).unwrap();

        let mut iter = segment.iter();
        assert_eq!(iter.next().unwrap().unwrap(), 1);
        assert!(matches!(iter.next(), Some(Err(Error::ChecksumMismatch { .. }))));
        assert!(iter.next().is_none());
    }
}
