//! Blocking cursor over one segment.

use super::frame::{read_frame, Frame};
use super::{ReaderToken, Segment};
use crate::error::{Error, Result};
use crate::poller::{wait_for_item, Poller, Step};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Tails a segment as it is written.
///
/// Ends once the segment is rolled and fully consumed, or closed.
pub struct SegmentPoller<T> {
    segment: Arc<Segment<T>>,
    position: Mutex<u64>,
    closed: AtomicBool,
    _reader: ReaderToken,
}

impl<T> SegmentPoller<T> {
    pub(crate) fn new(segment: Arc<Segment<T>>, position: u64) -> Self {
        let reader = segment.register_reader();
        Self { segment, position: Mutex::new(position), closed: AtomicBool::new(false), _reader: reader }
    }

    /// Position of the next entry.
    pub fn position(&self) -> u64 {
        *self.position.lock()
    }
}

impl<T: DeserializeOwned> SegmentPoller<T> {
    pub(crate) fn try_next(&self, advance: bool) -> Result<Step<T>> {
        let mut position = self.position.lock();
        let end = self.segment.end();

        if *position < end {
            return match read_frame(self.segment.storage(), *position, end)? {
                Frame::Entry { payload, next } => {
                    let entry = bincode::deserialize(&payload)?;
                    if advance {
                        *position = next;
                    }
                    Ok(Step::Ready(entry))
                }
                Frame::EndOfLog => Ok(Step::Finished),
                Frame::Eof => Err(Error::corruption(format!(
                    "Missing entry at {} of segment {}",
                    *position,
                    self.segment.name()
                ))),
            };
        }

        if self.segment.is_read_only() || self.segment.is_closed() {
            Ok(Step::Finished)
        } else {
            Ok(Step::Pending)
        }
    }

    fn wait(&self, timeout: Option<Duration>) -> Result<Option<T>> {
        wait_for_item(
            self.segment.signal(),
            &self.closed,
            self.segment.poll_interval(),
            timeout,
            || self.try_next(true),
        )
    }
}

impl<T: DeserializeOwned> Poller for SegmentPoller<T> {
    type Item = T;

    fn peek(&self) -> Result<Option<T>> {
        if self.is_closed() {
            return Ok(None);
        }
        match self.try_next(false)? {
            Step::Ready(entry) => Ok(Some(entry)),
            Step::Pending | Step::Finished => Ok(None),
        }
    }

    fn poll(&self) -> Result<Option<T>> {
        self.wait(Some(Duration::ZERO))
    }

    fn poll_timeout(&self, timeout: Duration) -> Result<Option<T>> {
        self.wait(Some(timeout))
    }

    fn take(&self) -> Result<Option<T>> {
        self.wait(None)
    }

    fn head_of_log(&self) -> bool {
        self.position() >= self.segment.end()
    }

    fn end_of_log(&self) -> bool {
        (self.segment.is_read_only() || self.segment.is_closed()) && self.head_of_log()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.segment.signal().notify();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
