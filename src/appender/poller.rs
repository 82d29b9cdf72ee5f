//! Blocking cursor over the whole log.

use super::Shared;
use crate::error::Result;
use crate::poller::{wait_for_item, Poller, Step};
use crate::segment::{SegmentPoller, HEADER_SIZE};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Cursor<T> {
    index: usize,
    poller: SegmentPoller<T>,
}

/// Tails a log across segment rolls.
///
/// When the segment being tailed is rolled and fully consumed, the poller
/// moves to the next segment. It ends only when the log is closed.
pub struct LogPoller<T> {
    shared: Arc<Shared<T>>,
    cursor: Mutex<Cursor<T>>,
    closed: AtomicBool,
}

impl<T> LogPoller<T> {
    pub(crate) fn new(shared: Arc<Shared<T>>, index: usize, poller: SegmentPoller<T>) -> Self {
        Self { shared, cursor: Mutex::new(Cursor { index, poller }), closed: AtomicBool::new(false) }
    }

    /// Address of the next entry.
    pub fn position(&self) -> u64 {
        let cursor = self.cursor.lock();
        self.shared.addressing().pack(cursor.index as u64, cursor.poller.position())
    }
}

impl<T: DeserializeOwned> LogPoller<T> {
    fn try_next(&self, advance: bool) -> Result<Step<T>> {
        let mut cursor = self.cursor.lock();
        loop {
            match cursor.poller.try_next(advance)? {
                Step::Finished => match self.shared.segment(cursor.index + 1) {
                    Some(next) => {
                        log::debug!("Poller moving to segment {}", next.name());
                        cursor.index += 1;
                        cursor.poller = next.poller(HEADER_SIZE as u64);
                    }
                    None if self.shared.is_closed() => return Ok(Step::Finished),
                    // Rolled, next segment not published yet
                    None => return Ok(Step::Pending),
                },
                step => return Ok(step),
            }
        }
    }

    fn wait(&self, timeout: Option<Duration>) -> Result<Option<T>> {
        wait_for_item(
            self.shared.signal(),
            &self.closed,
            self.shared.poll_interval(),
            timeout,
            || self.try_next(true),
        )
    }
}

impl<T: DeserializeOwned> Poller for LogPoller<T> {
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
        let cursor = self.cursor.lock();
        cursor.poller.head_of_log() && cursor.index + 1 >= self.shared.segment_count()
    }

    fn end_of_log(&self) -> bool {
        self.shared.is_closed() && self.head_of_log()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.shared.signal().notify();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
