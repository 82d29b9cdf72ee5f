//! Blocking cursors over a growing log or index.
//!
//! All pollers follow the same protocol:
//!
//! - `peek` returns the next item without consuming it and never blocks.
//! - `poll` consumes the next item if one is ready and never blocks.
//! - `poll_timeout` waits up to a timeout for the next item.
//! - `take` waits until an item arrives, the source ends, or the poller is
//!   closed.
//!
//! Waiting threads sleep on a [`Signal`] that writers notify after every
//! write. A sleeper re-checks at least once per poll interval, so `close`
//! from another thread is observed within one interval even if no
//! notification reaches it.

use crate::error::Result;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// A blocking cursor.
pub trait Poller {
    /// Item produced by the cursor.
    type Item;

    /// Returns the next item without advancing. Repeated calls return the
    /// same item until it is consumed.
    fn peek(&self) -> Result<Option<Self::Item>>;

    /// Consumes the next item if it is already available.
    fn poll(&self) -> Result<Option<Self::Item>>;

    /// Waits up to `timeout` for the next item.
    fn poll_timeout(&self, timeout: Duration) -> Result<Option<Self::Item>>;

    /// Waits until the next item arrives.
    ///
    /// Returns `None` once the poller is closed or its source can never
    /// produce another item.
    fn take(&self) -> Result<Option<Self::Item>>;

    /// True when the cursor has caught up with the write frontier.
    fn head_of_log(&self) -> bool;

    /// True when the source is finished and the cursor has consumed all of it.
    fn end_of_log(&self) -> bool;

    /// Closes the poller and wakes any thread blocked on it.
    fn close(&self);

    /// True once `close` was called.
    fn is_closed(&self) -> bool;
}

/// Wake-up primitive shared between a writer and its pollers.
///
/// A generation counter guards against lost wake-ups: a waiter records the
/// generation before checking for data and only sleeps if no notification
/// happened since.
#[derive(Debug, Default)]
pub struct Signal {
    generation: Mutex<u64>,
    cond: Condvar,
}

impl Signal {
    /// Creates a new signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation.
    pub fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    /// Bumps the generation and wakes every waiter.
    pub fn notify(&self) {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        self.cond.notify_all();
    }

    /// Sleeps up to `timeout` unless the generation moved past `seen`.
    /// Returns the generation after waking.
    pub fn wait_since(&self, seen: u64, timeout: Duration) -> u64 {
        let mut generation = self.generation.lock();
        if *generation == seen {
            self.cond.wait_for(&mut generation, timeout);
        }
        *generation
    }
}

/// Outcome of one attempt to fetch the next item.
#[derive(Debug)]
pub(crate) enum Step<T> {
    /// An item is available.
    Ready(T),
    /// Nothing yet, more may arrive.
    Pending,
    /// Nothing now and nothing ever again.
    Finished,
}

/// Repeats `attempt` until it yields an item, the source finishes, the
/// poller is closed or the deadline passes.
///
/// `timeout` of `None` waits forever. A zero timeout makes exactly one
/// attempt.
pub(crate) fn wait_for_item<T>(
    signal: &Signal,
    closed: &AtomicBool,
    interval: Duration,
    timeout: Option<Duration>,
    mut attempt: impl FnMut() -> Result<Step<T>>,
) -> Result<Option<T>> {
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        if closed.load(Ordering::Acquire) {
            return Ok(None);
        }

        let seen = signal.generation();
        match attempt()? {
            Step::Ready(item) => return Ok(Some(item)),
            Step::Finished => return Ok(None),
            Step::Pending => {}
        }

        let wait = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(None);
                }
                (deadline - now).min(interval)
            }
            None => interval,
        };
        signal.wait_since(seen, wait);
    }
}
