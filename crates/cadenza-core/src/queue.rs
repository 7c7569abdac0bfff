//! Bounded FIFO queues connecting the pipeline stages.
//!
//! Each queue has exactly one producer stage and one consumer stage. The
//! bound is a soft-limit policy: producers sample [`BoundedQueue::len`] and
//! back off above a high-watermark rather than blocking in `push`, so a
//! stalled consumer can never wedge its producer.
//!
//! Ownership moves through the queue: a successful push transfers the item
//! to the queue, a successful pop transfers it to the caller. Aborting the
//! queue drops every held item in FIFO order and wakes all waiters.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Outcome of a timed [`BoundedQueue::pop`].
#[derive(Debug, PartialEq, Eq)]
pub enum PopResult<T> {
    /// An item was dequeued; the caller now owns it.
    Item(T),
    /// The timeout elapsed with the queue still empty.
    TimedOut,
    /// The queue has been aborted; no item will ever be returned again.
    Aborted,
}

impl<T> PopResult<T> {
    /// Returns the item, if any.
    pub fn into_item(self) -> Option<T> {
        match self {
            PopResult::Item(item) => Some(item),
            _ => None,
        }
    }
}

/// Outcome of a [`BoundedQueue::peek`].
#[derive(Debug, PartialEq, Eq)]
pub enum PeekResult<R> {
    /// The closure was applied to the front item, which stays in the queue.
    Value(R),
    /// The queue is currently empty.
    Empty,
    /// The queue has been aborted.
    Aborted,
}

impl<R> PeekResult<R> {
    /// Returns the closure result, if the queue had a front item.
    pub fn into_value(self) -> Option<R> {
        match self {
            PeekResult::Value(value) => Some(value),
            _ => None,
        }
    }
}

struct Inner<T> {
    items: VecDeque<T>,
    aborted: bool,
}

/// A thread-safe FIFO with timed pop and irreversible abort.
///
/// The producer wakes one waiter per push; abort wakes everybody. After
/// abort, `push` drops the item and `pop` reports [`PopResult::Aborted`]
/// within one wakeup latency, so workers parked on an empty queue unblock
/// promptly during teardown.
pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
    available: Condvar,
}

impl<T> BoundedQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                aborted: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Enqueues `item`, waking one waiting consumer.
    ///
    /// If the queue has been aborted the item is dropped here; late pushes
    /// from a producer that raced with teardown are never observed by
    /// consumers.
    pub fn push(&self, item: T) {
        let mut inner = self.inner.lock();
        if inner.aborted {
            return;
        }
        inner.items.push_back(item);
        self.available.notify_one();
    }

    /// Dequeues the front item, blocking up to `timeout` when empty.
    pub fn pop(&self, timeout: Duration) -> PopResult<T> {
        let mut inner = self.inner.lock();
        if inner.items.is_empty() && !inner.aborted {
            let deadline = Instant::now() + timeout;
            while inner.items.is_empty() && !inner.aborted {
                if self.available.wait_until(&mut inner, deadline).timed_out() {
                    break;
                }
            }
        }
        if inner.aborted {
            return PopResult::Aborted;
        }
        match inner.items.pop_front() {
            Some(item) => PopResult::Item(item),
            None => PopResult::TimedOut,
        }
    }

    /// Applies `f` to the front item without removing it.
    ///
    /// The item stays owned by the queue; the video pacer uses this to read
    /// the head frame's timestamp without consuming the frame before its
    /// presentation time.
    pub fn peek<R>(&self, f: impl FnOnce(&T) -> R) -> PeekResult<R> {
        let inner = self.inner.lock();
        if inner.aborted {
            return PeekResult::Aborted;
        }
        match inner.items.front() {
            Some(item) => PeekResult::Value(f(item)),
            None => PeekResult::Empty,
        }
    }

    /// Sampled item count, used for backpressure heuristics.
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Irreversibly shuts the queue down.
    ///
    /// Every held item is dropped in FIFO order and all waiters are woken.
    /// Subsequent pushes are no-ops and subsequent pops report
    /// [`PopResult::Aborted`].
    pub fn abort(&self) {
        let mut inner = self.inner.lock();
        inner.aborted = true;
        inner.items.clear();
        self.available.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.lock().aborted
    }
}

impl<T> Default for BoundedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
