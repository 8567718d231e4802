//! Bounded, closable MPMC channel for in-process (inter-thread) communication.
//!
//! A mutex/condvar-backed FIFO queue connecting any number of producers to any
//! number of consumers. Producers block when the channel is full, consumers
//! block when it is empty, and [`Channel::close`] releases every waiter at
//! once.
//!
//! # Overview
//!
//! - [`Channel`] - Cloneable handle; every clone refers to the same queue
//! - Blocking [`send`](Channel::send)/[`recv`](Channel::recv) with a
//!   [`Timeout`], wait-free [`try_send`](Channel::try_send)/
//!   [`try_recv`](Channel::try_recv)
//! - One-way, idempotent, broadcast [`close`](Channel::close)
//!
//! # Example
//!
//! ```
//! use sluice::sync::mpmc::{Channel, Timeout};
//!
//! let chan = Channel::new(8);
//!
//! // Producer thread
//! chan.send(42u64, Timeout::Infinite).unwrap();
//!
//! // Consumer thread
//! assert_eq!(chan.recv(Timeout::Infinite), Ok(42));
//!
//! chan.close();
//! assert!(chan.recv(Timeout::Infinite).is_err());
//! ```
//!
//! # Close semantics
//!
//! Close is a hard stop, not a graceful drain: once the channel is closed,
//! every blocked and every future `send` or `recv` fails with `Closed`, even
//! if unread items remain in the queue. A consumer woken by `close` gets
//! `Closed`, never a leftover item. Callers that need the tail of the stream
//! must drain before closing.
//!
//! # Differences from lock-free SPSC ring queues
//!
//! - Any number of producers and consumers may share one `Channel`
//! - Waiters park on a condvar instead of spinning
//! - The queue can be shut down from any handle via `close`

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use minstant::Instant;
use thiserror::Error;

use crate::trace::debug;

/// Timeout specification for blocking operations.
#[derive(Debug, Clone, Copy)]
pub enum Timeout {
    /// Wait indefinitely.
    Infinite,
    /// Wait for at most the specified duration.
    Duration(Duration),
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Self::Duration(d)
    }
}

/// Errors returned by [`Channel::send`].
///
/// Both variants hand the rejected item back so the caller can retry or
/// dispose of it deliberately.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError<T> {
    /// The channel was, or became, closed during the call.
    #[error("channel is closed")]
    Closed(T),
    /// Capacity did not free up within the requested timeout.
    #[error("send timed out")]
    Timeout(T),
}

/// Errors returned by [`Channel::recv`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecvError {
    /// The channel was, or became, closed during the call.
    #[error("channel is closed")]
    Closed,
    /// No item arrived within the requested timeout.
    #[error("recv timed out")]
    Timeout,
}

/// Errors returned by [`Channel::try_send`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrySendError<T> {
    /// The channel is closed.
    #[error("channel is closed")]
    Closed(T),
    /// The channel is at capacity.
    #[error("channel is full")]
    Full(T),
}

/// Errors returned by [`Channel::try_recv`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TryRecvError {
    /// The channel is closed.
    #[error("channel is closed")]
    Closed,
    /// The channel holds no items.
    #[error("channel is empty")]
    Empty,
}

/// Queue state guarded by the mutex.
///
/// `closed` lives inside the lock so the guarded waits see a consistent
/// snapshot of flag and queue together.
struct Inner<T> {
    queue: VecDeque<T>,
    closed: bool,
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    /// Single broadcast condvar shared by producers and consumers. Every
    /// successful mutation and every close wakes all waiters; each waiter
    /// re-evaluates its own predicate.
    available: Condvar,
    capacity: usize,
    /// Lock-free mirror of `Inner::closed` for `is_closed` and the eager
    /// pre-check in `send`/`recv`. Advisory: the authoritative read happens
    /// under the lock.
    closed: AtomicBool,
}

/// Bounded MPMC channel handle.
///
/// Cloning is cheap (`Arc` bump); all clones operate on the same queue.
/// `Channel<T>` is `Send + Sync` for `T: Send`, so a single handle may also
/// be shared by reference across threads.
pub struct Channel<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Channel<T> {
    /// Creates a new open, empty channel with the given capacity.
    ///
    /// A capacity of `0` is clamped to `1` — the channel can always hold at
    /// least one item. Construction never fails.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    queue: VecDeque::with_capacity(capacity),
                    closed: false,
                }),
                available: Condvar::new(),
                capacity,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the fixed capacity of the channel.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Returns whether the channel has been closed (non-blocking).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Relaxed)
    }

    /// Returns the number of queued items.
    ///
    /// Advisory under concurrent access: the count may be stale by the time
    /// the caller acts on it.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Returns whether the queue currently holds no items (advisory).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// Closes the channel and releases every blocked sender and receiver.
    ///
    /// Idempotent: the flag transitions open→closed at most once, and later
    /// calls only re-notify. Items still queued at close time are never
    /// delivered; see the module docs on close semantics.
    pub fn close(&self) {
        let mut inner = self.lock();
        if !inner.closed {
            inner.closed = true;
            self.shared.closed.store(true, Ordering::Relaxed);
            debug!("channel closed, {} item(s) abandoned", inner.queue.len());
        }
        drop(inner);
        self.shared.available.notify_all();
    }

    /// Blocks until the item is enqueued, the timeout elapses, or the
    /// channel closes.
    ///
    /// The timeout is a duration measured from call entry, independent per
    /// call. On success all waiters are woken so consumers can re-check for
    /// data.
    ///
    /// # Errors
    ///
    /// - [`SendError::Closed`] if the channel was closed before or during the
    ///   wait; the item is handed back un-enqueued.
    /// - [`SendError::Timeout`] if capacity never freed up within the
    ///   timeout.
    pub fn send(&self, item: T, timeout: Timeout) -> Result<(), SendError<T>> {
        // Fast-path rejection only; the in-lock check below is authoritative
        // against a racing close().
        if self.is_closed() {
            return Err(SendError::Closed(item));
        }

        let start = Instant::now();
        let mut inner = self.lock();
        loop {
            // Closed wins over free capacity on the same wake.
            if inner.closed {
                return Err(SendError::Closed(item));
            }
            if inner.queue.len() < self.shared.capacity {
                inner.queue.push_back(item);
                drop(inner);
                self.shared.available.notify_all();
                return Ok(());
            }
            inner = match self.wait(inner, timeout, start) {
                Some(guard) => guard,
                None => return Err(SendError::Timeout(item)),
            };
        }
    }

    /// Blocks until an item is dequeued, the timeout elapses, or the channel
    /// closes. Pass [`Timeout::Infinite`] to wait without bound.
    ///
    /// # Errors
    ///
    /// - [`RecvError::Closed`] if the channel was closed before or during
    ///   the wait — even when items remain queued (close preempts pending
    ///   data).
    /// - [`RecvError::Timeout`] if no item arrived within the timeout.
    pub fn recv(&self, timeout: Timeout) -> Result<T, RecvError> {
        if self.is_closed() {
            return Err(RecvError::Closed);
        }

        let start = Instant::now();
        let mut inner = self.lock();
        loop {
            // Deliberate predicate order: a wake that observes the closed
            // flag returns Closed even if data is simultaneously available.
            if inner.closed {
                return Err(RecvError::Closed);
            }
            if let Some(item) = inner.queue.pop_front() {
                drop(inner);
                self.shared.available.notify_all();
                return Ok(item);
            }
            inner = match self.wait(inner, timeout, start) {
                Some(guard) => guard,
                None => return Err(RecvError::Timeout),
            };
        }
    }

    /// Attempts to enqueue without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`TrySendError::Closed`] or [`TrySendError::Full`] with the
    /// item handed back.
    pub fn try_send(&self, item: T) -> Result<(), TrySendError<T>> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(TrySendError::Closed(item));
        }
        if inner.queue.len() >= self.shared.capacity {
            return Err(TrySendError::Full(item));
        }
        inner.queue.push_back(item);
        drop(inner);
        self.shared.available.notify_all();
        Ok(())
    }

    /// Attempts to dequeue without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`TryRecvError::Closed`] on a closed channel (pending items
    /// included, matching [`recv`](Channel::recv)), [`TryRecvError::Empty`]
    /// otherwise.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(TryRecvError::Closed);
        }
        match inner.queue.pop_front() {
            Some(item) => {
                drop(inner);
                self.shared.available.notify_all();
                Ok(item)
            }
            None => Err(TryRecvError::Empty),
        }
    }

    /// Parks the caller on the condvar for the remaining slice of `timeout`.
    ///
    /// Returns `None` once the timeout budget is spent. Spurious wakeups are
    /// harmless: the caller re-evaluates its predicate on every wake.
    fn wait<'a>(
        &'a self,
        inner: MutexGuard<'a, Inner<T>>,
        timeout: Timeout,
        start: Instant,
    ) -> Option<MutexGuard<'a, Inner<T>>> {
        match timeout {
            Timeout::Infinite => Some(
                self.shared
                    .available
                    .wait(inner)
                    .unwrap_or_else(PoisonError::into_inner),
            ),
            Timeout::Duration(d) => {
                let left = d.checked_sub(start.elapsed())?;
                let (guard, _timed_out) = self
                    .shared
                    .available
                    .wait_timeout(inner, left)
                    .unwrap_or_else(PoisonError::into_inner);
                Some(guard)
            }
        }
    }

    /// Acquires the state lock, absorbing poison.
    ///
    /// No code path panics while holding the lock, so a poisoned guard still
    /// holds coherent state.
    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_send_recv() {
        let chan = Channel::new(8);

        assert!(chan.send(42u64, Timeout::Infinite).is_ok());
        assert_eq!(chan.recv(Timeout::Infinite), Ok(42));
    }

    #[test]
    fn test_fifo_order() {
        let chan = Channel::new(16);

        for i in 0..10 {
            assert!(chan.send(i, Timeout::Infinite).is_ok());
        }

        for i in 0..10 {
            assert_eq!(chan.recv(Timeout::Infinite), Ok(i));
        }
    }

    #[test]
    fn test_send_timeout_when_full() {
        let chan = Channel::new(2);

        assert!(chan.send(1, Timeout::Infinite).is_ok());
        assert!(chan.send(2, Timeout::Infinite).is_ok());

        let timeout = Duration::from_millis(10);
        let begin = std::time::Instant::now();
        assert_eq!(
            chan.send(3, timeout.into()),
            Err(SendError::Timeout(3)),
            "full channel must time out, not block forever"
        );
        let elapsed = begin.elapsed();
        assert!(
            elapsed >= Duration::from_millis(5),
            "returned well before the timeout: {elapsed:?}"
        );
        assert!(
            elapsed < Duration::from_secs(2),
            "took far longer than the timeout: {elapsed:?}"
        );
    }

    #[test]
    fn test_recv_timeout_when_empty() {
        let chan = Channel::<u64>::new(4);

        let timeout = Duration::from_millis(10);
        let begin = std::time::Instant::now();
        assert_eq!(chan.recv(timeout.into()), Err(RecvError::Timeout));
        let elapsed = begin.elapsed();
        assert!(
            elapsed >= Duration::from_millis(5),
            "returned well before the timeout: {elapsed:?}"
        );
        assert!(
            elapsed < Duration::from_secs(2),
            "took far longer than the timeout: {elapsed:?}"
        );
    }

    #[test]
    fn test_full_drain_refill_scenario() {
        let chan = Channel::new(2);
        let short = Timeout::Duration(Duration::from_millis(10));

        assert!(chan.send('a', Timeout::Infinite).is_ok());
        assert!(chan.send('b', Timeout::Infinite).is_ok());
        assert_eq!(chan.send('c', short), Err(SendError::Timeout('c')));

        assert_eq!(chan.recv(Timeout::Infinite), Ok('a'));
        assert!(chan.send('c', short).is_ok());

        assert_eq!(chan.recv(Timeout::Infinite), Ok('b'));
        assert_eq!(chan.recv(Timeout::Infinite), Ok('c'));
    }

    #[test]
    fn test_close_preempts_pending_items() {
        let chan = Channel::new(4);

        chan.send(1, Timeout::Infinite).unwrap();
        chan.send(2, Timeout::Infinite).unwrap();
        chan.close();

        // Pending items are never delivered after close.
        assert_eq!(chan.recv(Timeout::Infinite), Err(RecvError::Closed));
        assert_eq!(chan.try_recv(), Err(TryRecvError::Closed));
        assert_eq!(chan.len(), 2);
    }

    #[test]
    fn test_send_after_close() {
        let chan = Channel::new(4);
        chan.close();

        assert_eq!(
            chan.send(7, Timeout::Infinite),
            Err(SendError::Closed(7))
        );
        assert_eq!(chan.try_send(7), Err(TrySendError::Closed(7)));
    }

    #[test]
    fn test_close_is_idempotent() {
        let chan = Channel::<u32>::new(1);

        chan.close();
        chan.close();

        assert!(chan.is_closed());
        assert_eq!(chan.recv(Timeout::Infinite), Err(RecvError::Closed));
    }

    #[test]
    fn test_zero_capacity_clamped_to_one() {
        let chan = Channel::new(0);
        assert_eq!(chan.capacity(), 1);

        assert!(chan.send(1, Timeout::Infinite).is_ok());
        assert_eq!(
            chan.try_send(2),
            Err(TrySendError::Full(2)),
            "clamped channel holds exactly one item"
        );
        assert_eq!(chan.recv(Timeout::Infinite), Ok(1));
    }

    #[test]
    fn test_try_send_try_recv() {
        let chan = Channel::new(2);

        assert_eq!(chan.try_recv(), Err(TryRecvError::Empty));

        assert!(chan.try_send(1).is_ok());
        assert!(chan.try_send(2).is_ok());
        assert_eq!(chan.try_send(3), Err(TrySendError::Full(3)));

        assert_eq!(chan.try_recv(), Ok(1));
        assert!(chan.try_send(3).is_ok());
        assert_eq!(chan.try_recv(), Ok(2));
        assert_eq!(chan.try_recv(), Ok(3));
        assert_eq!(chan.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_len_and_is_empty() {
        let chan = Channel::new(4);

        assert!(chan.is_empty());
        assert_eq!(chan.len(), 0);

        chan.send("x", Timeout::Infinite).unwrap();
        chan.send("y", Timeout::Infinite).unwrap();
        assert_eq!(chan.len(), 2);
        assert!(!chan.is_empty());

        chan.recv(Timeout::Infinite).unwrap();
        assert_eq!(chan.len(), 1);
    }

    #[test]
    fn test_non_copy_type() {
        let chan = Channel::new(8);

        chan.send("hello".to_string(), Timeout::Infinite).unwrap();
        chan.send("world".to_string(), Timeout::Infinite).unwrap();

        assert_eq!(chan.recv(Timeout::Infinite), Ok("hello".to_string()));
        assert_eq!(chan.recv(Timeout::Infinite), Ok("world".to_string()));
    }

    #[test]
    fn test_clone_shares_queue() {
        let chan = Channel::new(4);
        let other = chan.clone();

        chan.send(5, Timeout::Infinite).unwrap();
        assert_eq!(other.recv(Timeout::Infinite), Ok(5));

        other.close();
        assert!(chan.is_closed());
    }

    #[test]
    fn test_zero_duration_timeout() {
        let chan = Channel::<u32>::new(1);

        assert_eq!(
            chan.recv(Timeout::Duration(Duration::ZERO)),
            Err(RecvError::Timeout)
        );

        chan.send(1, Timeout::Infinite).unwrap();
        assert_eq!(
            chan.send(2, Timeout::Duration(Duration::ZERO)),
            Err(SendError::Timeout(2))
        );
    }
}
