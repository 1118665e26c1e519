//! Thread-safe FIFO with counting-semaphore dequeue semantics.
//!
//! Every producer/consumer edge in the engine runs through one of these:
//! the outgoing command line, the request rotation, and the decoded
//! measurement stream. A permit counter plays the role of a counting
//! semaphore: loud enqueues grant a permit, quiet enqueues do not, and
//! [`BlockingQueue::signal`] grants a permit without enqueuing. That last
//! one is how a response arrival, rather than enqueue order, paces the
//! next physical write.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

struct Inner<T> {
    items: VecDeque<T>,
    permits: usize,
    closed: bool,
}

/// Ordered container with blocking dequeue.
///
/// Permits and elements are tracked separately: a [`BlockingQueue::signal`]
/// with no element queued wakes a consumer with `None`, which consumers
/// treat as spurious and skip.
pub struct BlockingQueue<T> {
    inner: Mutex<Inner<T>>,
    available: Condvar,
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BlockingQueue<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                permits: 0,
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Append an element and grant one dequeue permit.
    pub fn enqueue(&self, element: T) {
        let mut inner = self.inner.lock().unwrap();
        inner.items.push_back(element);
        inner.permits += 1;
        drop(inner);
        self.available.notify_one();
    }

    /// Append an element without granting a permit. A later
    /// [`BlockingQueue::signal`] (or a loud enqueue) releases it.
    pub fn enqueue_quietly(&self, element: T) {
        let mut inner = self.inner.lock().unwrap();
        inner.items.push_back(element);
    }

    /// Append an element, granting a permit only when the queue was empty.
    ///
    /// This is the pacing discipline for the outgoing line: the first
    /// element may go out immediately, every later one waits for the
    /// response-observed [`BlockingQueue::signal`].
    pub fn enqueue_paced(&self, element: T) {
        let mut inner = self.inner.lock().unwrap();
        let was_empty = inner.items.is_empty();
        inner.items.push_back(element);
        if was_empty {
            inner.permits += 1;
            drop(inner);
            self.available.notify_one();
        }
    }

    /// Grant one dequeue permit without enqueuing.
    pub fn signal(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.permits += 1;
        drop(inner);
        self.available.notify_one();
    }

    /// Block until a permit is available, then remove and return the head.
    ///
    /// Returns `None` when the queue has been closed, or when a permit was
    /// granted but the elements were cleared in the meantime; consumers
    /// treat that as a spurious wake and carry on.
    pub fn dequeue(&self) -> Option<T> {
        let mut inner = self.wait_for_permit()?;
        inner.permits -= 1;
        inner.items.pop_front()
    }

    /// Block until a permit is available, then return a clone of the head
    /// *without* removing it.
    ///
    /// The request pump uses this: the head request stays queued so a
    /// completed response can rotate it to the back, and an error response
    /// can retry it in place.
    pub fn wait_peek(&self) -> Option<T>
    where
        T: Clone,
    {
        let mut inner = self.wait_for_permit()?;
        inner.permits -= 1;
        inner.items.front().cloned()
    }

    fn wait_for_permit(&self) -> Option<std::sync::MutexGuard<'_, Inner<T>>> {
        let mut inner = self.inner.lock().unwrap();
        while inner.permits == 0 && !inner.closed {
            inner = self.available.wait(inner).unwrap();
        }
        if inner.closed {
            return None;
        }
        Some(inner)
    }

    /// Clone of the head element, if any. Never blocks.
    #[must_use]
    pub fn peek(&self) -> Option<T>
    where
        T: Clone,
    {
        self.inner.lock().unwrap().items.front().cloned()
    }

    /// Whether an equal element is currently queued.
    #[must_use]
    pub fn contains(&self, element: &T) -> bool
    where
        T: PartialEq,
    {
        self.inner.lock().unwrap().items.contains(element)
    }

    /// Rotate the head element to the back. Element count, relative order
    /// of the others, and permits are all unchanged.
    pub fn move_to_back(&self) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(head) = inner.items.pop_front() {
            inner.items.push_back(head);
        }
    }

    /// Remove all elements and cancel outstanding permits.
    ///
    /// Used on disconnect: nothing queued before the wipe may pace or leak
    /// into the next session.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.items.clear();
        inner.permits = 0;
    }

    /// Permanently wake all waiters; every later `dequeue`/`wait_peek`
    /// returns `None`. Lets owners shut worker threads down.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        drop(inner);
        self.available.notify_all();
    }

    /// Whether [`BlockingQueue::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().items.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }
}
