#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! A bounded, blocking, multi-producer multi-consumer FIFO queue with
//! cooperative shutdown.
//!
//! `push` blocks while the queue is full, `pop` blocks while it is empty,
//! and both wake immediately (without error) once [`BoundedQueue::shutdown`]
//! is called: `push` then always fails and `pop` drains whatever remains
//! before reporting emptiness.

use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex},
};

/// Returned by [`BoundedQueue::push`] when the queue has been shut down.
/// Carries the item back to the caller: a shut-down queue never takes
/// ownership of a rejected push.
pub struct QueueShutDown<T>(pub T);

impl<T> std::fmt::Debug for QueueShutDown<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("QueueShutDown(..)")
    }
}

impl<T> std::fmt::Display for QueueShutDown<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("queue is shut down")
    }
}

impl<T> std::error::Error for QueueShutDown<T> {}

struct State<T> {
    items: VecDeque<T>,
    shutdown: bool,
}

/// A FIFO of at most `capacity` items, safe for concurrent producers and
/// consumers.
///
/// One mutex guards size, the item deque, and the shutdown flag; two
/// condition variables (`not_full`, `not_empty`) signal the transitions
/// producers and consumers wait on. Both are broadcast on shutdown.
pub struct BoundedQueue<T> {
    capacity: usize,
    state: Mutex<State<T>>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl<T> BoundedQueue<T> {
    /// Creates a new queue that holds at most `capacity` items.
    ///
    /// # Panics
    /// Panics if `capacity` is zero: a queue that can never hold an item
    /// can never satisfy `push`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "BoundedQueue capacity must be greater than 0");
        Self {
            capacity,
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity),
                shutdown: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    /// Appends `item`, blocking the caller until there is room or the queue
    /// is shut down.
    ///
    /// On shutdown, returns `item` back to the caller inside
    /// [`QueueShutDown`] without ever inserting it.
    pub fn push(&self, item: T) -> Result<(), QueueShutDown<T>> {
        let mut guard = self.state.lock().expect("queue mutex poisoned");
        loop {
            if guard.shutdown {
                return Err(QueueShutDown(item));
            }
            if guard.items.len() < self.capacity {
                guard.items.push_back(item);
                drop(guard);
                self.not_empty.notify_one();
                return Ok(());
            }
            guard = self.not_full.wait(guard).expect("queue mutex poisoned");
        }
    }

    /// Removes and returns the oldest item, blocking the caller until one
    /// is available or the queue is shut down and drained.
    pub fn pop(&self) -> Option<T> {
        let mut guard = self.state.lock().expect("queue mutex poisoned");
        loop {
            if let Some(item) = guard.items.pop_front() {
                drop(guard);
                self.not_full.notify_one();
                return Some(item);
            }
            if guard.shutdown {
                return None;
            }
            guard = self.not_empty.wait(guard).expect("queue mutex poisoned");
        }
    }

    /// Marks the queue as shutting down and wakes every blocked producer
    /// and consumer. Idempotent.
    pub fn shutdown(&self) {
        let mut guard = self.state.lock().expect("queue mutex poisoned");
        if guard.shutdown {
            return;
        }
        guard.shutdown = true;
        drop(guard);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Whether [`BoundedQueue::shutdown`] has been called.
    pub fn is_shutdown(&self) -> bool {
        self.state.lock().expect("queue mutex poisoned").shutdown
    }

    /// Current number of queued items. Observational: not linearizable with
    /// concurrent `push`/`pop`, but monotone with respect to
    /// happens-before ordering on the same item.
    pub fn len(&self) -> usize {
        self.state.lock().expect("queue mutex poisoned").items.len()
    }

    /// Whether the queue currently holds no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The fixed capacity this queue was constructed with.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::{sync::Arc, thread, time::Duration};

    #[test]
    fn fifo_order_single_producer_consumer() {
        let q = BoundedQueue::new(4);
        q.push(1).unwrap();
        q.push(2).unwrap();
        q.push(3).unwrap();
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
    }

    #[test]
    fn size_never_exceeds_capacity() {
        let q = BoundedQueue::new(2);
        q.push(1).unwrap();
        q.push(2).unwrap();
        assert_eq!(q.len(), 2);
        assert_eq!(q.len(), q.capacity());
    }

    #[test]
    fn push_blocks_until_pop_then_succeeds() {
        // N=1, C=1: push A, then push B (blocks); pop yields A; B unblocks.
        let q = Arc::new(BoundedQueue::new(1));
        q.push("a").unwrap();

        let q2 = q.clone();
        let handle = thread::spawn(move || {
            q2.push("b").unwrap();
        });

        thread::sleep(Duration::from_millis(50));
        assert_eq!(q.pop(), Some("a"));

        handle.join().unwrap();
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop(), Some("b"));
    }

    #[test]
    fn pop_blocks_until_push() {
        let q = Arc::new(BoundedQueue::new(4));
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.pop());

        thread::sleep(Duration::from_millis(50));
        q.push(42).unwrap();

        assert_eq!(handle.join().unwrap(), Some(42));
    }

    #[test]
    fn shutdown_fails_push_and_drains_pop() {
        let q = BoundedQueue::new(4);
        q.push(1).unwrap();
        q.push(2).unwrap();
        q.shutdown();

        match q.push(3) {
            Err(QueueShutDown(item)) => assert_eq!(item, 3),
            Ok(()) => panic!("push succeeded after shutdown"),
        }

        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let q: BoundedQueue<i32> = BoundedQueue::new(1);
        q.shutdown();
        q.shutdown();
        assert!(q.is_shutdown());
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn shutdown_wakes_blocked_pop() {
        let q = Arc::new(BoundedQueue::<i32>::new(1));
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.pop());

        thread::sleep(Duration::from_millis(50));
        q.shutdown();

        assert_eq!(handle.join().unwrap(), None);
    }

    #[test]
    fn shutdown_wakes_blocked_push() {
        let q = Arc::new(BoundedQueue::new(1));
        q.push(1).unwrap();

        let q2 = q.clone();
        let handle = thread::spawn(move || q2.push(2));

        thread::sleep(Duration::from_millis(50));
        q.shutdown();

        match handle.join().unwrap() {
            Err(QueueShutDown(item)) => assert_eq!(item, 2),
            Ok(()) => panic!("push succeeded after shutdown"),
        }
    }
}
