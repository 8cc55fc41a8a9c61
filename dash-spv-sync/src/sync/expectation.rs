//! Block expectation queue.
//!
//! Every filtered block requested from the download peer while syncing is
//! recorded here in request order. The merkle block ingester pops the head and
//! compares it with the delivered block, so the download peer cannot reorder
//! or interleave blocks.
//!
//! The queue is bounded: pushing into a full queue waits until an entry is
//! consumed. It is closed exactly once, when the chain has caught up. After
//! that pushes are ignored and pops drain what is left, then return `None`.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use dashcore::BlockHash;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Expectations {
    hashes: VecDeque<BlockHash>,
    closed: bool,
}

/// Bounded FIFO of block hashes awaited from the download peer.
#[derive(Debug)]
pub struct BlockExpectationQueue {
    inner: Mutex<Expectations>,
    capacity: usize,
    item_pushed: Notify,
    item_popped: Notify,
}

impl BlockExpectationQueue {
    /// Create an open queue holding at most `capacity` hashes.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Expectations::default()),
            capacity: capacity.max(1),
            item_pushed: Notify::new(),
            item_popped: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Expectations> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `hash`, waiting for space if the queue is full.
    ///
    /// Returns `false` without queueing anything if the queue is closed,
    /// including when it gets closed while waiting for space.
    pub async fn push(&self, hash: BlockHash) -> bool {
        loop {
            let space = self.item_popped.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            {
                let mut inner = self.lock();
                if inner.closed {
                    tracing::trace!("Ignoring expectation for {} after close", hash);
                    return false;
                }
                if inner.hashes.len() < self.capacity {
                    inner.hashes.push_back(hash);
                    drop(inner);
                    self.item_pushed.notify_one();
                    return true;
                }
            }

            space.await;
        }
    }

    /// Remove the oldest hash, waiting until one is available.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<BlockHash> {
        loop {
            let pushed = self.item_pushed.notified();
            tokio::pin!(pushed);
            pushed.as_mut().enable();

            {
                let mut inner = self.lock();
                if let Some(hash) = inner.hashes.pop_front() {
                    drop(inner);
                    self.item_popped.notify_one();
                    return Some(hash);
                }
                if inner.closed {
                    return None;
                }
            }

            pushed.await;
        }
    }

    /// Remove the oldest hash if one is queued.
    pub fn try_pop(&self) -> Option<BlockHash> {
        let hash = self.lock().hashes.pop_front();
        if hash.is_some() {
            self.item_popped.notify_one();
        }
        hash
    }

    /// Close the queue. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        {
            let mut inner = self.lock();
            if inner.closed {
                return false;
            }
            inner.closed = true;
        }
        self.item_pushed.notify_waiters();
        self.item_popped.notify_waiters();
        true
    }

    /// Whether the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of outstanding expectations.
    pub fn len(&self) -> usize {
        self.lock().hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
