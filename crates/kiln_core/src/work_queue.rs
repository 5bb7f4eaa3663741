//! Flat, chunked dispenser of index ranges.
//!
//! A `WorkQueue` hands out `[start, end)` ranges over `0..total` in strict
//! first-come order, each at most `granularity` long. It carries no
//! priority; it is used for passes that must cover every index exactly
//! once, and as the per-node dispatch primitive of the cluster balancer.

use std::ops::Range;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default, Clone, Copy)]
struct Cursor {
    total: usize,
    workers: usize,
    granularity: usize,
    next: usize,
}

/// A lock-guarded cursor over `0..total`.
#[derive(Debug, Default)]
pub struct WorkQueue {
    cursor: Mutex<Cursor>,
}

impl WorkQueue {
    /// An empty queue. Call [`WorkQueue::refill`] before use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the cursor to 0 over `0..total`.
    ///
    /// A `granularity` of 0 picks one automatically: about four chunks per
    /// worker, never fewer than one index per chunk.
    pub fn refill(&self, total: usize, workers: usize, granularity: usize) {
        let workers = workers.max(1);
        let granularity = if granularity == 0 {
            total.div_ceil(workers * 4).max(1)
        } else {
            granularity
        };
        *self.lock() = Cursor {
            total,
            workers,
            granularity,
            next: 0,
        };
    }

    /// Claim the next chunk, or `None` once `0..total` is used up.
    pub fn next_assignment(&self) -> Option<Range<usize>> {
        let mut cursor = self.lock();
        if cursor.next >= cursor.total {
            return None;
        }
        let start = cursor.next;
        let end = start.saturating_add(cursor.granularity).min(cursor.total);
        cursor.next = end;
        Some(start..end)
    }

    /// Indices not yet handed out.
    pub fn remaining(&self) -> usize {
        let cursor = self.lock();
        cursor.total.saturating_sub(cursor.next)
    }

    pub fn total(&self) -> usize {
        self.lock().total
    }

    pub fn workers(&self) -> usize {
        self.lock().workers
    }

    pub fn granularity(&self) -> usize {
        self.lock().granularity
    }

    fn lock(&self) -> MutexGuard<'_, Cursor> {
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
