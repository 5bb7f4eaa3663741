//! Approximate, sharded, thread-safe priority queue.
//!
//! The queue is made of `k` independent exact max-heaps ("shards"), each
//! behind its own mutex. A push goes to a shard chosen at random by the
//! calling thread's generator; a pop tries random shards until one has
//! something. More shards means less contention and a looser priority
//! order; with a single shard the queue is exact and fully contended.
//!
//! Because a bounded number of random probes can miss live items, a miss
//! is only "probably empty". Callers that need to know the queue is
//! drained must confirm with [`ApproxPriorityQueue::is_empty`], which
//! locks every shard. [`ApproxPriorityQueue::pop_or_confirm`] packages
//! both phases.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Outcome of the best-effort phase of a pop or top.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopAttempt<T> {
    Hit(T),
    /// Every probed shard was empty. Other shards may still hold items.
    Miss,
}

impl<T> PopAttempt<T> {
    pub fn is_miss(&self) -> bool {
        matches!(self, PopAttempt::Miss)
    }

    pub fn hit(self) -> Option<T> {
        match self {
            PopAttempt::Hit(item) => Some(item),
            PopAttempt::Miss => None,
        }
    }
}

/// Outcome of a two-phase pop: best effort first, exact check on a miss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pop<T> {
    Item(T),
    /// The random probes missed but the queue is not empty.
    Retry,
    /// The queue was verified empty with all shard locks held.
    Drained,
}

struct Entry<T, P> {
    priority: P,
    item: T,
}

// Incomparable priorities (NaN) compare equal to everything.
impl<T, P: PartialOrd> Ord for Entry<T, P> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .partial_cmp(&other.priority)
            .unwrap_or(Ordering::Equal)
    }
}

impl<T, P: PartialOrd> PartialOrd for Entry<T, P> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T, P: PartialOrd> PartialEq for Entry<T, P> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T, P: PartialOrd> Eq for Entry<T, P> {}

type Shard<T, P> = BinaryHeap<Entry<T, P>>;

/// A priority queue that trades exact ordering for low contention.
pub struct ApproxPriorityQueue<T, P = f32> {
    shards: Vec<Mutex<Shard<T, P>>>,
    rngs: Vec<Mutex<StdRng>>,
    attempts: usize,
}

impl<T, P: PartialOrd> ApproxPriorityQueue<T, P> {
    /// Create a queue with `num_shards` shards usable by thread ids
    /// `0..max_threads`. Both are clamped to at least one.
    pub fn new(num_shards: usize, max_threads: usize) -> Self {
        let num_shards = num_shards.max(1);
        let max_threads = max_threads.max(1);
        let shards = (0..num_shards).map(|_| Mutex::new(BinaryHeap::new())).collect();
        let rngs = (0..max_threads)
            .map(|i| Mutex::new(StdRng::seed_from_u64(i as u64 * 12345 + 62284)))
            .collect();
        Self {
            shards,
            rngs,
            attempts: num_shards,
        }
    }

    /// Override how many random shards a pop or top probes before
    /// reporting a miss. Zero makes every best-effort attempt miss.
    pub fn with_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    pub fn max_threads(&self) -> usize {
        self.rngs.len()
    }

    /// Insert an item. Always succeeds.
    ///
    /// # Panics
    ///
    /// Panics if `thread_id >= max_threads`.
    pub fn push(&self, item: T, priority: P, thread_id: usize) {
        let shard = self.pick_shard(thread_id);
        self.lock_shard(shard).push(Entry { priority, item });
    }

    /// Best-effort removal of a high-priority item.
    ///
    /// Probes up to the configured number of random shards and pops the
    /// top of the first non-empty one. A miss does not mean the queue is
    /// empty.
    pub fn try_pop(&self, thread_id: usize) -> PopAttempt<T> {
        for _ in 0..self.attempts {
            let shard = self.pick_shard(thread_id);
            if let Some(entry) = self.lock_shard(shard).pop() {
                return PopAttempt::Hit(entry.item);
            }
        }
        PopAttempt::Miss
    }

    /// Best-effort removal, confirmed against the exact emptiness check
    /// when the random probes miss.
    pub fn pop_or_confirm(&self, thread_id: usize) -> Pop<T> {
        match self.try_pop(thread_id) {
            PopAttempt::Hit(item) => Pop::Item(item),
            PopAttempt::Miss if self.is_empty() => Pop::Drained,
            PopAttempt::Miss => Pop::Retry,
        }
    }

    /// Remove the globally highest-priority item, holding every shard lock.
    pub fn pop_exact(&self) -> Option<T> {
        let mut guards = self.lock_all();
        let mut best: Option<usize> = None;
        for (i, shard) in guards.iter().enumerate() {
            let Some(candidate) = shard.peek() else {
                continue;
            };
            let better = match best {
                None => true,
                Some(b) => guards[b].peek().is_some_and(|current| candidate > current),
            };
            if better {
                best = Some(i);
            }
        }
        best.and_then(|i| guards[i].pop()).map(|entry| entry.item)
    }

    /// Exact emptiness check. Locks every shard; use sparingly.
    pub fn is_empty(&self) -> bool {
        self.lock_all().iter().all(|shard| shard.is_empty())
    }

    /// Exact item count. Locks every shard; use sparingly.
    pub fn len(&self) -> usize {
        self.lock_all().iter().map(|shard| shard.len()).sum()
    }

    pub fn shard_len(&self, shard: usize) -> usize {
        self.lock_shard(shard).len()
    }

    pub fn shard_is_empty(&self, shard: usize) -> bool {
        self.lock_shard(shard).is_empty()
    }

    /// Remove everything, holding every shard lock.
    pub fn clear(&self) {
        for mut shard in self.lock_all() {
            shard.clear();
        }
    }

    /// Reserve room for `additional` items in every shard.
    pub fn reserve(&self, additional: usize) {
        for i in 0..self.shards.len() {
            self.lock_shard(i).reserve(additional);
        }
    }

    fn pick_shard(&self, thread_id: usize) -> usize {
        let mut rng = self.rngs[thread_id]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        rng.gen_range(0..self.shards.len())
    }

    fn lock_shard(&self, shard: usize) -> MutexGuard<'_, Shard<T, P>> {
        self.shards[shard]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // Fixed index order.
    fn lock_all(&self) -> Vec<MutexGuard<'_, Shard<T, P>>> {
        (0..self.shards.len()).map(|i| self.lock_shard(i)).collect()
    }
}

impl<T: Clone, P: PartialOrd> ApproxPriorityQueue<T, P> {
    /// Best-effort peek at a high-priority item without removing it.
    pub fn try_top(&self, thread_id: usize) -> PopAttempt<T> {
        for _ in 0..self.attempts {
            let shard = self.pick_shard(thread_id);
            if let Some(entry) = self.lock_shard(shard).peek() {
                return PopAttempt::Hit(entry.item.clone());
            }
        }
        PopAttempt::Miss
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_single_shard_is_exact() {
        let queue = ApproxPriorityQueue::new(1, 1);
        for (item, priority) in [(1, 0.5), (2, 3.0), (3, -1.0), (4, 2.0)] {
            queue.push(item, priority, 0);
        }

        let order: Vec<i32> = std::iter::from_fn(|| queue.try_pop(0).hit()).collect();
        assert_eq!(order, vec![2, 4, 1, 3]);
    }

    #[test]
    fn test_zero_payload_is_a_hit() {
        let queue = ApproxPriorityQueue::new(1, 1);
        queue.push(0u32, 0.0, 0);
        assert_eq!(queue.try_pop(0), PopAttempt::Hit(0));
        assert_eq!(queue.try_pop(0), PopAttempt::Miss);
    }

    #[test]
    fn test_top_does_not_remove() {
        let queue = ApproxPriorityQueue::new(1, 1);
        queue.push("tile", 1.0, 0);
        assert_eq!(queue.try_top(0), PopAttempt::Hit("tile"));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_forced_miss_falls_back_to_exact_check() {
        let queue: ApproxPriorityQueue<i32> = ApproxPriorityQueue::new(4, 2).with_attempts(0);
        assert_eq!(queue.pop_or_confirm(0), Pop::Drained);

        queue.push(7, 1.0, 1);
        // Best effort can never hit, the exact check still sees the item
        assert!(queue.try_pop(0).is_miss());
        assert_eq!(queue.pop_or_confirm(0), Pop::Retry);
        assert_eq!(queue.pop_exact(), Some(7));
        assert_eq!(queue.pop_or_confirm(0), Pop::Drained);
    }

    #[test]
    fn test_pop_exact_takes_global_max() {
        let queue = ApproxPriorityQueue::new(8, 1);
        for i in 0..100 {
            queue.push(i, i as f32, 0);
        }
        for expected in (0..100).rev() {
            assert_eq!(queue.pop_exact(), Some(expected));
        }
        assert_eq!(queue.pop_exact(), None);
    }

    #[test]
    fn test_concurrent_push_pop_conserves_items() {
        const THREADS: usize = 4;
        const PER_THREAD: usize = 2000;

        let queue = ApproxPriorityQueue::new(8, THREADS);
        let popped: Vec<Vec<usize>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|t| {
                    let queue = &queue;
                    s.spawn(move || {
                        let mut rng = StdRng::seed_from_u64(t as u64);
                        let mut mine = Vec::new();
                        for i in 0..PER_THREAD {
                            queue.push(t * PER_THREAD + i, rng.gen::<f32>(), t);
                            if i % 3 == 0 {
                                if let PopAttempt::Hit(item) = queue.try_pop(t) {
                                    mine.push(item);
                                }
                            }
                        }
                        mine
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let mut seen: Vec<usize> = popped.into_iter().flatten().collect();
        loop {
            match queue.pop_or_confirm(0) {
                Pop::Item(item) => seen.push(item),
                Pop::Retry => {
                    if let Some(item) = queue.pop_exact() {
                        seen.push(item);
                    }
                }
                Pop::Drained => break,
            }
        }

        seen.sort_unstable();
        let expected: Vec<usize> = (0..THREADS * PER_THREAD).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_len_and_is_empty_agree() {
        let queue = ApproxPriorityQueue::new(6, 3);
        std::thread::scope(|s| {
            for t in 0..3 {
                let queue = &queue;
                s.spawn(move || {
                    for i in 0..500 {
                        queue.push(i, i as f32, t);
                        queue.try_pop(t);
                    }
                });
            }
        });
        assert_eq!(queue.len() == 0, queue.is_empty());

        queue.clear();
        assert_eq!(queue.len(), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_shard_queries() {
        let queue = ApproxPriorityQueue::new(3, 1);
        queue.reserve(16);
        for i in 0..30 {
            queue.push(i, 0.0, 0);
        }
        let per_shard: usize = (0..3).map(|s| queue.shard_len(s)).sum();
        assert_eq!(per_shard, 30);
        assert_eq!(
            (0..3).all(|s| queue.shard_is_empty(s)),
            queue.is_empty()
        );
    }
}
