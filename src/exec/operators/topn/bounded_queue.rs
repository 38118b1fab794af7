// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Fixed-capacity queue of the best composite keys seen so far.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Debug)]
struct QueueEntry<R> {
    key: Vec<u8>,
    row: R,
}

impl<R> PartialEq for QueueEntry<R> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<R> Eq for QueueEntry<R> {}

impl<R> PartialOrd for QueueEntry<R> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<R> Ord for QueueEntry<R> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap keeps the largest element on top.
        // "Largest" here means "worst row" for top-n eviction.
        self.key.cmp(&other.key)
    }
}

/// Result of offering a row to the queue.
#[derive(Debug, PartialEq, Eq)]
pub enum Offer<R> {
    /// The row is retained. `evicted` is the previous worst row, if one had to go.
    Accepted { evicted: Option<R> },
    /// The row is not better than the current worst; nothing changed.
    RejectedWorseThanWorst,
}

/// Keeps at most `capacity` (key, row) pairs with the smallest keys.
///
/// Keys are opaque byte strings compared unsigned-lexicographically and are
/// expected to be unique (the tie-break suffix guarantees it).
#[derive(Debug)]
pub struct BoundedRowQueue<R> {
    capacity: usize,
    heap: BinaryHeap<QueueEntry<R>>,
}

impl<R> BoundedRowQueue<R> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            // Large limits grow on demand instead of pre-allocating K slots.
            heap: BinaryHeap::with_capacity(capacity.min(4096)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.capacity
    }

    /// Current worst retained entry.
    pub fn worst(&self) -> Option<(&[u8], &R)> {
        self.heap.peek().map(|e| (e.key.as_slice(), &e.row))
    }

    /// Whether `offer(key, ..)` would retain the row. Lets callers skip
    /// payload work for rows that are rejected anyway.
    pub fn would_accept(&self, key: &[u8]) -> bool {
        if self.capacity == 0 {
            return false;
        }
        if !self.is_full() {
            return true;
        }
        self.heap
            .peek()
            .is_some_and(|worst| key < worst.key.as_slice())
    }

    pub fn offer(&mut self, key: Vec<u8>, row: R) -> Offer<R> {
        if !self.would_accept(&key) {
            return Offer::RejectedWorseThanWorst;
        }
        let entry = QueueEntry { key, row };
        if !self.is_full() {
            self.heap.push(entry);
            return Offer::Accepted { evicted: None };
        }
        let evicted = self.heap.peek_mut().map(|mut worst| {
            let old = std::mem::replace(&mut *worst, entry);
            old.row
        });
        Offer::Accepted { evicted }
    }

    /// Consume the queue, best key first.
    pub fn drain_sorted(self) -> Vec<(Vec<u8>, R)> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|e| (e.key, e.row))
            .collect()
    }

    /// Drop every entry, returning the row references so their payloads can
    /// be released.
    pub fn clear(&mut self) -> Vec<R> {
        self.heap.drain().map(|e| e.row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn k(v: u8, seq: u8) -> Vec<u8> {
        vec![v, seq]
    }

    fn rows(q: BoundedRowQueue<u32>) -> Vec<u32> {
        q.drain_sorted().into_iter().map(|(_, r)| r).collect()
    }

    #[test]
    fn keeps_the_k_smallest_keys_in_order() {
        let mut q = BoundedRowQueue::new(3);
        for (i, v) in [30u8, 10, 50, 10, 20].into_iter().enumerate() {
            q.offer(k(v, i as u8), i as u32);
        }
        assert_eq!(q.len(), 3);
        assert_eq!(rows(q), vec![1, 3, 4]);
    }

    #[test]
    fn eviction_returns_the_previous_worst() {
        let mut q = BoundedRowQueue::new(2);
        assert_eq!(q.offer(k(5, 0), 0), Offer::Accepted { evicted: None });
        assert_eq!(q.offer(k(7, 1), 1), Offer::Accepted { evicted: None });
        assert_eq!(q.offer(k(6, 2), 2), Offer::Accepted { evicted: Some(1) });
        assert_eq!(q.worst().map(|(_, r)| *r), Some(2));
    }

    #[test]
    fn rejection_leaves_state_untouched() {
        let mut q = BoundedRowQueue::new(2);
        q.offer(k(1, 0), 0);
        q.offer(k(2, 1), 1);
        let before: Vec<u8> = q.worst().map(|(key, _)| key.to_vec()).unwrap_or_default();
        for _ in 0..3 {
            assert_eq!(q.offer(k(9, 9), 9), Offer::RejectedWorseThanWorst);
            // Equal to the worst is not strictly better.
            assert_eq!(q.offer(k(2, 1), 7), Offer::RejectedWorseThanWorst);
        }
        assert_eq!(q.len(), 2);
        assert_eq!(q.worst().map(|(key, _)| key.to_vec()), Some(before));
        assert_eq!(rows(q), vec![0, 1]);
    }

    #[test]
    fn zero_capacity_rejects_everything() {
        let mut q = BoundedRowQueue::new(0);
        assert!(!q.would_accept(&[0]));
        assert_eq!(q.offer(k(0, 0), 0u32), Offer::RejectedWorseThanWorst);
        assert!(q.drain_sorted().is_empty());
    }

    #[test]
    fn capacity_above_input_never_evicts() {
        let mut q = BoundedRowQueue::new(100);
        for i in (0..10u8).rev() {
            assert_eq!(
                q.offer(k(i, 0), u32::from(i)),
                Offer::Accepted { evicted: None }
            );
        }
        assert_eq!(rows(q), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn clear_hands_back_all_rows() {
        let mut q = BoundedRowQueue::new(4);
        q.offer(k(3, 0), 3u32);
        q.offer(k(1, 0), 1u32);
        let mut cleared = q.clear();
        cleared.sort_unstable();
        assert_eq!(cleared, vec![1, 3]);
        assert!(q.is_empty());
    }
}
